//! Schema metadata: tables, columns, keys and the DDL generation contract.

mod ddl;
mod postgres;
mod table;

pub use ddl::{DdlError, DdlGenerator};
pub use postgres::PostgresDdl;
pub use table::{
    Column, ColumnType, ForeignKey, PrimaryKey, Table, TableError, UniqueConstraint,
};
