//! # Tessera
//!
//! A synchronous entity-persistence engine over [`sea_query`]: declarative
//! property-to-column mappings, batched CRUD persisters with lifecycle
//! listeners, one-to-one and one-to-many relationships with cascades and
//! association tables, and three inheritance-to-table strategies
//! (single table, joined tables, table per class).
//!
//! The engine owns no connections. Callers hand it a
//! [`ConnectionProvider`](executor::ConnectionProvider) yielding an
//! [`Executor`](executor::Executor); everything else, from statement
//! construction to hydration, happens inside.

pub mod binder;
pub mod config;
pub mod context;
pub mod executor;
pub mod mapping;
pub mod persister;
pub mod polymorphism;
pub mod query;
pub mod relation;
pub mod schema;
pub mod testing;
pub mod value;

pub use binder::{Binder, BinderError, BinderRegistry};
pub use config::EngineConfig;
pub use context::{EntityPersister, PersistenceContext};
pub use executor::{Connection, ConnectionProvider, ExecuteError, Executor, Row};
pub use mapping::{
    Accessor, ColumnNaming, EmbeddableMapping, HydrateError, IdentifierPolicy,
    MappingConfiguration, MappingError,
};
pub use persister::{
    DeleteListener, InsertListener, PersistError, Persister, PersisterBuilder, RetryPolicy,
    SelectListener, UpdateListener,
};
pub use polymorphism::{
    JoinedTablesBuilder, PolymorphicPersister, SingleTableBuilder, Subtype, TablePerClassBuilder,
};
pub use relation::{
    AssociationPersister, AssociationTable, OneToManyBuilder, OneToOneBuilder, RelationMode,
};
pub use schema::{ColumnType, DdlError, DdlGenerator, PostgresDdl, Table, TableError};
pub use value::{FromColumnValue, ValueTypeError};
