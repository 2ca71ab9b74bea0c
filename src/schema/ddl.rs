//! DDL generation contract.
//!
//! The engine derives schema structure but leaves SQL DDL rendering to a
//! dialect collaborator. Some dialects (embedded file-based databases) cannot
//! add a foreign key outside table creation; they must reject that call
//! explicitly instead of emitting invalid SQL.

use crate::schema::{ForeignKey, Table, UniqueConstraint};
use std::fmt;

/// Error raised by a [`DdlGenerator`].
#[derive(Debug, Clone)]
pub enum DdlError {
    /// The dialect cannot express the requested DDL operation.
    Unsupported(String),
    /// The schema element is malformed for this dialect.
    Invalid(String),
}

impl fmt::Display for DdlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DdlError::Unsupported(msg) => write!(f, "unsupported DDL operation: {msg}"),
            DdlError::Invalid(msg) => write!(f, "invalid DDL request: {msg}"),
        }
    }
}

impl std::error::Error for DdlError {}

/// Renders schema metadata into dialect-specific DDL statements.
pub trait DdlGenerator {
    fn create_table(&self, table: &Table) -> Result<String, DdlError>;

    fn create_unique_constraint(
        &self,
        table: &Table,
        constraint: &UniqueConstraint,
    ) -> Result<String, DdlError>;

    /// Render a standalone `ALTER TABLE ... ADD FOREIGN KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`DdlError::Unsupported`] when the dialect only accepts
    /// foreign keys inside `CREATE TABLE`.
    fn create_foreign_key(&self, table: &Table, fk: &ForeignKey) -> Result<String, DdlError>;
}
