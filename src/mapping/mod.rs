//! Declarative mapping: configuration, naming, resolution and the resolved
//! runtime model.

pub mod accessor;
pub mod config;
pub mod naming;
pub mod resolved;
pub mod resolver;

pub use accessor::Accessor;
pub use config::{
    EmbeddableMapping, IdentifierLinkage, IdentifierPolicy, MappingConfiguration, PropertyLinkage,
};
pub use naming::ColumnNaming;
pub use resolved::{
    HydrateError, ResolvedEntityMapping, ResolvedIdentifier, ResolvedProperty, SilentColumn,
};
pub use resolver::{resolve_entity, resolve_entity_in, ResolutionContext};

use crate::binder::BinderError;
use crate::schema::{DdlError, TableError};
use std::fmt;

/// Fatal configuration-time mapping failure.
#[derive(Debug)]
pub enum MappingError {
    /// Two linkages resolved to the same column name.
    DuplicateColumn { entity: String, column: String },
    /// Two linkages share one property name.
    DuplicateProperty { entity: String, property: String },
    /// An embedded property's column collides with an owner column and no
    /// override renames it.
    InsetColumnCollision {
        entity: String,
        inset: String,
        column: String,
    },
    /// No identifier anywhere in the configuration chain.
    MissingIdentifier { entity: String },
    /// The backing table already has a multi-column (or different) primary
    /// key; composite identifiers are unsupported.
    CompositeIdentifier {
        entity: String,
        columns: Vec<String>,
    },
    /// An indexed collection names an index column absent from the target
    /// or association table.
    MissingIndexColumn { relation: String, column: String },
    /// An entity resolution re-entered itself.
    CyclicResolution { entity: String },
    /// A polymorphic build declares no subtypes.
    NoSubtypes { entity: String },
    /// A single-table subtype names a table other than the shared one.
    SharedTableMismatch {
        entity: String,
        expected: String,
        actual: String,
    },
    Table(TableError),
    Binder(BinderError),
    Ddl(DdlError),
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingError::DuplicateColumn { entity, column } => {
                write!(f, "entity {entity}: column {column} mapped twice")
            }
            MappingError::DuplicateProperty { entity, property } => {
                write!(f, "entity {entity}: property {property} mapped twice")
            }
            MappingError::InsetColumnCollision {
                entity,
                inset,
                column,
            } => write!(
                f,
                "entity {entity}: embedded {inset} column {column} collides, add an override"
            ),
            MappingError::MissingIdentifier { entity } => {
                write!(f, "entity {entity} declares no identifier")
            }
            MappingError::CompositeIdentifier { entity, columns } => write!(
                f,
                "entity {entity}: table primary key {columns:?} conflicts with the identifier"
            ),
            MappingError::MissingIndexColumn { relation, column } => {
                write!(f, "relation {relation}: index column {column} is not mapped")
            }
            MappingError::CyclicResolution { entity } => {
                write!(f, "entity {entity} is already resolving")
            }
            MappingError::NoSubtypes { entity } => {
                write!(f, "entity {entity}: polymorphic build declares no subtypes")
            }
            MappingError::SharedTableMismatch {
                entity,
                expected,
                actual,
            } => write!(
                f,
                "entity {entity}: subtype table {actual} differs from shared table {expected}"
            ),
            MappingError::Table(err) => write!(f, "{err}"),
            MappingError::Binder(err) => write!(f, "{err}"),
            MappingError::Ddl(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for MappingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MappingError::Table(err) => Some(err),
            MappingError::Binder(err) => Some(err),
            MappingError::Ddl(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TableError> for MappingError {
    fn from(err: TableError) -> Self {
        MappingError::Table(err)
    }
}

impl From<BinderError> for MappingError {
    fn from(err: BinderError) -> Self {
        MappingError::Binder(err)
    }
}

impl From<DdlError> for MappingError {
    fn from(err: DdlError) -> Self {
        MappingError::Ddl(err)
    }
}
