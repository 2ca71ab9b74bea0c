//! Resolved entity mappings.
//!
//! The resolver flattens a configuration chain into one
//! [`ResolvedEntityMapping`] per entity: every property carries its final
//! column name and binder, the identifier is pinned down and the table
//! holds the accumulated columns. Relationship setup later attaches silent
//! columns and foreign keys through the interior-mutability handles; after
//! configuration the mapping is only read.

use crate::binder::{Binder, BinderError};
use crate::executor::Row;
use crate::mapping::accessor::{GetValueFn, SetValueFn};
use crate::mapping::config::IdentifierPolicy;
use crate::schema::{ColumnType, ForeignKey, Table, TableError, UniqueConstraint};
use crate::value::value_is_null;
use sea_query::Value;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Failure while turning a result row into an entity.
#[derive(Debug)]
pub enum HydrateError {
    /// The row carries no column of the expected (aliased) name.
    MissingColumn { column: String },
    /// The column value does not convert into the property's type.
    Value {
        property: String,
        source: crate::value::ValueTypeError,
    },
    /// The binder rejected the row value.
    Binder(BinderError),
}

impl fmt::Display for HydrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HydrateError::MissingColumn { column } => {
                write!(f, "result row has no column {column}")
            }
            HydrateError::Value { property, source } => {
                write!(f, "property {property}: {source}")
            }
            HydrateError::Binder(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for HydrateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HydrateError::Value { source, .. } => Some(source),
            HydrateError::Binder(err) => Some(err),
            HydrateError::MissingColumn { .. } => None,
        }
    }
}

impl From<BinderError> for HydrateError {
    fn from(err: BinderError) -> Self {
        HydrateError::Binder(err)
    }
}

/// One fully resolved property-to-column link.
pub struct ResolvedProperty<E> {
    pub(crate) property: String,
    pub(crate) column: String,
    pub(crate) ty: ColumnType,
    pub(crate) nullable: bool,
    pub(crate) binder: Binder,
    pub(crate) get: GetValueFn<E>,
    pub(crate) set: SetValueFn<E>,
}

impl<E> ResolvedProperty<E> {
    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn column_type(&self) -> ColumnType {
        self.ty
    }

    /// Read the property as a coerced bind value.
    pub fn bind_value(&self, entity: &E) -> Result<Value, BinderError> {
        self.binder.coerce(&self.column, &(self.get)(entity))
    }

    /// Coerce an externally supplied value for this column.
    pub fn coerce(&self, value: &Value) -> Result<Value, BinderError> {
        self.binder.coerce(&self.column, value)
    }
}

impl<E> Clone for ResolvedProperty<E> {
    fn clone(&self) -> Self {
        Self {
            property: self.property.clone(),
            column: self.column.clone(),
            ty: self.ty,
            nullable: self.nullable,
            binder: self.binder.clone(),
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

impl<E> fmt::Debug for ResolvedProperty<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProperty")
            .field("property", &self.property)
            .field("column", &self.column)
            .field("ty", &self.ty)
            .finish()
    }
}

/// The resolved identifier of an entity mapping.
pub struct ResolvedIdentifier<E> {
    pub(crate) column: String,
    pub(crate) ty: ColumnType,
    pub(crate) binder: Binder,
    pub(crate) get: GetValueFn<E>,
    pub(crate) set: SetValueFn<E>,
    pub(crate) policy: IdentifierPolicy<E>,
}

impl<E> ResolvedIdentifier<E> {
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn column_type(&self) -> ColumnType {
        self.ty
    }

    pub fn policy(&self) -> &IdentifierPolicy<E> {
        &self.policy
    }

    /// Read the identifier as a coerced bind value.
    pub fn bind_value(&self, entity: &E) -> Result<Value, BinderError> {
        self.binder.coerce(&self.column, &(self.get)(entity))
    }

    /// Coerce an externally supplied identifier value.
    pub fn coerce(&self, value: &Value) -> Result<Value, BinderError> {
        self.binder.coerce(&self.column, value)
    }
}

impl<E> Clone for ResolvedIdentifier<E> {
    fn clone(&self) -> Self {
        Self {
            column: self.column.clone(),
            ty: self.ty,
            binder: self.binder.clone(),
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
            policy: self.policy.clone(),
        }
    }
}

impl<E> fmt::Debug for ResolvedIdentifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedIdentifier")
            .field("column", &self.column)
            .field("policy", &self.policy)
            .finish()
    }
}

/// A column written on insert without a backing property: discriminators
/// and owning-side relationship foreign keys.
pub struct SilentColumn<E> {
    pub(crate) column: String,
    pub(crate) value: Arc<dyn Fn(&E) -> Value + Send + Sync>,
}

impl<E> SilentColumn<E> {
    pub fn new(
        column: impl Into<String>,
        value: impl Fn(&E) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            column: column.into(),
            value: Arc::new(value),
        }
    }

    /// Constant-valued silent column, e.g. a discriminator.
    pub fn constant(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value: Arc::new(move |_| value.clone()),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value_for(&self, entity: &E) -> Value {
        (self.value)(entity)
    }
}

impl<E> Clone for SilentColumn<E> {
    fn clone(&self) -> Self {
        Self {
            column: self.column.clone(),
            value: Arc::clone(&self.value),
        }
    }
}

impl<E> fmt::Debug for SilentColumn<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SilentColumn")
            .field("column", &self.column)
            .finish()
    }
}

/// Fully resolved mapping of one entity type onto one table.
pub struct ResolvedEntityMapping<E> {
    entity: String,
    table_name: String,
    table: RwLock<Table>,
    properties: Vec<ResolvedProperty<E>>,
    identifier: ResolvedIdentifier<E>,
    silent: RwLock<Vec<SilentColumn<E>>>,
    factory: Arc<dyn Fn() -> E + Send + Sync>,
}

impl<E> ResolvedEntityMapping<E> {
    pub(crate) fn new(
        entity: String,
        table: Table,
        properties: Vec<ResolvedProperty<E>>,
        identifier: ResolvedIdentifier<E>,
        factory: Arc<dyn Fn() -> E + Send + Sync>,
    ) -> Self {
        Self {
            entity,
            table_name: table.name().to_string(),
            table: RwLock::new(table),
            properties,
            identifier,
            silent: RwLock::new(Vec::new()),
            factory,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Read access to the backing table.
    pub fn table(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn properties(&self) -> &[ResolvedProperty<E>] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&ResolvedProperty<E>> {
        self.properties.iter().find(|p| p.property == name)
    }

    pub fn identifier(&self) -> &ResolvedIdentifier<E> {
        &self.identifier
    }

    pub fn id_column(&self) -> &str {
        &self.identifier.column
    }

    /// Snapshot of the attached silent columns.
    pub(crate) fn silent_columns(&self) -> Vec<SilentColumn<E>> {
        self.silent
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Attach a silent column, growing the table alongside.
    pub(crate) fn push_silent(
        &self,
        silent: SilentColumn<E>,
        ty: ColumnType,
        nullable: bool,
    ) -> Result<(), TableError> {
        self.add_column_if_absent(silent.column(), ty, nullable)?;
        self.silent
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(silent);
        Ok(())
    }

    pub(crate) fn add_column_if_absent(
        &self,
        name: &str,
        ty: ColumnType,
        nullable: bool,
    ) -> Result<(), TableError> {
        self.table
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_column(name, ty, nullable)
    }

    pub(crate) fn add_foreign_key(&self, fk: ForeignKey) -> Result<(), TableError> {
        self.table
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_foreign_key(fk)
    }

    #[allow(dead_code)]
    pub(crate) fn add_unique_constraint(
        &self,
        constraint: UniqueConstraint,
    ) -> Result<(), TableError> {
        self.table
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_unique_constraint(constraint)
    }

    /// Identifier value of an instance.
    pub fn id_value(&self, entity: &E) -> Value {
        (self.identifier.get)(entity)
    }

    pub fn set_id(&self, entity: &mut E, value: &Value) -> Result<(), HydrateError> {
        (self.identifier.set)(entity, value).map_err(|source| HydrateError::Value {
            property: "identifier".to_string(),
            source,
        })
    }

    /// Whether an instance has already been written.
    ///
    /// Under `AlreadyAssigned` the configured probe decides; under the
    /// generated policies a non-null identifier means persisted.
    pub fn is_persisted(&self, entity: &E) -> bool {
        match &self.identifier.policy {
            IdentifierPolicy::AlreadyAssigned { is_persisted, .. } => is_persisted(entity),
            _ => !value_is_null(&self.id_value(entity)),
        }
    }

    pub fn mark_persisted(&self, entity: &mut E) {
        if let IdentifierPolicy::AlreadyAssigned { mark_persisted, .. } = &self.identifier.policy {
            mark_persisted(entity);
        }
    }

    /// Build a fresh instance from a row whose columns are aliased
    /// `{prefix}_{column}` (or bare when the prefix is empty).
    pub fn hydrate(&self, row: &Row, prefix: &str) -> Result<E, HydrateError> {
        let mut entity = (self.factory)();
        self.populate(&mut entity, row, prefix)?;
        Ok(entity)
    }

    /// Write a row's columns into an existing instance, identifier included.
    pub fn populate(&self, entity: &mut E, row: &Row, prefix: &str) -> Result<(), HydrateError> {
        let id_value = Self::row_value(row, prefix, &self.identifier.column)?;
        let id_value = self.identifier.binder.coerce(&self.identifier.column, id_value)?;
        (self.identifier.set)(entity, &id_value).map_err(|source| HydrateError::Value {
            property: "identifier".to_string(),
            source,
        })?;
        for property in &self.properties {
            let value = Self::row_value(row, prefix, &property.column)?;
            let value = property.binder.coerce(&property.column, value)?;
            (property.set)(entity, &value).map_err(|source| HydrateError::Value {
                property: property.property.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn row_value<'r>(row: &'r Row, prefix: &str, column: &str) -> Result<&'r Value, HydrateError> {
        let aliased;
        let name = if prefix.is_empty() {
            column
        } else {
            aliased = format!("{prefix}_{column}");
            &aliased
        };
        row.get(name).ok_or_else(|| HydrateError::MissingColumn {
            column: name.to_string(),
        })
    }
}

impl<E> fmt::Debug for ResolvedEntityMapping<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedEntityMapping")
            .field("entity", &self.entity)
            .field("table", &self.table_name)
            .field("properties", &self.properties.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::BinderRegistry;
    use crate::mapping::accessor::Accessor;
    use crate::mapping::config::{IdentifierPolicy, MappingConfiguration};
    use crate::mapping::resolver::resolve_entity;
    use crate::schema::Table;

    #[derive(Debug, Default)]
    struct User {
        id: i64,
        name: String,
    }

    fn mapping() -> ResolvedEntityMapping<User> {
        let config = MappingConfiguration::new("User", "users", User::default)
            .identifier(
                Accessor::field("id", |u: &User| u.id, |u: &mut User, v| u.id = v),
                ColumnType::BigInt,
                IdentifierPolicy::AfterInsert,
            )
            .property(
                Accessor::field(
                    "name",
                    |u: &User| u.name.clone(),
                    |u: &mut User, v| u.name = v,
                ),
                ColumnType::Text,
            );
        resolve_entity(config, Table::new("users"), BinderRegistry::global()).unwrap()
    }

    #[test]
    fn test_hydrate_and_populate_with_prefix() {
        let mapping = mapping();
        let row = Row::new(vec![
            ("root_id".to_string(), Value::BigInt(Some(7))),
            (
                "root_name".to_string(),
                Value::String(Some("ada".to_string())),
            ),
        ]);
        let user = mapping.hydrate(&row, "root").unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.name, "ada");
    }

    #[test]
    fn test_hydrate_missing_column() {
        let mapping = mapping();
        let row = Row::new(vec![("id".to_string(), Value::BigInt(Some(7)))]);
        let err = mapping.hydrate(&row, "").unwrap_err();
        assert!(matches!(err, HydrateError::MissingColumn { .. }));
    }

    #[test]
    fn test_persistence_probe_tracks_identifier() {
        let mapping = mapping();
        let mut user = User::default();
        user.id = 0;
        assert!(mapping.is_persisted(&user));
        // AfterInsert treats only a null identifier as unpersisted; zero is a
        // real key. Swap in a null to confirm the probe.
        assert!(!crate::value::value_is_null(&mapping.id_value(&user)));
    }

    #[test]
    fn test_silent_column_grows_table() {
        let mapping = mapping();
        mapping
            .push_silent(
                SilentColumn::constant("kind", Value::String(Some("user".to_string()))),
                ColumnType::Text,
                false,
            )
            .unwrap();
        assert!(mapping.table().column("kind").is_some());
        assert_eq!(mapping.silent_columns().len(), 1);
        assert_eq!(
            mapping.silent_columns()[0].value_for(&User::default()),
            Value::String(Some("user".to_string()))
        );
    }
}
