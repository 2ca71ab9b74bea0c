//! Column binder registry.
//!
//! Every mapped column must have a binder for its [`ColumnType`]; persister
//! construction fails fast on a missing one, naming the offending column.
//! At runtime the binder validates outgoing bind values and normalizes
//! incoming row values before they reach property setters.

use crate::schema::{Column, ColumnType};
use crate::value::value_is_null;
use once_cell::sync::Lazy;
use sea_query::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Error raised by the registry or by an individual binder.
#[derive(Debug, Clone)]
pub enum BinderError {
    /// No binder registered for the column's type; fatal at configuration time.
    NoBinderFound { column: String, ty: ColumnType },
    /// The value cannot be bound to (or read from) a column of this type.
    TypeMismatch { column: String, detail: String },
}

impl fmt::Display for BinderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinderError::NoBinderFound { column, ty } => {
                write!(f, "no binder registered for column {column} of type {ty:?}")
            }
            BinderError::TypeMismatch { column, detail } => {
                write!(f, "column {column}: {detail}")
            }
        }
    }
}

impl std::error::Error for BinderError {}

type CoerceFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Converts values between the engine and one column type.
#[derive(Clone)]
pub struct Binder {
    ty: ColumnType,
    coerce: CoerceFn,
}

impl Binder {
    /// Build a binder from a coercion closure; the closure receives a raw
    /// value (bind or row) and returns the normalized value or a mismatch
    /// description.
    pub fn new(
        ty: ColumnType,
        coerce: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            ty,
            coerce: Arc::new(coerce),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        self.ty
    }

    /// Normalize a value for this column, nulls pass through untouched.
    pub fn coerce(&self, column: &str, value: &Value) -> Result<Value, BinderError> {
        if value_is_null(value) {
            return Ok(value.clone());
        }
        (self.coerce)(value).map_err(|detail| BinderError::TypeMismatch {
            column: column.to_string(),
            detail,
        })
    }
}

impl fmt::Debug for Binder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binder").field("ty", &self.ty).finish()
    }
}

fn variant_ok(ty: ColumnType, value: &Value) -> bool {
    match (ty, value) {
        (ColumnType::Boolean, Value::Bool(_)) => true,
        (
            ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt,
            Value::TinyInt(_)
            | Value::SmallInt(_)
            | Value::Int(_)
            | Value::BigInt(_)
            | Value::TinyUnsigned(_)
            | Value::SmallUnsigned(_)
            | Value::Unsigned(_),
        ) => true,
        (ColumnType::Float, Value::Float(_)) => true,
        (ColumnType::Double, Value::Float(_) | Value::Double(_)) => true,
        (ColumnType::Text, Value::String(_) | Value::Char(_)) => true,
        (ColumnType::Bytes, Value::Bytes(_)) => true,
        (ColumnType::Uuid, Value::Uuid(_)) => true,
        (ColumnType::Date, Value::ChronoDate(_)) => true,
        (ColumnType::Time, Value::ChronoTime(_)) => true,
        (ColumnType::DateTime, Value::ChronoDateTime(_)) => true,
        (ColumnType::TimestampTz, Value::ChronoDateTimeUtc(_)) => true,
        (ColumnType::Decimal, Value::Decimal(_)) => true,
        (ColumnType::Json, Value::Json(_)) => true,
        _ => false,
    }
}

fn default_binder(ty: ColumnType) -> Binder {
    Binder::new(ty, move |value| {
        if variant_ok(ty, value) {
            Ok(value.clone())
        } else {
            Err(format!("value {value:?} does not fit column type {ty:?}"))
        }
    })
}

static DEFAULT_TYPES: &[ColumnType] = &[
    ColumnType::Boolean,
    ColumnType::SmallInt,
    ColumnType::Integer,
    ColumnType::BigInt,
    ColumnType::Float,
    ColumnType::Double,
    ColumnType::Text,
    ColumnType::Bytes,
    ColumnType::Uuid,
    ColumnType::Date,
    ColumnType::Time,
    ColumnType::DateTime,
    ColumnType::TimestampTz,
    ColumnType::Decimal,
    ColumnType::Json,
];

static DEFAULT_REGISTRY: Lazy<BinderRegistry> = Lazy::new(BinderRegistry::with_defaults);

/// Registry of binders keyed by column type.
#[derive(Debug, Clone, Default)]
pub struct BinderRegistry {
    binders: HashMap<ColumnType, Binder>,
}

impl BinderRegistry {
    /// Empty registry; callers register every binder themselves.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated for the whole [`ColumnType`] set.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for &ty in DEFAULT_TYPES {
            registry.register(default_binder(ty));
        }
        registry
    }

    /// Shared default registry.
    pub fn global() -> &'static BinderRegistry {
        &DEFAULT_REGISTRY
    }

    /// Register (or replace) the binder for its column type.
    pub fn register(&mut self, binder: Binder) {
        self.binders.insert(binder.column_type(), binder);
    }

    /// Look up the binder for a column.
    ///
    /// # Errors
    ///
    /// [`BinderError::NoBinderFound`] naming the column when its type has no
    /// registered binder.
    pub fn binder(&self, column: &Column) -> Result<&Binder, BinderError> {
        self.binders
            .get(&column.ty)
            .ok_or_else(|| BinderError::NoBinderFound {
                column: column.name.clone(),
                ty: column.ty,
            })
    }

    pub(crate) fn binder_for(&self, column: &str, ty: ColumnType) -> Result<&Binder, BinderError> {
        self.binders.get(&ty).ok_or_else(|| BinderError::NoBinderFound {
            column: column.to_string(),
            ty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_type() {
        let registry = BinderRegistry::with_defaults();
        for &ty in DEFAULT_TYPES {
            assert!(registry.binder_for("c", ty).is_ok(), "missing binder for {ty:?}");
        }
    }

    #[test]
    fn test_missing_binder_names_column() {
        let registry = BinderRegistry::new();
        let column = Column {
            name: "created_at".to_string(),
            ty: ColumnType::DateTime,
            nullable: false,
        };
        let err = registry.binder(&column).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("created_at"));
        assert!(message.contains("DateTime"));
    }

    #[test]
    fn test_coerce_accepts_integer_family() {
        let registry = BinderRegistry::with_defaults();
        let binder = registry.binder_for("age", ColumnType::Integer).unwrap();
        assert!(binder.coerce("age", &Value::BigInt(Some(7))).is_ok());
        assert!(binder.coerce("age", &Value::Int(Some(7))).is_ok());
        let err = binder
            .coerce("age", &Value::String(Some("7".to_string())))
            .unwrap_err();
        assert!(err.to_string().contains("age"));
    }

    #[test]
    fn test_coerce_passes_nulls() {
        let registry = BinderRegistry::with_defaults();
        let binder = registry.binder_for("age", ColumnType::Integer).unwrap();
        assert!(binder.coerce("age", &Value::Int(None)).is_ok());
    }
}
