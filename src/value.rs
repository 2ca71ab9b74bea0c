//! Typed extraction from `sea_query::Value`.
//!
//! Accessors move property values in and out of entities as
//! [`sea_query::Value`]; this module supplies the read-side conversions
//! (with the numeric widening a database round trip introduces) plus the
//! null/identity helpers the rest of the engine shares.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_query::Value;
use std::fmt;
use uuid::Uuid;

/// Failure to convert a column value into the property's Rust type.
#[derive(Debug, Clone)]
pub struct ValueTypeError {
    pub expected: &'static str,
    pub actual: String,
}

impl ValueTypeError {
    fn new(expected: &'static str, actual: &Value) -> Self {
        Self {
            expected,
            actual: format!("{actual:?}"),
        }
    }
}

impl fmt::Display for ValueTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, got {}", self.expected, self.actual)
    }
}

impl std::error::Error for ValueTypeError {}

/// Conversion from a column [`Value`] into a concrete property type.
///
/// Integer values widen/narrow across the signed integer variants because
/// drivers routinely return `BigInt` for any integral column.
pub trait FromColumnValue: Sized {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError>;
}

impl FromColumnValue for i16 {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        i64::from_column_value(value)?
            .try_into()
            .map_err(|_| ValueTypeError::new("i16", value))
    }
}

impl FromColumnValue for i32 {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        i64::from_column_value(value)?
            .try_into()
            .map_err(|_| ValueTypeError::new("i32", value))
    }
}

impl FromColumnValue for i64 {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::TinyInt(Some(v)) => Ok(i64::from(*v)),
            Value::SmallInt(Some(v)) => Ok(i64::from(*v)),
            Value::Int(Some(v)) => Ok(i64::from(*v)),
            Value::BigInt(Some(v)) => Ok(*v),
            Value::TinyUnsigned(Some(v)) => Ok(i64::from(*v)),
            Value::SmallUnsigned(Some(v)) => Ok(i64::from(*v)),
            Value::Unsigned(Some(v)) => Ok(i64::from(*v)),
            other => Err(ValueTypeError::new("integer", other)),
        }
    }
}

impl FromColumnValue for f32 {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Float(Some(v)) => Ok(*v),
            other => Err(ValueTypeError::new("f32", other)),
        }
    }
}

impl FromColumnValue for f64 {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Float(Some(v)) => Ok(f64::from(*v)),
            Value::Double(Some(v)) => Ok(*v),
            other => Err(ValueTypeError::new("f64", other)),
        }
    }
}

impl FromColumnValue for bool {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Bool(Some(v)) => Ok(*v),
            other => Err(ValueTypeError::new("bool", other)),
        }
    }
}

impl FromColumnValue for String {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::String(Some(v)) => Ok(v.clone()),
            other => Err(ValueTypeError::new("string", other)),
        }
    }
}

impl FromColumnValue for Vec<u8> {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Bytes(Some(v)) => Ok(v.clone()),
            other => Err(ValueTypeError::new("bytes", other)),
        }
    }
}

impl FromColumnValue for Uuid {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Uuid(Some(v)) => Ok(*v),
            Value::String(Some(v)) => {
                Uuid::parse_str(v).map_err(|_| ValueTypeError::new("uuid", value))
            }
            other => Err(ValueTypeError::new("uuid", other)),
        }
    }
}

impl FromColumnValue for NaiveDate {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::ChronoDate(Some(v)) => Ok(*v),
            other => Err(ValueTypeError::new("date", other)),
        }
    }
}

impl FromColumnValue for NaiveTime {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::ChronoTime(Some(v)) => Ok(*v),
            other => Err(ValueTypeError::new("time", other)),
        }
    }
}

impl FromColumnValue for NaiveDateTime {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::ChronoDateTime(Some(v)) => Ok(*v),
            other => Err(ValueTypeError::new("datetime", other)),
        }
    }
}

impl FromColumnValue for DateTime<Utc> {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::ChronoDateTimeUtc(Some(v)) => Ok(*v),
            other => Err(ValueTypeError::new("datetime with timezone", other)),
        }
    }
}

impl FromColumnValue for Decimal {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Decimal(Some(v)) => Ok(*v),
            other => Err(ValueTypeError::new("decimal", other)),
        }
    }
}

impl FromColumnValue for serde_json::Value {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Json(Some(v)) => Ok((**v).clone()),
            other => Err(ValueTypeError::new("json", other)),
        }
    }
}

impl<T: FromColumnValue> FromColumnValue for Option<T> {
    fn from_column_value(value: &Value) -> Result<Self, ValueTypeError> {
        if value_is_null(value) {
            Ok(None)
        } else {
            T::from_column_value(value).map(Some)
        }
    }
}

/// Whether a value is the SQL NULL of its type.
pub fn value_is_null(value: &Value) -> bool {
    match value {
        Value::Bool(None)
        | Value::TinyInt(None)
        | Value::SmallInt(None)
        | Value::Int(None)
        | Value::BigInt(None)
        | Value::TinyUnsigned(None)
        | Value::SmallUnsigned(None)
        | Value::Unsigned(None)
        | Value::BigUnsigned(None)
        | Value::Float(None)
        | Value::Double(None)
        | Value::Char(None)
        | Value::String(None)
        | Value::Bytes(None)
        | Value::Json(None)
        | Value::ChronoDate(None)
        | Value::ChronoTime(None)
        | Value::ChronoDateTime(None)
        | Value::ChronoDateTimeUtc(None)
        | Value::ChronoDateTimeLocal(None)
        | Value::ChronoDateTimeWithTimeZone(None)
        | Value::Uuid(None)
        | Value::Decimal(None) => true,
        _ => false,
    }
}

/// The SQL NULL of a column type.
pub(crate) fn null_of(ty: crate::schema::ColumnType) -> Value {
    use crate::schema::ColumnType;
    match ty {
        ColumnType::Boolean => Value::Bool(None),
        ColumnType::SmallInt => Value::SmallInt(None),
        ColumnType::Integer => Value::Int(None),
        ColumnType::BigInt => Value::BigInt(None),
        ColumnType::Float => Value::Float(None),
        ColumnType::Double => Value::Double(None),
        ColumnType::Text => Value::String(None),
        ColumnType::Bytes => Value::Bytes(None),
        ColumnType::Uuid => Value::Uuid(None),
        ColumnType::Date => Value::ChronoDate(None),
        ColumnType::Time => Value::ChronoTime(None),
        ColumnType::DateTime => Value::ChronoDateTime(None),
        ColumnType::TimestampTz => Value::ChronoDateTimeUtc(None),
        ColumnType::Decimal => Value::Decimal(None),
        ColumnType::Json => Value::Json(None),
    }
}

/// Stable map key for a value, used to group rows and de-duplicate edges.
/// `Value` is not `Hash`, so the debug rendering stands in.
pub(crate) fn value_key(value: &Value) -> String {
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widening() {
        assert_eq!(i32::from_column_value(&Value::BigInt(Some(41))).unwrap(), 41);
        assert_eq!(i64::from_column_value(&Value::Int(Some(5))).unwrap(), 5);
        assert_eq!(i16::from_column_value(&Value::TinyInt(Some(2))).unwrap(), 2);
    }

    #[test]
    fn test_narrowing_overflow_rejected() {
        let err = i16::from_column_value(&Value::BigInt(Some(1 << 40))).unwrap_err();
        assert_eq!(err.expected, "i16");
    }

    #[test]
    fn test_option_null() {
        let v: Option<String> = Option::from_column_value(&Value::String(None)).unwrap();
        assert_eq!(v, None);
        let v: Option<String> =
            Option::from_column_value(&Value::String(Some("x".to_string()))).unwrap();
        assert_eq!(v, Some("x".to_string()));
    }

    #[test]
    fn test_type_mismatch() {
        let err = bool::from_column_value(&Value::String(Some("t".to_string()))).unwrap_err();
        assert_eq!(err.expected, "bool");
    }

    #[test]
    fn test_null_probe() {
        assert!(value_is_null(&Value::BigInt(None)));
        assert!(value_is_null(&Value::Uuid(None)));
        assert!(!value_is_null(&Value::BigInt(Some(0))));
    }
}
