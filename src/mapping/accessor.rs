//! Property accessors.
//!
//! The configuration model links properties to columns through closure
//! pairs instead of method-reference capture: a getter producing the
//! column-bound [`Value`] and a setter consuming one during hydration.

use crate::value::{FromColumnValue, ValueTypeError};
use sea_query::Value;
use std::fmt;
use std::sync::Arc;

pub(crate) type GetValueFn<E> = Arc<dyn Fn(&E) -> Value + Send + Sync>;
pub(crate) type SetValueFn<E> = Arc<dyn Fn(&mut E, &Value) -> Result<(), ValueTypeError> + Send + Sync>;

/// Named get/set pair for one property of `E`.
pub struct Accessor<E> {
    name: String,
    get: GetValueFn<E>,
    set: SetValueFn<E>,
}

impl<E> Accessor<E> {
    /// Build an accessor from raw value closures.
    pub fn new(
        name: impl Into<String>,
        get: impl Fn(&E) -> Value + Send + Sync + 'static,
        set: impl Fn(&mut E, &Value) -> Result<(), ValueTypeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            get: Arc::new(get),
            set: Arc::new(set),
        }
    }

    /// Build an accessor for a plain field, converting through the property's
    /// Rust type.
    ///
    /// # Example
    ///
    /// ```
    /// use tessera::mapping::Accessor;
    ///
    /// struct User { name: String }
    ///
    /// let accessor = Accessor::field(
    ///     "name",
    ///     |u: &User| u.name.clone(),
    ///     |u: &mut User, v| u.name = v,
    /// );
    /// assert_eq!(accessor.name(), "name");
    /// ```
    pub fn field<T>(
        name: impl Into<String>,
        getter: impl Fn(&E) -> T + Send + Sync + 'static,
        setter: impl Fn(&mut E, T) + Send + Sync + 'static,
    ) -> Self
    where
        T: Into<Value> + FromColumnValue,
    {
        Self {
            name: name.into(),
            get: Arc::new(move |e| getter(e).into()),
            set: Arc::new(move |e, value| {
                setter(e, T::from_column_value(value)?);
                Ok(())
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, entity: &E) -> Value {
        (self.get)(entity)
    }

    pub fn set(&self, entity: &mut E, value: &Value) -> Result<(), ValueTypeError> {
        (self.set)(entity, value)
    }

    pub(crate) fn get_fn(&self) -> GetValueFn<E> {
        Arc::clone(&self.get)
    }

    pub(crate) fn set_fn(&self) -> SetValueFn<E> {
        Arc::clone(&self.set)
    }
}

impl<E> Clone for Accessor<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

impl<E> fmt::Debug for Accessor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        label: String,
        count: i32,
    }

    #[test]
    fn test_field_round_trip() {
        let label = Accessor::field(
            "label",
            |i: &Item| i.label.clone(),
            |i: &mut Item, v| i.label = v,
        );
        let mut item = Item {
            label: "a".to_string(),
            count: 0,
        };
        assert_eq!(label.get(&item), Value::String(Some("a".to_string())));
        label
            .set(&mut item, &Value::String(Some("b".to_string())))
            .unwrap();
        assert_eq!(item.label, "b");
    }

    #[test]
    fn test_field_widens_integers() {
        let count = Accessor::field("count", |i: &Item| i.count, |i: &mut Item, v| i.count = v);
        let mut item = Item {
            label: String::new(),
            count: 0,
        };
        count.set(&mut item, &Value::BigInt(Some(9))).unwrap();
        assert_eq!(item.count, 9);
    }

    #[test]
    fn test_field_set_type_mismatch() {
        let count = Accessor::field("count", |i: &Item| i.count, |i: &mut Item, v| i.count = v);
        let mut item = Item {
            label: String::new(),
            count: 0,
        };
        let err = count
            .set(&mut item, &Value::String(Some("x".to_string())))
            .unwrap_err();
        assert_eq!(err.expected, "integer");
    }
}
