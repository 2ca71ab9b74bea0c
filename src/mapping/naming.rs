//! Column naming strategies.

use std::fmt;
use std::sync::Arc;

/// Derives a column name from a property name when no explicit column is
/// declared. A strategy set on a child configuration overrides the one
/// inherited from its parent.
#[derive(Clone, Default)]
pub enum ColumnNaming {
    /// Use the property name verbatim.
    #[default]
    PropertyName,
    /// Convert camelCase property names to snake_case.
    SnakeCase,
    /// Snake-case with a fixed prefix, e.g. `Prefixed("usr")` maps
    /// `firstName` to `usr_first_name`.
    Prefixed(String),
    /// Caller-supplied strategy.
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl ColumnNaming {
    /// Resolve a property name to a column name.
    pub fn resolve(&self, property: &str) -> String {
        match self {
            ColumnNaming::PropertyName => property.to_string(),
            ColumnNaming::SnakeCase => snake_case(property),
            ColumnNaming::Prefixed(prefix) => format!("{prefix}_{}", snake_case(property)),
            ColumnNaming::Custom(f) => f(property),
        }
    }
}

impl fmt::Debug for ColumnNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnNaming::PropertyName => write!(f, "PropertyName"),
            ColumnNaming::SnakeCase => write!(f, "SnakeCase"),
            ColumnNaming::Prefixed(prefix) => write!(f, "Prefixed({prefix})"),
            ColumnNaming::Custom(_) => write!(f, "Custom"),
        }
    }
}

fn snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for (i, c) in input.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
