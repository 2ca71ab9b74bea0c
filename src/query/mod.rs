//! Read-side query building.

pub mod joined;

pub use joined::{JoinKind, JoinNode, JoinedQuery, ROOT_ALIAS};

use sea_query::Iden;

/// Runtime-named identifier for tables and columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlIden(pub String);

impl SqlIden {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Iden for SqlIden {
    fn unquoted(&self) -> &str {
        &self.0
    }
}
