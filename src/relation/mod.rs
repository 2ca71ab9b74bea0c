//! Relationships between persisted entity types.
//!
//! Relationship setup attaches silent foreign-key columns, join nodes and
//! cascade listeners to already built persisters; the persisters themselves
//! stay relationship-agnostic. Setup happens during configuration, before
//! the first operation runs.

pub mod association;
pub mod one_to_many;
pub mod one_to_one;

pub use association::{AssociationPersister, AssociationRecord, AssociationTable};
pub use one_to_many::OneToManyBuilder;
pub use one_to_one::OneToOneBuilder;

use std::sync::Arc;

/// How far writes propagate across a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationMode {
    /// Full lifecycle cascade: related instances are inserted with their
    /// owner and deleted with it.
    All,
    /// [`All`](RelationMode::All), plus instances removed from the
    /// relationship are deleted instead of detached.
    AllOrphanRemoval,
    /// Only the link (foreign key or association record) is maintained;
    /// related instances are never inserted or deleted by the cascade.
    Association,
    /// Loaded on select, never written.
    ReadOnly,
}

impl RelationMode {
    pub(crate) fn cascades_lifecycle(self) -> bool {
        matches!(self, RelationMode::All | RelationMode::AllOrphanRemoval)
    }

    pub(crate) fn removes_orphans(self) -> bool {
        matches!(self, RelationMode::AllOrphanRemoval)
    }

    pub(crate) fn writes_links(self) -> bool {
        !matches!(self, RelationMode::ReadOnly)
    }
}

/// Projection of an optional related instance.
pub type ProjectOptionFn<E, T> = Arc<dyn for<'a> Fn(&'a E) -> Option<&'a T> + Send + Sync>;
/// Mutable projection of an optional related instance.
pub type ProjectOptionMutFn<E, T> =
    Arc<dyn for<'a> Fn(&'a mut E) -> Option<&'a mut T> + Send + Sync>;
/// Stores a loaded related instance on its owner.
pub type SetRelatedFn<E, T> = Arc<dyn Fn(&mut E, T) + Send + Sync>;
/// Projection of a related collection.
pub type ItemsFn<E, T> = Arc<dyn for<'a> Fn(&'a E) -> &'a [T] + Send + Sync>;
/// Mutable projection of a related collection.
pub type ItemsMutFn<E, T> = Arc<dyn for<'a> Fn(&'a mut E) -> &'a mut Vec<T> + Send + Sync>;
