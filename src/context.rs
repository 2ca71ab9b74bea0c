//! Registry of built persisters, keyed by entity type.
//!
//! Configuration code builds persisters and parks them here; application
//! code looks them up by type. The registry is filled during configuration
//! and read afterwards.

use crate::persister::{PersistError, Persister};
use crate::polymorphism::PolymorphicPersister;
use sea_query::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// The outermost persister of one entity type.
pub enum EntityPersister<E> {
    Plain(Arc<Persister<E>>),
    Polymorphic(Arc<PolymorphicPersister<E>>),
}

impl<E: 'static> EntityPersister<E> {
    pub fn insert(&self, entities: &mut [E]) -> Result<(), PersistError> {
        match self {
            EntityPersister::Plain(persister) => persister.insert(entities),
            EntityPersister::Polymorphic(persister) => persister.insert(entities),
        }
    }

    pub fn update(&self, pairs: &mut [(E, E)], all_columns: bool) -> Result<(), PersistError> {
        match self {
            EntityPersister::Plain(persister) => persister.update(pairs, all_columns),
            EntityPersister::Polymorphic(persister) => persister.update(pairs, all_columns),
        }
    }

    pub fn update_by_id(&self, entities: &[E]) -> Result<(), PersistError> {
        match self {
            EntityPersister::Plain(persister) => persister.update_by_id(entities),
            EntityPersister::Polymorphic(persister) => persister.update_by_id(entities),
        }
    }

    pub fn delete(&self, entities: &[E]) -> Result<(), PersistError> {
        match self {
            EntityPersister::Plain(persister) => persister.delete(entities),
            EntityPersister::Polymorphic(persister) => persister.delete(entities),
        }
    }

    pub fn delete_by_id(&self, ids: &[Value]) -> Result<u64, PersistError> {
        match self {
            EntityPersister::Plain(persister) => persister.delete_by_id(ids),
            EntityPersister::Polymorphic(persister) => persister.delete_by_id(ids),
        }
    }

    pub fn select(&self, ids: &[Value]) -> Result<Vec<E>, PersistError> {
        match self {
            EntityPersister::Plain(persister) => persister.select(ids),
            EntityPersister::Polymorphic(persister) => persister.select(ids),
        }
    }

    pub fn select_one(&self, id: &Value) -> Result<Option<E>, PersistError> {
        match self {
            EntityPersister::Plain(persister) => persister.select_one(id),
            EntityPersister::Polymorphic(persister) => persister.select_one(id),
        }
    }
}

/// Holds every registered [`EntityPersister`] for the life of the
/// application's persistence setup.
#[derive(Default)]
pub struct PersistenceContext {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: 'static>(&mut self, persister: EntityPersister<E>)
    where
        EntityPersister<E>: Send + Sync,
    {
        self.entries
            .insert(TypeId::of::<E>(), Box::new(Arc::new(persister)));
    }

    pub fn get<E: 'static>(&self) -> Option<Arc<EntityPersister<E>>> {
        self.entries
            .get(&TypeId::of::<E>())
            .and_then(|entry| entry.downcast_ref::<Arc<EntityPersister<E>>>())
            .cloned()
    }
}
