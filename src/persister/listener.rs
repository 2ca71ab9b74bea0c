//! Lifecycle listeners.
//!
//! Listeners observe and participate in persister operations; relationship
//! cascades are built entirely out of them. Ordering is registration order,
//! a failing listener aborts the operation before any statement runs (for
//! `before_*`) or surfaces after the write (for `after_*`).

use crate::persister::PersistError;
use sea_query::Value;
use std::sync::{Arc, RwLock};

/// Observes inserts. `before` runs ahead of statement building so it may
/// still mutate the batch; `after` runs once generated keys are written back.
pub trait InsertListener<E>: Send + Sync {
    fn before_insert(&self, _entities: &mut [&mut E]) -> Result<(), PersistError> {
        Ok(())
    }

    fn after_insert(&self, _entities: &mut [&mut E]) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Observes updates. Each pair is `(before_image, current)`.
pub trait UpdateListener<E>: Send + Sync {
    fn before_update(&self, _pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        Ok(())
    }

    fn after_update(&self, _pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        Ok(())
    }

    /// Runs ahead of a by-identifier update, which carries no before
    /// images.
    fn before_update_by_id(&self, _ids: &[Value]) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Observes deletes.
pub trait DeleteListener<E>: Send + Sync {
    fn before_delete(&self, _entities: &[&E]) -> Result<(), PersistError> {
        Ok(())
    }

    fn after_delete(&self, _entities: &[&E]) -> Result<(), PersistError> {
        Ok(())
    }

    fn before_delete_by_id(&self, _ids: &[Value]) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Observes selects: the identifier set going in, the hydrated entities
/// coming out (relationship loading happens here).
pub trait SelectListener<E>: Send + Sync {
    fn before_select(&self, _ids: &[Value]) -> Result<(), PersistError> {
        Ok(())
    }

    fn after_select(&self, _entities: &mut [E]) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Registered listeners of one persister. Registration happens during
/// configuration, afterwards the lists are only read.
pub struct ListenerCollection<E> {
    insert: RwLock<Vec<Arc<dyn InsertListener<E>>>>,
    update: RwLock<Vec<Arc<dyn UpdateListener<E>>>>,
    delete: RwLock<Vec<Arc<dyn DeleteListener<E>>>>,
    select: RwLock<Vec<Arc<dyn SelectListener<E>>>>,
}

impl<E> Default for ListenerCollection<E> {
    fn default() -> Self {
        Self {
            insert: RwLock::new(Vec::new()),
            update: RwLock::new(Vec::new()),
            delete: RwLock::new(Vec::new()),
            select: RwLock::new(Vec::new()),
        }
    }
}

impl<E> ListenerCollection<E> {
    pub fn add_insert(&self, listener: Arc<dyn InsertListener<E>>) {
        self.insert
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn add_update(&self, listener: Arc<dyn UpdateListener<E>>) {
        self.update
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn add_delete(&self, listener: Arc<dyn DeleteListener<E>>) {
        self.delete
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn add_select(&self, listener: Arc<dyn SelectListener<E>>) {
        self.select
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    fn inserts(&self) -> Vec<Arc<dyn InsertListener<E>>> {
        self.insert.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn updates(&self) -> Vec<Arc<dyn UpdateListener<E>>> {
        self.update.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn deletes(&self) -> Vec<Arc<dyn DeleteListener<E>>> {
        self.delete.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn selects(&self) -> Vec<Arc<dyn SelectListener<E>>> {
        self.select.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn before_insert(&self, entities: &mut [&mut E]) -> Result<(), PersistError> {
        for listener in self.inserts() {
            listener.before_insert(entities)?;
        }
        Ok(())
    }

    pub(crate) fn after_insert(&self, entities: &mut [&mut E]) -> Result<(), PersistError> {
        for listener in self.inserts() {
            listener.after_insert(entities)?;
        }
        Ok(())
    }

    pub(crate) fn before_update(&self, pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        for listener in self.updates() {
            listener.before_update(pairs)?;
        }
        Ok(())
    }

    pub(crate) fn after_update(&self, pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        for listener in self.updates() {
            listener.after_update(pairs)?;
        }
        Ok(())
    }

    pub(crate) fn before_update_by_id(&self, ids: &[Value]) -> Result<(), PersistError> {
        for listener in self.updates() {
            listener.before_update_by_id(ids)?;
        }
        Ok(())
    }

    pub(crate) fn before_delete(&self, entities: &[&E]) -> Result<(), PersistError> {
        for listener in self.deletes() {
            listener.before_delete(entities)?;
        }
        Ok(())
    }

    pub(crate) fn after_delete(&self, entities: &[&E]) -> Result<(), PersistError> {
        for listener in self.deletes() {
            listener.after_delete(entities)?;
        }
        Ok(())
    }

    pub(crate) fn before_delete_by_id(&self, ids: &[Value]) -> Result<(), PersistError> {
        for listener in self.deletes() {
            listener.before_delete_by_id(ids)?;
        }
        Ok(())
    }

    pub(crate) fn before_select(&self, ids: &[Value]) -> Result<(), PersistError> {
        for listener in self.selects() {
            listener.before_select(ids)?;
        }
        Ok(())
    }

    pub(crate) fn after_select(&self, entities: &mut [E]) -> Result<(), PersistError> {
        for listener in self.selects() {
            listener.after_select(entities)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl InsertListener<String> for Counter {
        fn before_insert(&self, entities: &mut [&mut String]) -> Result<(), PersistError> {
            self.0.fetch_add(entities.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    struct Rejecting;

    impl InsertListener<String> for Rejecting {
        fn before_insert(&self, _entities: &mut [&mut String]) -> Result<(), PersistError> {
            Err(PersistError::MandatoryRelation {
                relation: "owner".to_string(),
            })
        }
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let listeners: ListenerCollection<String> = ListenerCollection::default();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        listeners.add_insert(counter.clone());

        let mut a = "a".to_string();
        let mut b = "b".to_string();
        listeners.before_insert(&mut [&mut a, &mut b]).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_listener_aborts() {
        let listeners: ListenerCollection<String> = ListenerCollection::default();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        listeners.add_insert(Arc::new(Rejecting));
        listeners.add_insert(counter.clone());

        let mut a = "a".to_string();
        let err = listeners.before_insert(&mut [&mut a]).unwrap_err();
        assert!(matches!(err, PersistError::MandatoryRelation { .. }));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
