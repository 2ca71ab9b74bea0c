//! One-to-many collections.
//!
//! Two storage strategies: a foreign key on the target table (mapped-by,
//! loaded through a join node) or an association table (loaded with a
//! record query plus a target select). Both support indexed collections;
//! the position lands in a dedicated column and rewrites on reorder.

use crate::config::EngineConfig;
use crate::mapping::{MappingError, ResolvedEntityMapping, SilentColumn};
use crate::persister::{
    DeleteListener, InsertListener, PersistError, Persister, SelectListener, UpdateListener,
};
use crate::query::{JoinKind, JoinNode};
use crate::relation::association::{AssociationPersister, AssociationRecord, AssociationTable};
use crate::relation::{ItemsFn, ItemsMutFn, RelationMode};
use crate::schema::{ColumnType, ForeignKey, TableError};
use crate::value::{null_of, value_key};
use sea_query::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Configures a one-to-many relationship between two built persisters.
pub struct OneToManyBuilder<E, T> {
    name: String,
    source: Arc<Persister<E>>,
    target: Arc<Persister<T>>,
    items: ItemsFn<E, T>,
    items_mut: ItemsMutFn<E, T>,
    mode: RelationMode,
}

impl<E: 'static, T: 'static> OneToManyBuilder<E, T> {
    pub fn new(
        name: impl Into<String>,
        source: Arc<Persister<E>>,
        target: Arc<Persister<T>>,
        items: impl for<'a> Fn(&'a E) -> &'a [T] + Send + Sync + 'static,
        items_mut: impl for<'a> Fn(&'a mut E) -> &'a mut Vec<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            items: Arc::new(items),
            items_mut: Arc::new(items_mut),
            mode: RelationMode::All,
        }
    }

    pub fn mode(mut self, mode: RelationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Finish setup with the foreign key on the target table.
    pub fn mapped_by(self, column: impl Into<String>) -> Result<(), MappingError> {
        self.mapped(column.into(), None)
    }

    /// Mapped-by with a position column on the target table; load order and
    /// rewrites follow the collection order.
    pub fn mapped_by_indexed(
        self,
        column: impl Into<String>,
        index_column: impl Into<String>,
    ) -> Result<(), MappingError> {
        self.mapped(column.into(), Some(index_column.into()))
    }

    fn mapped(self, column: String, index: Option<String>) -> Result<(), MappingError> {
        let source_mapping = Arc::clone(self.source.mapping());
        let target_mapping = Arc::clone(self.target.mapping());
        let owner_ty = source_mapping.identifier().column_type();

        if self.mode.writes_links() {
            target_mapping.add_column_if_absent(&column, owner_ty, true)?;
            target_mapping.add_foreign_key(ForeignKey {
                name: format!("fk_{}_{column}", target_mapping.table_name()),
                columns: vec![column.clone()],
                referenced_table: source_mapping.table_name().to_string(),
                referenced_columns: vec![source_mapping.id_column().to_string()],
            })?;
            if let Some(index_column) = &index {
                target_mapping.add_column_if_absent(index_column, ColumnType::Integer, true)?;
            }
        } else {
            if target_mapping.table().column(&column).is_none() {
                return Err(MappingError::Table(TableError::UnknownColumn {
                    table: target_mapping.table_name().to_string(),
                    column,
                }));
            }
            if let Some(index_column) = &index {
                if target_mapping.table().column(index_column).is_none() {
                    return Err(MappingError::MissingIndexColumn {
                        relation: self.name.clone(),
                        column: index_column.clone(),
                    });
                }
            }
        }

        let mut columns = vec![target_mapping.id_column().to_string()];
        columns.extend(
            target_mapping
                .properties()
                .iter()
                .map(|p| p.column().to_string()),
        );
        let tm = Arc::clone(&target_mapping);
        let items_mut = Arc::clone(&self.items_mut);
        let mut node = JoinNode::new(
            self.name.clone(),
            target_mapping.table_name(),
            source_mapping.id_column(),
            column.clone(),
            JoinKind::LeftOuter,
            columns,
            target_mapping.id_column().to_string(),
            move |entity, row, prefix| {
                let related = tm.hydrate(row, prefix)?;
                items_mut(entity).push(related);
                Ok(())
            },
        );
        if let Some(index_column) = &index {
            node = node.ordered_by(index_column.clone());
        }
        self.source.joined().register(node);

        if self.mode.writes_links() {
            let cascade = Arc::new(MappedManyCascade {
                column,
                index,
                source_mapping,
                target: Arc::clone(&self.target),
                items: Arc::clone(&self.items),
                items_mut: Arc::clone(&self.items_mut),
                mode: self.mode,
                null: null_of(owner_ty),
            });
            self.source.listeners().add_insert(cascade.clone());
            self.source.listeners().add_update(cascade.clone());
            self.source.listeners().add_delete(cascade);
        }
        Ok(())
    }

    /// Finish setup through an association table. Returns the record
    /// persister so callers can reach the table schema for DDL.
    pub fn through(
        self,
        layout: AssociationTable,
        engine: &EngineConfig,
    ) -> Result<Arc<AssociationPersister>, MappingError>
    where
        T: Clone,
    {
        let source_mapping = Arc::clone(self.source.mapping());
        let target_mapping = Arc::clone(self.target.mapping());
        let indexed = layout.is_indexed();
        let assoc = Arc::new(AssociationPersister::new(
            layout,
            source_mapping.identifier().column_type(),
            target_mapping.identifier().column_type(),
            Arc::clone(self.source.provider()),
            engine,
        )?);

        let cascade = Arc::new(AssociationCascade {
            assoc: Arc::clone(&assoc),
            source_mapping,
            target: Arc::clone(&self.target),
            items: Arc::clone(&self.items),
            items_mut: Arc::clone(&self.items_mut),
            mode: self.mode,
            indexed,
        });
        if self.mode.writes_links() {
            self.source.listeners().add_insert(cascade.clone());
            self.source.listeners().add_update(cascade.clone());
            self.source.listeners().add_delete(cascade.clone());
        }
        self.source.listeners().add_select(cascade);
        Ok(assoc)
    }
}

/// Cascade for collections whose foreign key sits on the target table. The
/// owner's key (and the position, when indexed) travels as a per-call
/// overlay column on the child insert.
struct MappedManyCascade<E, T> {
    column: String,
    index: Option<String>,
    source_mapping: Arc<ResolvedEntityMapping<E>>,
    target: Arc<Persister<T>>,
    items: ItemsFn<E, T>,
    items_mut: ItemsMutFn<E, T>,
    mode: RelationMode,
    null: Value,
}

impl<E: 'static, T: 'static> MappedManyCascade<E, T> {
    fn attach_one(&self, owner_id: &Value, child: &mut T, position: i64) -> Result<(), PersistError> {
        if !self.target.mapping().is_persisted(child) {
            if !self.mode.cascades_lifecycle() {
                return Ok(());
            }
            let mut overlay = vec![SilentColumn::constant(self.column.clone(), owner_id.clone())];
            if let Some(index_column) = &self.index {
                overlay.push(SilentColumn::constant(
                    index_column.clone(),
                    Value::Int(Some(position as i32)),
                ));
            }
            return self.target.insert_with(&mut [child], &overlay);
        }
        let child_id = self.target.mapping().identifier().bind_value(child)?;
        let mut sets = vec![(self.column.clone(), owner_id.clone())];
        if let Some(index_column) = &self.index {
            sets.push((index_column.clone(), Value::Int(Some(position as i32))));
        }
        self.target.update_columns_by_id(&child_id, &sets)?;
        Ok(())
    }

    fn detach(&self, child_id: &Value) -> Result<(), PersistError> {
        if self.mode.removes_orphans() {
            self.target.delete_by_id(std::slice::from_ref(child_id))?;
            return Ok(());
        }
        let mut sets = vec![(self.column.clone(), self.null.clone())];
        if let Some(index_column) = &self.index {
            sets.push((index_column.clone(), Value::Int(None)));
        }
        self.target.update_columns_by_id(child_id, &sets)?;
        Ok(())
    }
}

impl<E: 'static, T: 'static> InsertListener<E> for MappedManyCascade<E, T> {
    fn after_insert(&self, entities: &mut [&mut E]) -> Result<(), PersistError> {
        for entity in entities.iter_mut() {
            let owner_id = self.source_mapping.identifier().bind_value(entity)?;
            let children = (self.items_mut)(entity);
            for (position, child) in children.iter_mut().enumerate() {
                self.attach_one(&owner_id, child, position as i64)?;
            }
        }
        Ok(())
    }
}

impl<E: 'static, T: 'static> UpdateListener<E> for MappedManyCascade<E, T> {
    fn after_update(&self, pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        for pair in pairs.iter_mut() {
            let owner_id = self.source_mapping.identifier().bind_value(&pair.1)?;

            let mut old_positions: HashMap<String, i64> = HashMap::new();
            let mut old_ids: Vec<Value> = Vec::new();
            for (position, child) in (self.items)(&pair.0).iter().enumerate() {
                if self.target.mapping().is_persisted(child) {
                    let id = self.target.mapping().identifier().bind_value(child)?;
                    old_positions.insert(value_key(&id), position as i64);
                    old_ids.push(id);
                }
            }

            let mut kept: HashSet<String> = HashSet::new();
            let children = (self.items_mut)(&mut pair.1);
            for (position, child) in children.iter_mut().enumerate() {
                let was_persisted = self.target.mapping().is_persisted(child);
                if was_persisted {
                    let id = self.target.mapping().identifier().bind_value(child)?;
                    let key = value_key(&id);
                    if let Some(old_position) = old_positions.get(&key) {
                        kept.insert(key);
                        // Retained: rewrite only when an indexed child moved.
                        if self.index.is_none() || *old_position == position as i64 {
                            continue;
                        }
                    } else {
                        kept.insert(key);
                    }
                }
                self.attach_one(&owner_id, child, position as i64)?;
            }

            for id in &old_ids {
                if !kept.contains(&value_key(id)) {
                    self.detach(id)?;
                }
            }
        }
        Ok(())
    }
}

impl<E: 'static, T: 'static> DeleteListener<E> for MappedManyCascade<E, T> {
    fn before_delete(&self, entities: &[&E]) -> Result<(), PersistError> {
        let owner_ids = entities
            .iter()
            .map(|entity| self.source_mapping.identifier().bind_value(entity))
            .collect::<Result<Vec<_>, _>>()?;
        if self.mode.removes_orphans() {
            self.target.delete_where(&self.column, &owner_ids)?;
            return Ok(());
        }
        let mut sets = vec![(self.column.clone(), self.null.clone())];
        if let Some(index_column) = &self.index {
            sets.push((index_column.clone(), Value::Int(None)));
        }
        self.target
            .update_columns_where(&self.column, &owner_ids, &sets)?;
        Ok(())
    }
}

/// Cascade and loader for association-table collections.
struct AssociationCascade<E, T> {
    assoc: Arc<AssociationPersister>,
    source_mapping: Arc<ResolvedEntityMapping<E>>,
    target: Arc<Persister<T>>,
    items: ItemsFn<E, T>,
    items_mut: ItemsMutFn<E, T>,
    mode: RelationMode,
    indexed: bool,
}

impl<E: 'static, T: 'static> AssociationCascade<E, T> {
    fn record(&self, owner_id: &Value, child: &T, position: i64) -> Result<AssociationRecord, PersistError> {
        Ok(AssociationRecord {
            owner: owner_id.clone(),
            target: self.target.mapping().identifier().bind_value(child)?,
            index: self.indexed.then_some(position),
        })
    }

    fn insert_unpersisted(&self, children: &mut Vec<T>) -> Result<(), PersistError> {
        if !self.mode.cascades_lifecycle() {
            return Ok(());
        }
        let mut unpersisted: Vec<&mut T> = children
            .iter_mut()
            .filter(|child| !self.target.mapping().is_persisted(child))
            .collect();
        self.target.insert_refs(&mut unpersisted)
    }
}

impl<E: 'static, T: 'static> InsertListener<E> for AssociationCascade<E, T> {
    fn after_insert(&self, entities: &mut [&mut E]) -> Result<(), PersistError> {
        for entity in entities.iter_mut() {
            let owner_id = self.source_mapping.identifier().bind_value(entity)?;
            let children = (self.items_mut)(entity);
            self.insert_unpersisted(&mut *children)?;
            let mut records = Vec::with_capacity(children.len());
            for (position, child) in children.iter().enumerate() {
                records.push(self.record(&owner_id, child, position as i64)?);
            }
            self.assoc.insert(&records)?;
        }
        Ok(())
    }
}

impl<E: 'static, T: 'static> UpdateListener<E> for AssociationCascade<E, T> {
    /// Ends with every surviving record holding its collection position:
    /// records already at their position are left untouched rather than
    /// rewritten, the stored state comes out the same either way.
    fn after_update(&self, pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        for pair in pairs.iter_mut() {
            let owner_id = self.source_mapping.identifier().bind_value(&pair.1)?;

            let mut old_positions: HashMap<String, (Value, i64)> = HashMap::new();
            for (position, child) in (self.items)(&pair.0).iter().enumerate() {
                if self.target.mapping().is_persisted(child) {
                    let id = self.target.mapping().identifier().bind_value(child)?;
                    old_positions.insert(value_key(&id), (id, position as i64));
                }
            }

            let children = (self.items_mut)(&mut pair.1);
            self.insert_unpersisted(&mut *children)?;

            let mut kept: HashSet<String> = HashSet::new();
            let mut added: Vec<AssociationRecord> = Vec::new();
            for (position, child) in children.iter().enumerate() {
                let id = self.target.mapping().identifier().bind_value(child)?;
                let key = value_key(&id);
                match old_positions.get(&key) {
                    None => added.push(self.record(&owner_id, child, position as i64)?),
                    Some((_, old_position)) => {
                        kept.insert(key);
                        if self.indexed && *old_position != position as i64 {
                            self.assoc.update_index(&owner_id, &id, position as i64)?;
                        }
                    }
                }
            }
            self.assoc.insert(&added)?;

            for (key, (id, _)) in &old_positions {
                if !kept.contains(key) {
                    self.assoc.delete_pair(&owner_id, id)?;
                    if self.mode.removes_orphans() {
                        self.target.delete_by_id(std::slice::from_ref(id))?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<E: 'static, T: 'static> DeleteListener<E> for AssociationCascade<E, T> {
    fn before_delete(&self, entities: &[&E]) -> Result<(), PersistError> {
        let owner_ids = entities
            .iter()
            .map(|entity| self.source_mapping.identifier().bind_value(entity))
            .collect::<Result<Vec<_>, _>>()?;
        self.assoc.delete_by_owners(&owner_ids)?;
        Ok(())
    }

    fn after_delete(&self, entities: &[&E]) -> Result<(), PersistError> {
        if !self.mode.removes_orphans() {
            return Ok(());
        }
        let mut orphaned = Vec::new();
        for entity in entities {
            for child in (self.items)(entity) {
                orphaned.push(self.target.mapping().identifier().bind_value(child)?);
            }
        }
        self.target.delete_by_id(&orphaned)?;
        Ok(())
    }
}

impl<E: 'static, T: Clone + 'static> SelectListener<E> for AssociationCascade<E, T> {
    fn after_select(&self, entities: &mut [E]) -> Result<(), PersistError> {
        if entities.is_empty() {
            return Ok(());
        }
        let owner_ids = entities
            .iter()
            .map(|entity| self.source_mapping.identifier().bind_value(entity))
            .collect::<Result<Vec<_>, _>>()?;
        let records = self.assoc.select_by_owners(&owner_ids)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut target_ids: Vec<Value> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for record in &records {
            if seen.insert(value_key(&record.target)) {
                target_ids.push(record.target.clone());
            }
        }
        let loaded = self.target.select(&target_ids)?;
        let mut by_key: HashMap<String, T> = HashMap::new();
        for child in loaded {
            by_key.insert(value_key(&self.target.mapping().id_value(&child)), child);
        }

        let mut per_owner: HashMap<String, Vec<&AssociationRecord>> = HashMap::new();
        for record in &records {
            per_owner
                .entry(value_key(&record.owner))
                .or_default()
                .push(record);
        }

        for entity in entities.iter_mut() {
            let owner_key = value_key(&self.source_mapping.id_value(entity));
            let children = (self.items_mut)(entity);
            children.clear();
            if let Some(owner_records) = per_owner.get(&owner_key) {
                for record in owner_records {
                    if let Some(child) = by_key.get(&value_key(&record.target)) {
                        children.push(child.clone());
                    }
                }
            }
        }
        Ok(())
    }
}
