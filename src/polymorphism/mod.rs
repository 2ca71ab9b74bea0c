//! Inheritance-to-table strategies.
//!
//! A [`PolymorphicPersister`] fronts a finite set of subtype persisters and
//! routes every write to the subtype whose `matches` predicate claims the
//! instance. The storage layout behind the routing is one of three closed
//! strategies: a shared table with a discriminator column, per-subtype
//! tables joined to a parent table, or fully independent per-subtype
//! tables. Reads first work out which subtype owns each requested
//! identifier, then delegate hydration to that subtype's persister.

pub mod joined_tables;
pub mod single_table;
pub mod table_per_class;

pub use joined_tables::JoinedTablesBuilder;
pub use single_table::SingleTableBuilder;
pub use table_per_class::TablePerClassBuilder;

use crate::executor::{query_on, ConnectionProvider};
use crate::mapping::HydrateError;
use crate::persister::{PersistError, Persister};
use crate::query::{SqlIden, ROOT_ALIAS};
use crate::schema::Table;
use crate::value::{value_is_null, value_key, FromColumnValue};
use sea_query::{
    Alias, Expr, ExprTrait, Order, PostgresQueryBuilder, Query, SelectStatement, UnionType, Value,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One concrete subtype: its discriminator name, the predicate claiming
/// instances of it and the persister writing its rows.
pub struct Subtype<E> {
    name: String,
    matches: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    persister: Arc<Persister<E>>,
}

impl<E> Subtype<E> {
    pub fn new(
        name: impl Into<String>,
        matches: impl Fn(&E) -> bool + Send + Sync + 'static,
        persister: Arc<Persister<E>>,
    ) -> Self {
        Self {
            name: name.into(),
            matches: Arc::new(matches),
            persister,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn persister(&self) -> &Arc<Persister<E>> {
        &self.persister
    }
}

impl<E> fmt::Debug for Subtype<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subtype").field("name", &self.name).finish()
    }
}

pub(crate) enum Strategy<E> {
    SingleTable {
        table: String,
        id_column: String,
        discriminator: String,
        schema: Table,
        provider: Arc<dyn ConnectionProvider>,
    },
    JoinedTables {
        parent: Arc<Persister<E>>,
    },
    TablePerClass {
        provider: Arc<dyn ConnectionProvider>,
    },
}

/// A persister over one polymorphic entity type, delegating to the subtype
/// persisters a strategy builder assembled.
pub struct PolymorphicPersister<E> {
    entity: String,
    subtypes: Vec<Subtype<E>>,
    strategy: Strategy<E>,
}

impl<E: 'static> PolymorphicPersister<E> {
    pub(crate) fn new(entity: String, subtypes: Vec<Subtype<E>>, strategy: Strategy<E>) -> Self {
        Self {
            entity,
            subtypes,
            strategy,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn subtypes(&self) -> &[Subtype<E>] {
        &self.subtypes
    }

    /// The accumulated shared table, single-table strategy only.
    pub fn shared_table(&self) -> Option<&Table> {
        match &self.strategy {
            Strategy::SingleTable { schema, .. } => Some(schema),
            _ => None,
        }
    }

    /// The parent-table persister, joined-tables strategy only.
    pub fn parent(&self) -> Option<&Arc<Persister<E>>> {
        match &self.strategy {
            Strategy::JoinedTables { parent } => Some(parent),
            _ => None,
        }
    }

    fn no_match(&self) -> PersistError {
        PersistError::NoSubtypeMatch {
            entity: self.entity.clone(),
        }
    }

    fn group_mut<'a>(&self, entities: &'a mut [E]) -> Result<Vec<Vec<&'a mut E>>, PersistError> {
        let mut groups: Vec<Vec<&'a mut E>> = self.subtypes.iter().map(|_| Vec::new()).collect();
        'entities: for entity in entities.iter_mut() {
            for (index, subtype) in self.subtypes.iter().enumerate() {
                if (subtype.matches)(entity) {
                    groups[index].push(entity);
                    continue 'entities;
                }
            }
            return Err(self.no_match());
        }
        Ok(groups)
    }

    fn group_pairs<'a>(
        &self,
        pairs: &'a mut [(E, E)],
    ) -> Result<Vec<Vec<&'a mut (E, E)>>, PersistError> {
        let mut groups: Vec<Vec<&'a mut (E, E)>> =
            self.subtypes.iter().map(|_| Vec::new()).collect();
        'pairs: for pair in pairs.iter_mut() {
            for (index, subtype) in self.subtypes.iter().enumerate() {
                if (subtype.matches)(&pair.1) {
                    groups[index].push(pair);
                    continue 'pairs;
                }
            }
            return Err(self.no_match());
        }
        Ok(groups)
    }

    fn group_refs<'a>(&self, entities: &'a [E]) -> Result<Vec<Vec<&'a E>>, PersistError> {
        let mut groups: Vec<Vec<&'a E>> = self.subtypes.iter().map(|_| Vec::new()).collect();
        'entities: for entity in entities {
            for (index, subtype) in self.subtypes.iter().enumerate() {
                if (subtype.matches)(entity) {
                    groups[index].push(entity);
                    continue 'entities;
                }
            }
            return Err(self.no_match());
        }
        Ok(groups)
    }

    pub fn insert(&self, entities: &mut [E]) -> Result<(), PersistError> {
        let mut groups = self.group_mut(entities)?;
        for (subtype, group) in self.subtypes.iter().zip(groups.iter_mut()) {
            if let Strategy::JoinedTables { parent } = &self.strategy {
                // The parent row first, so the subtype row's key reference
                // holds and generated identifiers are assigned.
                parent.insert_refs(group)?;
            }
            subtype.persister.insert_refs(group)?;
        }
        Ok(())
    }

    pub fn update(&self, pairs: &mut [(E, E)], all_columns: bool) -> Result<(), PersistError> {
        let mut groups = self.group_pairs(pairs)?;
        for (subtype, group) in self.subtypes.iter().zip(groups.iter_mut()) {
            if let Strategy::JoinedTables { parent } = &self.strategy {
                parent.update_refs(group, all_columns)?;
            }
            subtype.persister.update_refs(group, all_columns)?;
        }
        Ok(())
    }

    pub fn delete(&self, entities: &[E]) -> Result<(), PersistError> {
        let groups = self.group_refs(entities)?;
        for (subtype, group) in self.subtypes.iter().zip(groups.iter()) {
            subtype.persister.delete_refs(group)?;
            if let Strategy::JoinedTables { parent } = &self.strategy {
                // Subtype row first; the parent row carries the referenced key.
                parent.delete_refs(group)?;
            }
        }
        Ok(())
    }

    /// Full-row rewrite by identifier, routed by the subtype predicates.
    pub fn update_by_id(&self, entities: &[E]) -> Result<(), PersistError> {
        let groups = self.group_refs(entities)?;
        for (subtype, group) in self.subtypes.iter().zip(groups.iter()) {
            if let Strategy::JoinedTables { parent } = &self.strategy {
                parent.update_by_id_refs(group)?;
            }
            subtype.persister.update_by_id_refs(group)?;
        }
        Ok(())
    }

    /// Delete rows by identifier. The table owning each id is worked out
    /// with the same probes the selects use.
    pub fn delete_by_id(&self, ids: &[Value]) -> Result<u64, PersistError> {
        if ids.is_empty() {
            return Ok(0);
        }
        match &self.strategy {
            Strategy::SingleTable {
                table,
                id_column,
                discriminator,
                provider,
                ..
            } => {
                let groups = self.probe_single_table(
                    table,
                    id_column,
                    discriminator,
                    provider.as_ref(),
                    ids,
                )?;
                let mut affected = 0;
                for (subtype, group) in self.subtypes.iter().zip(groups.iter()) {
                    affected += subtype.persister.delete_by_id(group)?;
                }
                Ok(affected)
            }
            Strategy::JoinedTables { parent } => {
                let groups = self.probe_tables(parent.provider().as_ref(), ids)?;
                let mut found = Vec::new();
                for (subtype, group) in self.subtypes.iter().zip(groups.iter()) {
                    subtype.persister.delete_by_id(group)?;
                    found.extend(group.iter().cloned());
                }
                parent.delete_by_id(&found)
            }
            Strategy::TablePerClass { provider } => {
                let groups = self.probe_tables(provider.as_ref(), ids)?;
                let mut affected = 0;
                for (subtype, group) in self.subtypes.iter().zip(groups.iter()) {
                    affected += subtype.persister.delete_by_id(group)?;
                }
                Ok(affected)
            }
        }
    }

    pub fn select(&self, ids: &[Value]) -> Result<Vec<E>, PersistError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        match &self.strategy {
            Strategy::SingleTable {
                table,
                id_column,
                discriminator,
                provider,
                ..
            } => self.select_single_table(table, id_column, discriminator, provider.as_ref(), ids),
            Strategy::JoinedTables { parent } => self.select_joined(parent, ids),
            Strategy::TablePerClass { provider } => {
                self.select_per_class(provider.as_ref(), ids)
            }
        }
    }

    pub fn select_one(&self, id: &Value) -> Result<Option<E>, PersistError> {
        Ok(self.select(std::slice::from_ref(id))?.into_iter().next())
    }

    /// Shared table: probe (identifier, discriminator) pairs, then let each
    /// subtype persister hydrate its own rows.
    fn select_single_table(
        &self,
        table: &str,
        id_column: &str,
        discriminator: &str,
        provider: &dyn ConnectionProvider,
        ids: &[Value],
    ) -> Result<Vec<E>, PersistError> {
        let groups = self.probe_single_table(table, id_column, discriminator, provider, ids)?;
        let mut entities = Vec::new();
        for (subtype, subtype_ids) in self.subtypes.iter().zip(groups.iter()) {
            if !subtype_ids.is_empty() {
                entities.extend(subtype.persister.select(subtype_ids)?);
            }
        }
        Ok(entities)
    }

    /// Read (identifier, discriminator) pairs from the shared table and
    /// group the identifiers per declared subtype. An undeclared
    /// discriminator value is an error.
    fn probe_single_table(
        &self,
        table: &str,
        id_column: &str,
        discriminator: &str,
        provider: &dyn ConnectionProvider,
        ids: &[Value],
    ) -> Result<Vec<Vec<Value>>, PersistError> {
        let mut stmt = Query::select();
        stmt.from(SqlIden::new(table));
        stmt.column(SqlIden::new(id_column));
        stmt.column(SqlIden::new(discriminator));
        stmt.and_where(Expr::col(SqlIden::new(id_column)).is_in(ids.iter().cloned()));
        stmt.order_by(SqlIden::new(id_column), Order::Asc);
        let (sql, values) = stmt.build(PostgresQueryBuilder);
        let rows = query_on(provider, &sql, &values)?;

        let index_of: HashMap<&str, usize> = self
            .subtypes
            .iter()
            .enumerate()
            .map(|(index, subtype)| (subtype.name(), index))
            .collect();
        let mut groups: Vec<Vec<Value>> = self.subtypes.iter().map(|_| Vec::new()).collect();
        for row in rows {
            let id = row
                .get(id_column)
                .cloned()
                .ok_or_else(|| missing(id_column))?;
            let name = row
                .get(discriminator)
                .ok_or_else(|| missing(discriminator))
                .and_then(|value| {
                    String::from_column_value(value).map_err(|source| {
                        PersistError::Hydration(HydrateError::Value {
                            property: discriminator.to_string(),
                            source,
                        })
                    })
                })?;
            let index = *index_of.get(name.as_str()).ok_or_else(|| self.no_match())?;
            groups[index].push(id);
        }
        Ok(groups)
    }

    /// Joined tables: one SELECT over the parent table left-joined to every
    /// subtype table; each row belongs to the subtype whose key column came
    /// back non-null.
    fn select_joined(&self, parent: &Arc<Persister<E>>, ids: &[Value]) -> Result<Vec<E>, PersistError> {
        let parent_mapping = parent.mapping();
        let root = parent_mapping.table_name();
        let id_column = parent_mapping.id_column();

        let mut query = Query::select();
        query.from(SqlIden::new(root));
        query.expr_as(
            Expr::col((SqlIden::new(root), SqlIden::new(id_column))),
            Alias::new(format!("{ROOT_ALIAS}_{id_column}")),
        );
        for property in parent_mapping.properties() {
            query.expr_as(
                Expr::col((SqlIden::new(root), SqlIden::new(property.column()))),
                Alias::new(format!("{ROOT_ALIAS}_{}", property.column())),
            );
        }
        for subtype in &self.subtypes {
            let mapping = subtype.persister.mapping();
            let table = mapping.table_name();
            query.expr_as(
                Expr::col((SqlIden::new(table), SqlIden::new(mapping.id_column()))),
                Alias::new(format!("{}_{}", subtype.name(), mapping.id_column())),
            );
            for property in mapping.properties() {
                query.expr_as(
                    Expr::col((SqlIden::new(table), SqlIden::new(property.column()))),
                    Alias::new(format!("{}_{}", subtype.name(), property.column())),
                );
            }
            query.join(
                sea_query::JoinType::LeftJoin,
                SqlIden::new(table),
                Expr::col((SqlIden::new(root), SqlIden::new(id_column))).eq(Expr::col((
                    SqlIden::new(table),
                    SqlIden::new(mapping.id_column()),
                ))),
            );
        }
        query.and_where(
            Expr::col((SqlIden::new(root), SqlIden::new(id_column))).is_in(ids.iter().cloned()),
        );
        query.order_by((SqlIden::new(root), SqlIden::new(id_column)), Order::Asc);
        let (sql, values) = query.build(PostgresQueryBuilder);
        let rows = query_on(parent.provider().as_ref(), &sql, &values)?;

        let mut entities = Vec::new();
        'rows: for row in rows {
            for subtype in &self.subtypes {
                let mapping = subtype.persister.mapping();
                let key_alias = format!("{}_{}", subtype.name(), mapping.id_column());
                let claimed = row
                    .get(&key_alias)
                    .is_some_and(|value| !value_is_null(value));
                if claimed {
                    let mut entity = mapping.hydrate(&row, subtype.name())?;
                    parent_mapping.populate(&mut entity, &row, ROOT_ALIAS)?;
                    entities.push(entity);
                    continue 'rows;
                }
            }
            return Err(self.no_match());
        }
        Ok(entities)
    }

    /// Table per class: the union probe tells which table owns each id;
    /// hydration is then delegated per subtype.
    fn select_per_class(
        &self,
        provider: &dyn ConnectionProvider,
        ids: &[Value],
    ) -> Result<Vec<E>, PersistError> {
        let groups = self.probe_tables(provider, ids)?;
        let mut entities = Vec::new();
        for (subtype, subtype_ids) in self.subtypes.iter().zip(groups.iter()) {
            if !subtype_ids.is_empty() {
                entities.extend(subtype.persister.select(subtype_ids)?);
            }
        }
        Ok(entities)
    }

    /// A UNION of one (discriminator literal, identifier) probe per subtype
    /// table, grouping the found identifiers per owning subtype. An id
    /// present in several tables counts once, first declared subtype wins.
    fn probe_tables(
        &self,
        provider: &dyn ConnectionProvider,
        ids: &[Value],
    ) -> Result<Vec<Vec<Value>>, PersistError> {
        let mut union: Option<SelectStatement> = None;
        for subtype in &self.subtypes {
            let mapping = subtype.persister.mapping();
            let mut probe = Query::select();
            probe.from(SqlIden::new(mapping.table_name()));
            probe.expr_as(Expr::value(subtype.name().to_string()), Alias::new("subtype"));
            probe.expr_as(Expr::col(SqlIden::new(mapping.id_column())), Alias::new("id"));
            probe.and_where(Expr::col(SqlIden::new(mapping.id_column())).is_in(ids.iter().cloned()));
            match union.as_mut() {
                None => union = Some(probe),
                Some(stmt) => {
                    stmt.union(UnionType::Distinct, probe);
                }
            }
        }
        let Some(stmt) = union else {
            return Ok(Vec::new());
        };
        let (sql, values) = stmt.build(PostgresQueryBuilder);
        let rows = query_on(provider, &sql, &values)?;

        let index_of: HashMap<&str, usize> = self
            .subtypes
            .iter()
            .enumerate()
            .map(|(index, subtype)| (subtype.name(), index))
            .collect();
        let mut owner_of: HashMap<String, (usize, Value)> = HashMap::new();
        for row in rows {
            let id = row.get("id").cloned().ok_or_else(|| missing("id"))?;
            let name = row
                .get("subtype")
                .ok_or_else(|| missing("subtype"))
                .and_then(|value| {
                    String::from_column_value(value).map_err(|source| {
                        PersistError::Hydration(HydrateError::Value {
                            property: "subtype".to_string(),
                            source,
                        })
                    })
                })?;
            let index = *index_of.get(name.as_str()).ok_or_else(|| self.no_match())?;
            let key = value_key(&id);
            match owner_of.get(&key) {
                Some((existing, _)) if *existing <= index => {}
                _ => {
                    owner_of.insert(key, (index, id));
                }
            }
        }

        let mut groups: Vec<Vec<Value>> = self.subtypes.iter().map(|_| Vec::new()).collect();
        for (index, id) in owner_of.into_values() {
            groups[index].push(id);
        }
        Ok(groups)
    }
}

impl<E: 'static> fmt::Debug for PolymorphicPersister<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategy = match &self.strategy {
            Strategy::SingleTable { table, .. } => format!("single-table({table})"),
            Strategy::JoinedTables { parent } => {
                format!("joined-tables({})", parent.mapping().table_name())
            }
            Strategy::TablePerClass { .. } => "table-per-class".to_string(),
        };
        f.debug_struct("PolymorphicPersister")
            .field("entity", &self.entity)
            .field("strategy", &strategy)
            .field("subtypes", &self.subtypes)
            .finish()
    }
}

fn missing(column: &str) -> PersistError {
    PersistError::Hydration(HydrateError::MissingColumn {
        column: column.to_string(),
    })
}
