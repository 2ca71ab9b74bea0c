//! CRUD persisters.
//!
//! A [`Persister`] owns the resolved mapping of one entity type and turns
//! slices of instances into batched statements: multi-row inserts, diffed
//! per-row updates, identifier-set deletes and one joined select. Lifecycle
//! listeners hook every operation; relationship cascades are listeners the
//! relation module registers during setup.

mod listener;
mod retry;

pub use listener::{
    DeleteListener, InsertListener, ListenerCollection, SelectListener, UpdateListener,
};
pub use retry::RetryPolicy;

pub(crate) use retry::run_with_retry;

use crate::binder::{BinderError, BinderRegistry};
use crate::config::EngineConfig;
use crate::executor::{execute_on, query_on, ConnectionProvider, ExecuteError};
use crate::mapping::{
    resolve_entity_in, HydrateError, IdentifierPolicy, MappingConfiguration, MappingError,
    ResolutionContext, ResolvedEntityMapping, SilentColumn,
};
use crate::query::{JoinedQuery, SqlIden};
use crate::schema::Table;
use crate::value::value_is_null;
use sea_query::{Expr, ExprTrait, PostgresQueryBuilder, Query, Value};
use std::fmt;
use std::sync::Arc;

/// Failure of a persistence operation.
#[derive(Debug)]
pub enum PersistError {
    /// The executor reported a non-retriable fault, or a transient one on a
    /// path without retry.
    Execute(ExecuteError),
    /// Transient faults persisted through every allowed attempt.
    RetriesExhausted { attempts: u32, last: ExecuteError },
    /// A statement affected (or returned) a different number of rows than
    /// the batch expected; reported, never retried.
    RowCountMismatch { expected: u64, actual: u64 },
    /// A mandatory relationship is unset on an instance being written.
    MandatoryRelation { relation: String },
    /// A by-identifier update names a property the mapping does not have.
    UnknownProperty { property: String },
    /// No configured subtype claims an instance routed through a
    /// polymorphic persister.
    NoSubtypeMatch { entity: String },
    Hydration(HydrateError),
    Binder(BinderError),
    Mapping(MappingError),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Execute(err) => write!(f, "{err}"),
            PersistError::RetriesExhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            PersistError::RowCountMismatch { expected, actual } => {
                write!(f, "statement affected {actual} rows, expected {expected}")
            }
            PersistError::MandatoryRelation { relation } => {
                write!(f, "mandatory relation {relation} is not set")
            }
            PersistError::UnknownProperty { property } => {
                write!(f, "no mapped property named {property}")
            }
            PersistError::NoSubtypeMatch { entity } => {
                write!(f, "no configured subtype matches an instance of {entity}")
            }
            PersistError::Hydration(err) => write!(f, "{err}"),
            PersistError::Binder(err) => write!(f, "{err}"),
            PersistError::Mapping(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistError::Execute(err) | PersistError::RetriesExhausted { last: err, .. } => {
                Some(err)
            }
            PersistError::Hydration(err) => Some(err),
            PersistError::Binder(err) => Some(err),
            PersistError::Mapping(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ExecuteError> for PersistError {
    fn from(err: ExecuteError) -> Self {
        PersistError::Execute(err)
    }
}

impl From<HydrateError> for PersistError {
    fn from(err: HydrateError) -> Self {
        PersistError::Hydration(err)
    }
}

impl From<BinderError> for PersistError {
    fn from(err: BinderError) -> Self {
        PersistError::Binder(err)
    }
}

impl From<MappingError> for PersistError {
    fn from(err: MappingError) -> Self {
        PersistError::Mapping(err)
    }
}

/// Builds a [`Persister`], resolving the configuration on `build`.
pub struct PersisterBuilder<E> {
    config: MappingConfiguration<E>,
    provider: Arc<dyn ConnectionProvider>,
    registry: BinderRegistry,
    engine: EngineConfig,
    table: Option<Table>,
}

impl<E: 'static> PersisterBuilder<E> {
    pub fn new(config: MappingConfiguration<E>, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            config,
            provider,
            registry: BinderRegistry::global().clone(),
            engine: EngineConfig::default(),
            table: None,
        }
    }

    /// Replace the default binder registry.
    pub fn registry(mut self, registry: BinderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Resolve against an existing table, e.g. the shared table of several
    /// subtype mappings.
    pub fn table(mut self, table: Table) -> Self {
        self.table = Some(table);
        self
    }

    pub fn build(self) -> Result<Arc<Persister<E>>, MappingError> {
        self.build_in(&mut ResolutionContext::new())
    }

    pub fn build_in(self, ctx: &mut ResolutionContext) -> Result<Arc<Persister<E>>, MappingError> {
        let table = self
            .table
            .unwrap_or_else(|| Table::new(self.config.table.clone()));
        let mapping = resolve_entity_in(ctx, self.config, table, &self.registry)?;
        Ok(Persister::from_mapping(
            Arc::new(mapping),
            self.provider,
            &self.engine,
        ))
    }
}

/// Persists one entity type.
pub struct Persister<E> {
    mapping: Arc<ResolvedEntityMapping<E>>,
    provider: Arc<dyn ConnectionProvider>,
    listeners: ListenerCollection<E>,
    joined: JoinedQuery<E>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl<E: 'static> Persister<E> {
    /// Wrap an already resolved mapping.
    pub fn from_mapping(
        mapping: Arc<ResolvedEntityMapping<E>>,
        provider: Arc<dyn ConnectionProvider>,
        engine: &EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            mapping,
            provider,
            listeners: ListenerCollection::default(),
            joined: JoinedQuery::new(),
            batch_size: engine.batch_size.max(1),
            retry: RetryPolicy::from(engine),
        })
    }

    pub fn mapping(&self) -> &Arc<ResolvedEntityMapping<E>> {
        &self.mapping
    }

    pub fn listeners(&self) -> &ListenerCollection<E> {
        &self.listeners
    }

    pub fn joined(&self) -> &JoinedQuery<E> {
        &self.joined
    }

    pub(crate) fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }

    /// Insert instances in declaration order.
    pub fn insert(&self, entities: &mut [E]) -> Result<(), PersistError> {
        let mut refs: Vec<&mut E> = entities.iter_mut().collect();
        self.insert_refs(&mut refs)
    }

    pub fn insert_refs(&self, entities: &mut [&mut E]) -> Result<(), PersistError> {
        self.insert_with(entities, &[])
    }

    /// Insert with extra per-call silent columns, e.g. the owner's foreign
    /// key when cascading a mapped collection.
    pub fn insert_with(
        &self,
        entities: &mut [&mut E],
        overlay: &[SilentColumn<E>],
    ) -> Result<(), PersistError> {
        if entities.is_empty() {
            return Ok(());
        }
        self.listeners.before_insert(entities)?;

        if let IdentifierPolicy::BeforeInsert { provider } = self.mapping.identifier().policy() {
            for entity in entities.iter_mut() {
                if value_is_null(&self.mapping.id_value(entity)) {
                    let id = provider();
                    self.mapping.set_id(entity, &id)?;
                }
            }
        }

        let silent = self.mapping.silent_columns();
        let returning = matches!(
            self.mapping.identifier().policy(),
            IdentifierPolicy::AfterInsert
        );
        for chunk in entities.chunks_mut(self.batch_size) {
            run_with_retry(&self.retry, || {
                self.insert_chunk(chunk, &silent, overlay, returning)
            })?;
        }

        self.listeners.after_insert(entities)?;
        Ok(())
    }

    fn insert_chunk(
        &self,
        chunk: &mut [&mut E],
        silent: &[SilentColumn<E>],
        overlay: &[SilentColumn<E>],
        returning: bool,
    ) -> Result<(), PersistError> {
        let id_column = self.mapping.id_column();
        let mut stmt = Query::insert();
        stmt.into_table(SqlIden::new(self.mapping.table_name()));

        let mut columns: Vec<SqlIden> = Vec::new();
        if !returning {
            columns.push(SqlIden::new(id_column));
        }
        for property in self.mapping.properties() {
            columns.push(SqlIden::new(property.column()));
        }
        for column in silent.iter().chain(overlay) {
            columns.push(SqlIden::new(column.column()));
        }
        stmt.columns(columns);

        for entity in chunk.iter() {
            let mut row: Vec<Value> = Vec::new();
            if !returning {
                row.push(self.mapping.identifier().bind_value(entity)?);
            }
            for property in self.mapping.properties() {
                row.push(property.bind_value(entity)?);
            }
            for column in silent.iter().chain(overlay) {
                row.push(column.value_for(entity));
            }
            stmt.values_panic(row.into_iter().map(sea_query::Expr::val));
        }

        if returning {
            stmt.returning(Query::returning().column(SqlIden::new(id_column)));
            let (sql, values) = stmt.build(PostgresQueryBuilder);
            let rows = query_on(self.provider.as_ref(), &sql, &values)?;
            if rows.len() != chunk.len() {
                return Err(PersistError::RowCountMismatch {
                    expected: chunk.len() as u64,
                    actual: rows.len() as u64,
                });
            }
            for (entity, row) in chunk.iter_mut().zip(rows) {
                let id = row.get(id_column).ok_or_else(|| HydrateError::MissingColumn {
                    column: id_column.to_string(),
                })?;
                self.mapping.set_id(entity, id)?;
            }
        } else {
            let (sql, values) = stmt.build(PostgresQueryBuilder);
            let affected = execute_on(self.provider.as_ref(), &sql, &values)?;
            if affected != chunk.len() as u64 {
                return Err(PersistError::RowCountMismatch {
                    expected: chunk.len() as u64,
                    actual: affected,
                });
            }
        }

        for entity in chunk.iter_mut() {
            self.mapping.mark_persisted(entity);
        }
        Ok(())
    }

    /// Update from `(before_image, current)` pairs. Only changed columns are
    /// written unless `all_columns` forces a full row; pairs with no change
    /// produce no statement.
    pub fn update(&self, pairs: &mut [(E, E)], all_columns: bool) -> Result<(), PersistError> {
        let mut refs: Vec<&mut (E, E)> = pairs.iter_mut().collect();
        self.update_refs(&mut refs, all_columns)
    }

    pub fn update_refs(
        &self,
        pairs: &mut [&mut (E, E)],
        all_columns: bool,
    ) -> Result<(), PersistError> {
        if pairs.is_empty() {
            return Ok(());
        }
        self.listeners.before_update(pairs)?;
        for chunk in pairs.chunks_mut(self.batch_size) {
            run_with_retry(&self.retry, || self.update_chunk(chunk, all_columns))?;
        }
        self.listeners.after_update(pairs)?;
        Ok(())
    }

    fn update_chunk(
        &self,
        chunk: &mut [&mut (E, E)],
        all_columns: bool,
    ) -> Result<(), PersistError> {
        for pair in chunk.iter() {
            let (before, current) = (&pair.0, &pair.1);
            let mut sets: Vec<(String, Value)> = Vec::new();
            for property in self.mapping.properties() {
                let value = property.bind_value(current)?;
                if all_columns || property.bind_value(before)? != value {
                    sets.push((property.column().to_string(), value));
                }
            }
            if sets.is_empty() {
                continue;
            }
            let id = self.mapping.identifier().bind_value(current)?;
            let affected = self.update_columns_by_id(&id, &sets)?;
            if affected != 1 {
                return Err(PersistError::RowCountMismatch {
                    expected: 1,
                    actual: affected,
                });
            }
        }
        Ok(())
    }

    /// Rewrite full rows keyed by identifier. No before image is available,
    /// so every mapped column is written and relation cascades, which need
    /// the old state, run only for pair-wise [`update`](Persister::update).
    pub fn update_by_id(&self, entities: &[E]) -> Result<(), PersistError> {
        let refs: Vec<&E> = entities.iter().collect();
        self.update_by_id_refs(&refs)
    }

    pub fn update_by_id_refs(&self, entities: &[&E]) -> Result<(), PersistError> {
        if entities.is_empty() {
            return Ok(());
        }
        let ids = entities
            .iter()
            .map(|entity| self.mapping.identifier().bind_value(entity))
            .collect::<Result<Vec<_>, _>>()?;
        self.listeners.before_update_by_id(&ids)?;
        for (entity, id) in entities.iter().zip(ids.iter()) {
            let mut sets: Vec<(String, Value)> = Vec::new();
            for property in self.mapping.properties() {
                sets.push((property.column().to_string(), property.bind_value(entity)?));
            }
            run_with_retry(&self.retry, || {
                let affected = self.update_columns_by_id(id, &sets)?;
                if affected != 1 {
                    return Err(PersistError::RowCountMismatch {
                        expected: 1,
                        actual: affected,
                    });
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Targeted update of named properties without loading the row.
    pub fn update_properties_by_id(
        &self,
        id: &Value,
        changes: &[(&str, Value)],
    ) -> Result<u64, PersistError> {
        self.listeners
            .before_update_by_id(std::slice::from_ref(id))?;
        let mut sets: Vec<(String, Value)> = Vec::new();
        for (property, value) in changes {
            let resolved =
                self.mapping
                    .property(property)
                    .ok_or_else(|| PersistError::UnknownProperty {
                        property: (*property).to_string(),
                    })?;
            sets.push((
                resolved.column().to_string(),
                resolved.coerce(value)?,
            ));
        }
        let id = self.mapping.identifier().coerce(id)?;
        run_with_retry(&self.retry, || self.update_columns_by_id(&id, &sets))
    }

    pub(crate) fn update_columns_by_id(
        &self,
        id: &Value,
        sets: &[(String, Value)],
    ) -> Result<u64, PersistError> {
        self.update_columns_where(self.mapping.id_column(), std::slice::from_ref(id), sets)
    }

    pub(crate) fn update_columns_where(
        &self,
        column: &str,
        matching: &[Value],
        sets: &[(String, Value)],
    ) -> Result<u64, PersistError> {
        if matching.is_empty() || sets.is_empty() {
            return Ok(0);
        }
        let mut stmt = Query::update();
        stmt.table(SqlIden::new(self.mapping.table_name()));
        for (set_column, value) in sets {
            stmt.value(SqlIden::new(set_column), value.clone());
        }
        stmt.and_where(Expr::col(SqlIden::new(column)).is_in(matching.iter().cloned()));
        let (sql, values) = stmt.build(PostgresQueryBuilder);
        Ok(execute_on(self.provider.as_ref(), &sql, &values)?)
    }

    /// Delete instances by their identifiers.
    pub fn delete(&self, entities: &[E]) -> Result<(), PersistError> {
        let refs: Vec<&E> = entities.iter().collect();
        self.delete_refs(&refs)
    }

    pub fn delete_refs(&self, entities: &[&E]) -> Result<(), PersistError> {
        if entities.is_empty() {
            return Ok(());
        }
        self.listeners.before_delete(entities)?;
        for chunk in entities.chunks(self.batch_size) {
            let ids = chunk
                .iter()
                .map(|entity| self.mapping.identifier().bind_value(entity))
                .collect::<Result<Vec<_>, _>>()?;
            run_with_retry(&self.retry, || {
                let affected = self.delete_where(self.mapping.id_column(), &ids)?;
                if affected != ids.len() as u64 {
                    return Err(PersistError::RowCountMismatch {
                        expected: ids.len() as u64,
                        actual: affected,
                    });
                }
                Ok(())
            })?;
        }
        self.listeners.after_delete(entities)?;
        Ok(())
    }

    /// Delete rows by identifier without loading them.
    pub fn delete_by_id(&self, ids: &[Value]) -> Result<u64, PersistError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.listeners.before_delete_by_id(ids)?;
        let ids = ids
            .iter()
            .map(|id| self.mapping.identifier().coerce(id))
            .collect::<Result<Vec<_>, _>>()?;
        run_with_retry(&self.retry, || {
            self.delete_where(self.mapping.id_column(), &ids)
        })
    }

    pub(crate) fn delete_where(
        &self,
        column: &str,
        matching: &[Value],
    ) -> Result<u64, PersistError> {
        if matching.is_empty() {
            return Ok(0);
        }
        let mut stmt = Query::delete();
        stmt.from_table(SqlIden::new(self.mapping.table_name()));
        stmt.and_where(Expr::col(SqlIden::new(column)).is_in(matching.iter().cloned()));
        let (sql, values) = stmt.build(PostgresQueryBuilder);
        Ok(execute_on(self.provider.as_ref(), &sql, &values)?)
    }

    /// Load entities by identifier through the joined query.
    pub fn select(&self, ids: &[Value]) -> Result<Vec<E>, PersistError> {
        self.listeners.before_select(ids)?;
        let ids = ids
            .iter()
            .map(|id| self.mapping.identifier().coerce(id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut entities = self
            .joined
            .select(&self.mapping, self.provider.as_ref(), &ids)?;
        self.listeners.after_select(&mut entities)?;
        Ok(entities)
    }

    pub fn select_one(&self, id: &Value) -> Result<Option<E>, PersistError> {
        Ok(self.select(std::slice::from_ref(id))?.into_iter().next())
    }

    /// Plain (join-free) load of rows matching a column, used by mapped
    /// collection loading.
    pub(crate) fn select_where(
        &self,
        column: &str,
        matching: &[Value],
        order_by: Option<&str>,
    ) -> Result<Vec<E>, PersistError> {
        if matching.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.mapping.table_name();
        let mut stmt = Query::select();
        stmt.from(SqlIden::new(table));
        stmt.column(SqlIden::new(self.mapping.id_column()));
        for property in self.mapping.properties() {
            stmt.column(SqlIden::new(property.column()));
        }
        stmt.and_where(Expr::col(SqlIden::new(column)).is_in(matching.iter().cloned()));
        if let Some(order_column) = order_by {
            stmt.order_by(SqlIden::new(order_column), sea_query::Order::Asc);
        }
        let (sql, values) = stmt.build(PostgresQueryBuilder);
        let rows = query_on(self.provider.as_ref(), &sql, &values)?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            entities.push(self.mapping.hydrate(row, "")?);
        }
        Ok(entities)
    }
}

impl<E> fmt::Debug for Persister<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persister")
            .field("entity", &self.mapping.entity())
            .field("table", &self.mapping.table_name())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
