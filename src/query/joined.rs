//! Single-statement relationship loading.
//!
//! A persister's select runs one SELECT joining every registered node onto
//! the root table. Joins use real table names, so one table appears at most
//! once per query and self-referential joins are not expressible; graphs
//! needing either load through a second persister call instead. Every
//! selected column is aliased `{node}_{column}` so hydration can address
//! root and related columns without ambiguity.

use crate::executor::{query_on, ConnectionProvider, Row};
use crate::mapping::{HydrateError, ResolvedEntityMapping};
use crate::persister::PersistError;
use crate::query::SqlIden;
use crate::value::{value_is_null, value_key};
use sea_query::{
    Alias, Expr, ExprTrait, JoinType, Order, PostgresQueryBuilder, Query, Value,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Alias every root-table column carries in the result set.
pub const ROOT_ALIAS: &str = "root";

/// How a node joins onto the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Related row must exist (mandatory relationships).
    Inner,
    /// Related rows are optional; unmatched roots still come back.
    LeftOuter,
}

/// Applies one related row to a partially assembled root entity. Receives
/// the row and the node's column prefix.
pub type FixerFn<E> = Arc<dyn Fn(&mut E, &Row, &str) -> Result<(), HydrateError> + Send + Sync>;

/// One table joined into a persister's select.
pub struct JoinNode<E> {
    pub(crate) alias: String,
    pub(crate) table: String,
    pub(crate) left_column: String,
    pub(crate) right_column: String,
    pub(crate) kind: JoinKind,
    pub(crate) columns: Vec<String>,
    pub(crate) key_column: String,
    pub(crate) order_column: Option<String>,
    pub(crate) fixer: FixerFn<E>,
}

impl<E> JoinNode<E> {
    /// Join `table` onto the root with `root.left_column = table.right_column`.
    /// `columns` are selected under this node's alias; `key_column` (usually
    /// the joined table's key) identifies a related row for null probing and
    /// de-duplication. The fixer folds each distinct related row into the
    /// root entity.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        alias: impl Into<String>,
        table: impl Into<String>,
        left_column: impl Into<String>,
        right_column: impl Into<String>,
        kind: JoinKind,
        columns: Vec<String>,
        key_column: impl Into<String>,
        fixer: impl Fn(&mut E, &Row, &str) -> Result<(), HydrateError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            alias: alias.into(),
            table: table.into(),
            left_column: left_column.into(),
            right_column: right_column.into(),
            kind,
            columns,
            key_column: key_column.into(),
            order_column: None,
            fixer: Arc::new(fixer),
        }
    }

    /// Order related rows by this column of the joined table; indexed
    /// collections register their index column here.
    pub fn ordered_by(mut self, column: impl Into<String>) -> Self {
        self.order_column = Some(column.into());
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl<E> Clone for JoinNode<E> {
    fn clone(&self) -> Self {
        Self {
            alias: self.alias.clone(),
            table: self.table.clone(),
            left_column: self.left_column.clone(),
            right_column: self.right_column.clone(),
            kind: self.kind,
            columns: self.columns.clone(),
            key_column: self.key_column.clone(),
            order_column: self.order_column.clone(),
            fixer: Arc::clone(&self.fixer),
        }
    }
}

impl<E> fmt::Debug for JoinNode<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinNode")
            .field("alias", &self.alias)
            .field("table", &self.table)
            .field("kind", &self.kind)
            .finish()
    }
}

/// The join graph of one persister. Nodes register during relationship
/// setup; afterwards the graph is only read.
pub struct JoinedQuery<E> {
    nodes: RwLock<Vec<JoinNode<E>>>,
}

impl<E> Default for JoinedQuery<E> {
    fn default() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
        }
    }
}

impl<E> JoinedQuery<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: JoinNode<E>) {
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(node);
    }

    fn snapshot(&self) -> Vec<JoinNode<E>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Load the entities with the given identifiers, folding joined rows in.
    pub fn select(
        &self,
        mapping: &ResolvedEntityMapping<E>,
        provider: &dyn ConnectionProvider,
        ids: &[Value],
    ) -> Result<Vec<E>, PersistError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let nodes = self.snapshot();
        let (sql, values) = self.build_select(mapping, &nodes, ids);
        let rows = query_on(provider, &sql, &values)?;
        self.assemble(mapping, &nodes, rows)
    }

    fn build_select(
        &self,
        mapping: &ResolvedEntityMapping<E>,
        nodes: &[JoinNode<E>],
        ids: &[Value],
    ) -> (String, sea_query::Values) {
        let root = mapping.table_name();
        let id_column = mapping.id_column();
        let mut query = Query::select();
        query.from(SqlIden::new(root));

        query.expr_as(
            Expr::col((SqlIden::new(root), SqlIden::new(id_column))),
            Alias::new(format!("{ROOT_ALIAS}_{id_column}")),
        );
        for property in mapping.properties() {
            query.expr_as(
                Expr::col((SqlIden::new(root), SqlIden::new(property.column()))),
                Alias::new(format!("{ROOT_ALIAS}_{}", property.column())),
            );
        }

        for node in nodes {
            for column in &node.columns {
                query.expr_as(
                    Expr::col((SqlIden::new(&node.table), SqlIden::new(column))),
                    Alias::new(format!("{}_{column}", node.alias)),
                );
            }
            let join_type = match node.kind {
                JoinKind::Inner => JoinType::InnerJoin,
                JoinKind::LeftOuter => JoinType::LeftJoin,
            };
            query.join(
                join_type,
                SqlIden::new(&node.table),
                Expr::col((SqlIden::new(root), SqlIden::new(&node.left_column)))
                    .eq(Expr::col((SqlIden::new(&node.table), SqlIden::new(&node.right_column)))),
            );
        }

        query.and_where(
            Expr::col((SqlIden::new(root), SqlIden::new(id_column))).is_in(ids.iter().cloned()),
        );

        query.order_by((SqlIden::new(root), SqlIden::new(id_column)), Order::Asc);
        for node in nodes {
            if let Some(order_column) = &node.order_column {
                query.order_by(
                    (SqlIden::new(&node.table), SqlIden::new(order_column)),
                    Order::Asc,
                );
            }
        }

        query.build(PostgresQueryBuilder)
    }

    fn assemble(
        &self,
        mapping: &ResolvedEntityMapping<E>,
        nodes: &[JoinNode<E>],
        rows: Vec<Row>,
    ) -> Result<Vec<E>, PersistError> {
        let root_id_alias = format!("{ROOT_ALIAS}_{}", mapping.id_column());
        let mut entities: Vec<E> = Vec::new();
        let mut index_of: HashMap<String, usize> = HashMap::new();
        // (node alias, root key, related key) triples already folded in, so
        // fan-out across several joins does not duplicate related entries.
        let mut seen: HashSet<(String, String, String)> = HashSet::new();

        for row in rows {
            let root_value = row
                .get(&root_id_alias)
                .ok_or_else(|| HydrateError::MissingColumn {
                    column: root_id_alias.clone(),
                })?;
            let root_key = value_key(root_value);
            let index = match index_of.get(&root_key) {
                Some(&index) => index,
                None => {
                    entities.push(mapping.hydrate(&row, ROOT_ALIAS)?);
                    index_of.insert(root_key.clone(), entities.len() - 1);
                    entities.len() - 1
                }
            };

            for node in nodes {
                let key_alias = format!("{}_{}", node.alias, node.key_column);
                let Some(related) = row.get(&key_alias) else {
                    continue;
                };
                if value_is_null(related) {
                    continue;
                }
                let triple = (node.alias.clone(), root_key.clone(), value_key(related));
                if !seen.insert(triple) {
                    continue;
                }
                (node.fixer)(&mut entities[index], &row, &node.alias)?;
            }
        }
        Ok(entities)
    }
}

impl<E> fmt::Debug for JoinedQuery<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinedQuery")
            .field("nodes", &self.snapshot().len())
            .finish()
    }
}
