//! Association tables.
//!
//! A collection mapped through an association table stores one record per
//! link: the owner's key, the target's key and, for indexed collections,
//! the position. The [`AssociationPersister`] owns the record statements;
//! the one-to-many cascade decides when to run them.

use crate::config::EngineConfig;
use crate::executor::{execute_on, query_on, ConnectionProvider};
use crate::persister::{run_with_retry, PersistError, RetryPolicy};
use crate::query::SqlIden;
use crate::schema::{ColumnType, Table, UniqueConstraint};
use crate::value::FromColumnValue;
use sea_query::{Expr, ExprTrait, Order, PostgresQueryBuilder, Query, Value};
use std::sync::Arc;

/// Declarative shape of an association table.
#[derive(Debug, Clone)]
pub struct AssociationTable {
    pub(crate) table: String,
    pub(crate) owner_column: String,
    pub(crate) target_column: String,
    pub(crate) index_column: Option<String>,
}

impl AssociationTable {
    pub fn new(
        table: impl Into<String>,
        owner_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            owner_column: owner_column.into(),
            target_column: target_column.into(),
            index_column: None,
        }
    }

    /// Store collection positions in this column.
    pub fn indexed_by(mut self, column: impl Into<String>) -> Self {
        self.index_column = Some(column.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_indexed(&self) -> bool {
        self.index_column.is_some()
    }
}

/// One association record.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRecord {
    pub owner: Value,
    pub target: Value,
    pub index: Option<i64>,
}

/// Persists the records of one association table.
pub struct AssociationPersister {
    layout: AssociationTable,
    schema: Table,
    provider: Arc<dyn ConnectionProvider>,
    retry: RetryPolicy,
}

impl AssociationPersister {
    /// Build the persister and its table schema. Key column types come from
    /// the two sides' identifier mappings.
    pub fn new(
        layout: AssociationTable,
        owner_ty: ColumnType,
        target_ty: ColumnType,
        provider: Arc<dyn ConnectionProvider>,
        engine: &EngineConfig,
    ) -> Result<Self, crate::schema::TableError> {
        let mut schema = Table::new(layout.table.clone());
        schema.add_column(layout.owner_column.clone(), owner_ty, false)?;
        schema.add_column(layout.target_column.clone(), target_ty, false)?;
        let mut key = vec![layout.owner_column.clone(), layout.target_column.clone()];
        if let Some(index_column) = &layout.index_column {
            schema.add_column(index_column.clone(), ColumnType::Integer, false)?;
            key.push(index_column.clone());
            // The key admits one row per position; the pair itself must
            // still link at most once.
            schema.add_unique_constraint(UniqueConstraint {
                name: format!("uq_{}_link", layout.table),
                columns: vec![layout.owner_column.clone(), layout.target_column.clone()],
            })?;
        }
        schema.set_primary_key(key)?;
        Ok(Self {
            layout,
            schema,
            provider,
            retry: RetryPolicy::from(engine),
        })
    }

    pub fn layout(&self) -> &AssociationTable {
        &self.layout
    }

    /// The record table's schema, for DDL generation.
    pub fn schema_table(&self) -> &Table {
        &self.schema
    }

    /// Insert records, one row each.
    pub fn insert(&self, records: &[AssociationRecord]) -> Result<(), PersistError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut stmt = Query::insert();
        stmt.into_table(SqlIden::new(&self.layout.table));
        let mut columns = vec![
            SqlIden::new(&self.layout.owner_column),
            SqlIden::new(&self.layout.target_column),
        ];
        if let Some(index_column) = &self.layout.index_column {
            columns.push(SqlIden::new(index_column));
        }
        stmt.columns(columns);
        for record in records {
            let mut row = vec![record.owner.clone(), record.target.clone()];
            if self.layout.index_column.is_some() {
                row.push(Value::BigInt(record.index));
            }
            stmt.values_panic(row.into_iter().map(sea_query::Expr::val));
        }
        let (sql, values) = stmt.build(PostgresQueryBuilder);
        run_with_retry(&self.retry, || {
            let affected = execute_on(self.provider.as_ref(), &sql, &values)?;
            if affected != records.len() as u64 {
                return Err(PersistError::RowCountMismatch {
                    expected: records.len() as u64,
                    actual: affected,
                });
            }
            Ok(())
        })
    }

    /// Delete every record of the given owners.
    pub fn delete_by_owners(&self, owners: &[Value]) -> Result<u64, PersistError> {
        if owners.is_empty() {
            return Ok(0);
        }
        let mut stmt = Query::delete();
        stmt.from_table(SqlIden::new(&self.layout.table));
        stmt.and_where(
            Expr::col(SqlIden::new(&self.layout.owner_column)).is_in(owners.iter().cloned()),
        );
        let (sql, values) = stmt.build(PostgresQueryBuilder);
        run_with_retry(&self.retry, || {
            Ok(execute_on(self.provider.as_ref(), &sql, &values)?)
        })
    }

    /// Delete one owner/target link.
    pub fn delete_pair(&self, owner: &Value, target: &Value) -> Result<u64, PersistError> {
        let mut stmt = Query::delete();
        stmt.from_table(SqlIden::new(&self.layout.table));
        stmt.and_where(Expr::col(SqlIden::new(&self.layout.owner_column)).eq(owner.clone()));
        stmt.and_where(Expr::col(SqlIden::new(&self.layout.target_column)).eq(target.clone()));
        let (sql, values) = stmt.build(PostgresQueryBuilder);
        run_with_retry(&self.retry, || {
            Ok(execute_on(self.provider.as_ref(), &sql, &values)?)
        })
    }

    /// Move one link to a new position.
    pub fn update_index(
        &self,
        owner: &Value,
        target: &Value,
        index: i64,
    ) -> Result<u64, PersistError> {
        let Some(index_column) = &self.layout.index_column else {
            return Ok(0);
        };
        let mut stmt = Query::update();
        stmt.table(SqlIden::new(&self.layout.table));
        stmt.value(SqlIden::new(index_column), Value::BigInt(Some(index)));
        stmt.and_where(Expr::col(SqlIden::new(&self.layout.owner_column)).eq(owner.clone()));
        stmt.and_where(Expr::col(SqlIden::new(&self.layout.target_column)).eq(target.clone()));
        let (sql, values) = stmt.build(PostgresQueryBuilder);
        run_with_retry(&self.retry, || {
            Ok(execute_on(self.provider.as_ref(), &sql, &values)?)
        })
    }

    /// Load the records of the given owners, position order within each
    /// owner when indexed.
    pub fn select_by_owners(&self, owners: &[Value]) -> Result<Vec<AssociationRecord>, PersistError> {
        if owners.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = Query::select();
        stmt.from(SqlIden::new(&self.layout.table));
        stmt.column(SqlIden::new(&self.layout.owner_column));
        stmt.column(SqlIden::new(&self.layout.target_column));
        if let Some(index_column) = &self.layout.index_column {
            stmt.column(SqlIden::new(index_column));
        }
        stmt.and_where(
            Expr::col(SqlIden::new(&self.layout.owner_column)).is_in(owners.iter().cloned()),
        );
        stmt.order_by(SqlIden::new(&self.layout.owner_column), Order::Asc);
        if let Some(index_column) = &self.layout.index_column {
            stmt.order_by(SqlIden::new(index_column), Order::Asc);
        }
        let (sql, values) = stmt.build(PostgresQueryBuilder);
        let rows = query_on(self.provider.as_ref(), &sql, &values)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let owner = row
                .get(&self.layout.owner_column)
                .cloned()
                .ok_or_else(|| missing(&self.layout.owner_column))?;
            let target = row
                .get(&self.layout.target_column)
                .cloned()
                .ok_or_else(|| missing(&self.layout.target_column))?;
            let index = match &self.layout.index_column {
                Some(index_column) => {
                    let value = row
                        .get(index_column)
                        .ok_or_else(|| missing(index_column))?;
                    Option::<i64>::from_column_value(value).map_err(|source| {
                        PersistError::Hydration(crate::mapping::HydrateError::Value {
                            property: index_column.clone(),
                            source,
                        })
                    })?
                }
                None => None,
            };
            records.push(AssociationRecord {
                owner,
                target,
                index,
            });
        }
        Ok(records)
    }
}

fn missing(column: &str) -> PersistError {
    PersistError::Hydration(crate::mapping::HydrateError::MissingColumn {
        column: column.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Row;
    use crate::testing::MockConnectionProvider;

    fn persister(provider: &MockConnectionProvider, indexed: bool) -> AssociationPersister {
        let mut layout = AssociationTable::new("user_tags", "user_id", "tag_id");
        if indexed {
            layout = layout.indexed_by("position");
        }
        AssociationPersister::new(
            layout,
            ColumnType::BigInt,
            ColumnType::BigInt,
            Arc::new(provider.clone()),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_writes_positions_for_indexed_layout() {
        let provider = MockConnectionProvider::new();
        let assoc = persister(&provider, true);
        assoc
            .insert(&[
                AssociationRecord {
                    owner: Value::BigInt(Some(1)),
                    target: Value::BigInt(Some(10)),
                    index: Some(0),
                },
                AssociationRecord {
                    owner: Value::BigInt(Some(1)),
                    target: Value::BigInt(Some(11)),
                    index: Some(1),
                },
            ])
            .unwrap();
        let statements = provider.statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("\"position\""), "{}", statements[0]);
    }

    #[test]
    fn test_select_orders_by_owner_then_position() {
        let provider = MockConnectionProvider::new();
        provider.with_executor(|e| {
            e.push_query_result(vec![Row::new(vec![
                ("user_id".to_string(), Value::BigInt(Some(1))),
                ("tag_id".to_string(), Value::BigInt(Some(10))),
                ("position".to_string(), Value::Int(Some(0))),
            ])]);
        });
        let assoc = persister(&provider, true);
        let records = assoc.select_by_owners(&[Value::BigInt(Some(1))]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, Some(0));
        let sql = &provider.statements()[0];
        assert!(sql.contains("ORDER BY \"user_id\" ASC, \"position\" ASC"), "{sql}");
    }

    #[test]
    fn test_schema_keys_the_link_pair() {
        let provider = MockConnectionProvider::new();
        let assoc = persister(&provider, false);
        let table = assoc.schema_table();
        assert!(table.column("user_id").is_some());
        assert!(table.column("tag_id").is_some());
        assert!(table.column("position").is_none());
        let key = table.primary_key().unwrap();
        assert_eq!(key.columns, vec!["user_id".to_string(), "tag_id".to_string()]);
        assert!(table.unique_constraints().is_empty());
    }

    #[test]
    fn test_indexed_schema_keys_position_and_keeps_pair_unique() {
        let provider = MockConnectionProvider::new();
        let assoc = persister(&provider, true);
        let table = assoc.schema_table();
        let key = table.primary_key().unwrap();
        assert_eq!(
            key.columns,
            vec![
                "user_id".to_string(),
                "tag_id".to_string(),
                "position".to_string()
            ]
        );
        assert_eq!(table.unique_constraints().len(), 1);
        assert_eq!(
            table.unique_constraints()[0].columns,
            vec!["user_id".to_string(), "tag_id".to_string()]
        );
    }
}
