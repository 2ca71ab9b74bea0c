//! Statement-execution collaborator contracts.
//!
//! The engine never talks to a database driver directly: it builds SQL with
//! `sea-query` and hands `(sql, values)` pairs to an [`Executor`] obtained
//! from a [`ConnectionProvider`]. Pooling, parameter encoding and transaction
//! demarcation belong to the implementation behind these traits.

use sea_query::{Value, Values};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Error raised by an [`Executor`] implementation.
///
/// The variant determines the engine's reaction: `Transient` faults are
/// retried as a whole batch under the configured [`RetryPolicy`]; everything
/// else propagates to the caller immediately.
///
/// [`RetryPolicy`]: crate::persister::RetryPolicy
#[derive(Debug, Clone)]
pub enum ExecuteError {
    /// Recoverable fault (lock conflict, dropped connection); eligible for retry.
    Transient(String),
    /// Constraint violation (unique, foreign key, not-null); never retried.
    ConstraintViolation(String),
    /// A bind value could not be encoded for the target column.
    Binding(String),
    /// Any other execution failure; never retried.
    Other(String),
}

impl ExecuteError {
    /// Whether the engine may re-run the failed batch.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecuteError::Transient(_))
    }
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::Transient(msg) => write!(f, "transient execution fault: {msg}"),
            ExecuteError::ConstraintViolation(msg) => write!(f, "constraint violation: {msg}"),
            ExecuteError::Binding(msg) => write!(f, "bind error: {msg}"),
            ExecuteError::Other(msg) => write!(f, "execution error: {msg}"),
        }
    }
}

impl std::error::Error for ExecuteError {}

/// One result row: column labels (as aliased in the SELECT list) paired with
/// their values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from `(column, value)` pairs.
    pub fn new(pairs: Vec<(String, Value)>) -> Self {
        let (columns, values) = pairs.into_iter().unzip();
        Self { columns, values }
    }

    /// Look up a value by column label.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Column labels in SELECT-list order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Executes prepared statements against one underlying connection.
///
/// Implementations classify driver failures into [`ExecuteError`] variants so
/// the engine can distinguish retriable faults from fatal ones.
pub trait Executor: Send {
    /// Execute a write statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &Values) -> Result<u64, ExecuteError>;

    /// Execute a query, returning all result rows.
    fn query(&mut self, sql: &str, params: &Values) -> Result<Vec<Row>, ExecuteError>;
}

/// Shared handle to the caller-owned connection.
///
/// The engine is synchronous and single-threaded per logical persistence
/// call; the mutex only serializes the engine's own statement-at-a-time
/// access to the handle.
pub type Connection = Arc<Mutex<dyn Executor>>;

/// Supplies the connection handle on demand. Lifecycle (open, close, pool,
/// transaction) is owned by the caller.
pub trait ConnectionProvider: Send + Sync {
    /// Obtain the handle all statements of the current operation run against.
    fn connection(&self) -> Result<Connection, ExecuteError>;
}

/// Run one statement against the provider's connection.
pub(crate) fn execute_on(
    provider: &dyn ConnectionProvider,
    sql: &str,
    params: &Values,
) -> Result<u64, ExecuteError> {
    log::debug!("execute: {} ({} binds)", sql, params.0.len());
    let conn = provider.connection()?;
    let mut guard = conn
        .lock()
        .map_err(|_| ExecuteError::Other("connection mutex poisoned".to_string()))?;
    guard.execute(sql, params)
}

/// Run one query against the provider's connection.
pub(crate) fn query_on(
    provider: &dyn ConnectionProvider,
    sql: &str,
    params: &Values,
) -> Result<Vec<Row>, ExecuteError> {
    log::debug!("query: {} ({} binds)", sql, params.0.len());
    let conn = provider.connection()?;
    let mut guard = conn
        .lock()
        .map_err(|_| ExecuteError::Other("connection mutex poisoned".to_string()))?;
    guard.query(sql, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExecuteError::Transient("deadlock".into()).is_transient());
        assert!(!ExecuteError::ConstraintViolation("unique".into()).is_transient());
        assert!(!ExecuteError::Binding("no encoding".into()).is_transient());
        assert!(!ExecuteError::Other("boom".into()).is_transient());
    }

    #[test]
    fn test_row_lookup() {
        let row = Row::new(vec![
            ("root_id".to_string(), Value::BigInt(Some(7))),
            ("root_name".to_string(), Value::String(Some("a".to_string()))),
        ]);
        assert_eq!(row.get("root_id"), Some(&Value::BigInt(Some(7))));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.columns().len(), 2);
    }

    #[test]
    fn test_error_display() {
        let err = ExecuteError::ConstraintViolation("duplicate key".into());
        assert_eq!(err.to_string(), "constraint violation: duplicate key");
    }
}
