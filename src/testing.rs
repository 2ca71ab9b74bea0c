//! Test doubles for exercising the engine without a database.
//!
//! [`MockExecutor`] records every `(sql, values)` pair it receives and
//! replays scripted results. Compiled into the library so integration tests
//! and downstream crates can drive persisters end to end.

use crate::executor::{Connection, ConnectionProvider, ExecuteError, Executor, Row};
use crate::persister::{
    DeleteListener, InsertListener, PersistError, SelectListener, UpdateListener,
};
use sea_query::{Value, Values};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Scripted [`Executor`].
///
/// Results queue in FIFO order via the `push_*` methods. With an empty
/// queue, `query` returns no rows and `execute` reports an affected count
/// matching the statement's bind groups (one per `VALUES` group for an
/// insert, one otherwise), so straight-line write paths need no scripting.
#[derive(Default)]
pub struct MockExecutor {
    executed: Vec<(String, Values)>,
    query_results: VecDeque<Result<Vec<Row>, ExecuteError>>,
    execute_results: VecDeque<Result<u64, ExecuteError>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_query_result(&mut self, rows: Vec<Row>) {
        self.query_results.push_back(Ok(rows));
    }

    pub fn push_query_error(&mut self, err: ExecuteError) {
        self.query_results.push_back(Err(err));
    }

    pub fn push_execute_result(&mut self, affected: u64) {
        self.execute_results.push_back(Ok(affected));
    }

    pub fn push_execute_error(&mut self, err: ExecuteError) {
        self.execute_results.push_back(Err(err));
    }

    /// Every statement seen so far, writes and queries alike.
    pub fn executed(&self) -> &[(String, Values)] {
        &self.executed
    }

    /// SQL texts seen so far.
    pub fn statements(&self) -> Vec<String> {
        self.executed.iter().map(|(sql, _)| sql.clone()).collect()
    }

    fn default_affected(sql: &str) -> u64 {
        if sql.trim_start().to_ascii_uppercase().starts_with("INSERT") {
            // The Postgres builder renders one bind group per row.
            sql.matches("), (").count() as u64 + 1
        } else {
            1
        }
    }
}

impl Executor for MockExecutor {
    fn execute(&mut self, sql: &str, params: &Values) -> Result<u64, ExecuteError> {
        self.executed.push((sql.to_string(), params.clone()));
        match self.execute_results.pop_front() {
            Some(result) => result,
            None => Ok(Self::default_affected(sql)),
        }
    }

    fn query(&mut self, sql: &str, params: &Values) -> Result<Vec<Row>, ExecuteError> {
        self.executed.push((sql.to_string(), params.clone()));
        match self.query_results.pop_front() {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }
}

/// Hands out one shared [`MockExecutor`] and keeps a handle for inspection.
#[derive(Clone)]
pub struct MockConnectionProvider {
    executor: Arc<Mutex<MockExecutor>>,
}

impl Default for MockConnectionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnectionProvider {
    pub fn new() -> Self {
        Self {
            executor: Arc::new(Mutex::new(MockExecutor::new())),
        }
    }

    /// Script or inspect the underlying executor.
    pub fn with_executor<T>(&self, f: impl FnOnce(&mut MockExecutor) -> T) -> T {
        let mut guard = self.executor.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// SQL texts executed so far.
    pub fn statements(&self) -> Vec<String> {
        self.with_executor(|e| e.statements())
    }
}

impl ConnectionProvider for MockConnectionProvider {
    fn connection(&self) -> Result<Connection, ExecuteError> {
        Ok(self.executor.clone())
    }
}

/// Records listener invocations into a shared log; useful for asserting
/// cascade ordering.
pub struct RecordingListener {
    label: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingListener {
    pub fn new(label: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            label: label.into(),
            log,
        }
    }

    fn record(&self, event: &str) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{}:{}", self.label, event));
    }
}

impl<E> InsertListener<E> for RecordingListener {
    fn before_insert(&self, _entities: &mut [&mut E]) -> Result<(), PersistError> {
        self.record("before_insert");
        Ok(())
    }

    fn after_insert(&self, _entities: &mut [&mut E]) -> Result<(), PersistError> {
        self.record("after_insert");
        Ok(())
    }
}

impl<E> UpdateListener<E> for RecordingListener {
    fn before_update(&self, _pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        self.record("before_update");
        Ok(())
    }

    fn after_update(&self, _pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        self.record("after_update");
        Ok(())
    }
}

impl<E> DeleteListener<E> for RecordingListener {
    fn before_delete(&self, _entities: &[&E]) -> Result<(), PersistError> {
        self.record("before_delete");
        Ok(())
    }

    fn after_delete(&self, _entities: &[&E]) -> Result<(), PersistError> {
        self.record("after_delete");
        Ok(())
    }
}

impl<E> SelectListener<E> for RecordingListener {
    fn before_select(&self, _ids: &[Value]) -> Result<(), PersistError> {
        self.record("before_select");
        Ok(())
    }

    fn after_select(&self, _entities: &mut [E]) -> Result<(), PersistError> {
        self.record("after_select");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_and_replays() {
        let provider = MockConnectionProvider::new();
        provider.with_executor(|e| {
            e.push_execute_result(3);
            e.push_query_result(vec![Row::new(vec![(
                "id".to_string(),
                Value::BigInt(Some(1)),
            )])]);
        });

        let conn = provider.connection().unwrap();
        let mut guard = conn.lock().unwrap();
        assert_eq!(guard.execute("UPDATE t", &Values(vec![])).unwrap(), 3);
        let rows = guard.query("SELECT 1", &Values(vec![])).unwrap();
        assert_eq!(rows.len(), 1);
        drop(guard);

        assert_eq!(provider.statements(), vec!["UPDATE t", "SELECT 1"]);
    }

    #[test]
    fn test_default_affected_counts_insert_groups() {
        let mut executor = MockExecutor::new();
        let affected = executor
            .execute(
                "INSERT INTO \"t\" (\"a\") VALUES ($1), ($2), ($3)",
                &Values(vec![]),
            )
            .unwrap();
        assert_eq!(affected, 3);
        let affected = executor
            .execute("DELETE FROM \"t\" WHERE \"id\" = $1", &Values(vec![]))
            .unwrap();
        assert_eq!(affected, 1);
    }
}
