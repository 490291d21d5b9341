//! Test infrastructure: a scripted stand-in for the database.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{Querier, Row, Statement};
use crate::error::{Error, Result};
use crate::value::Value;

/// A [`Querier`] that replays scripted query results in order and records
/// every statement it receives. Mutations succeed and are logged;
/// an unscripted query fails loudly so tests catch drift in the call
/// sequence.
#[derive(Default)]
pub struct ScriptedQuerier {
    responses: Mutex<VecDeque<Vec<Row>>>,
    queries: Mutex<Vec<Statement>>,
    executed: Mutex<Vec<Statement>>,
    transactions: Mutex<Vec<Vec<Statement>>>,
}

impl ScriptedQuerier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next `query` call.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.responses.lock().unwrap().push_back(rows);
    }

    /// Queues a single-row `COUNT(*)` style result.
    pub fn push_count(&self, count: i64) {
        self.push_rows(vec![row(&[("CNT", Value::Int64(count))])]);
    }

    /// Queues an empty result.
    pub fn push_empty(&self) {
        self.push_rows(Vec::new());
    }

    /// Every `query` call seen so far.
    pub fn queries(&self) -> Vec<Statement> {
        self.queries.lock().unwrap().clone()
    }

    /// Every `execute` call seen so far.
    pub fn executed(&self) -> Vec<Statement> {
        self.executed.lock().unwrap().clone()
    }

    /// Every `execute_transaction` call seen so far.
    pub fn transactions(&self) -> Vec<Vec<Statement>> {
        self.transactions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Querier for ScriptedQuerier {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.queries
            .lock()
            .unwrap()
            .push(Statement::new(sql, params.to_vec()));

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Database(format!("no scripted response for: {sql}")))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.executed
            .lock()
            .unwrap()
            .push(Statement::new(sql, params.to_vec()));
        Ok(1)
    }

    async fn execute_transaction(&self, statements: &[Statement]) -> Result<()> {
        self.transactions.lock().unwrap().push(statements.to_vec());
        Ok(())
    }
}

/// Builds a row from column/value pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}
