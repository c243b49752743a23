//! Relational store abstraction.
//!
//! The pipeline talks to storage through the [`RelationalStore`] trait;
//! a production deployment backs it with the clinic databases, and the
//! in-memory [`MemoryStore`] backs tests and local development. The
//! trait deliberately exposes only what the pipeline needs: bounded
//! execution of an already-validated read statement, and distinct
//! column values for fuzzy recovery.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::state::SynthesizedQuery;

/// A single result row: column name to JSON value.
pub type Row = BTreeMap<String, serde_json::Value>;

/// Result set from the store, with column order preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Read-only access to the clinic's relational data.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Run a validated read statement, returning at most `max_rows` rows.
    async fn execute(
        &self,
        query: &SynthesizedQuery,
        max_rows: usize,
    ) -> std::result::Result<QueryRows, StoreError>;

    /// Distinct non-null values of one column, for fuzzy suggestion
    /// candidates. `limit` bounds the candidate pool, not the
    /// suggestions themselves.
    async fn distinct_values(
        &self,
        resource: &str,
        column: &str,
        limit: usize,
    ) -> std::result::Result<Vec<String>, StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory store for tests and local development.
///
/// Results are scripted per call in FIFO order; `fail_with` makes the
/// next `execute` call fail, which is how retry behavior is exercised.
#[derive(Default)]
pub struct MemoryStore {
    results: Mutex<Vec<QueryRows>>,
    failures: Mutex<Vec<String>>,
    values: Mutex<BTreeMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result set for the next `execute` call.
    pub fn push_result(&self, result: QueryRows) {
        if let Ok(mut results) = self.results.lock() {
            results.push(result);
        }
    }

    /// Queue a failure for the next `execute` call. Failures are
    /// consumed before queued results.
    pub fn fail_with(&self, message: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(message.into());
        }
    }

    /// Set the distinct values returned for `resource.column`.
    pub fn set_values(&self, resource: &str, column: &str, values: Vec<String>) {
        if let Ok(mut map) = self.values.lock() {
            map.insert(format!("{resource}.{column}"), values);
        }
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn execute(
        &self,
        _query: &SynthesizedQuery,
        max_rows: usize,
    ) -> std::result::Result<QueryRows, StoreError> {
        if let Ok(mut failures) = self.failures.lock() {
            if !failures.is_empty() {
                return Err(StoreError::Query(failures.remove(0)));
            }
        }
        let mut result = match self.results.lock() {
            Ok(mut results) if !results.is_empty() => results.remove(0),
            _ => QueryRows::default(),
        };
        result.rows.truncate(max_rows);
        Ok(result)
    }

    async fn distinct_values(
        &self,
        resource: &str,
        column: &str,
        limit: usize,
    ) -> std::result::Result<Vec<String>, StoreError> {
        let map = self
            .values
            .lock()
            .map_err(|_| StoreError::Connection("store poisoned".to_string()))?;
        let mut values = map
            .get(&format!("{resource}.{column}"))
            .cloned()
            .unwrap_or_default();
        values.truncate(limit);
        Ok(values)
    }
}
