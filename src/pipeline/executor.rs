//! Query execution stage.
//!
//! Runs the synthesized statement against the relational store under a
//! row cap and a timeout. The role allow-list and the no-mutation rule
//! are re-checked here independently of the gate and the synthesizer;
//! a statement that reaches the store has passed the same checks twice.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::access::{AccessMatrix, Role};
use crate::state::{ErrorKind, ExecutionOutcome, PipelineState};
use crate::store::RelationalStore;

static MUTATION_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|TRUNCATE|CREATE|GRANT|REVOKE)\b").unwrap()
});

/// Executes validated statements under caps and a timeout.
pub struct QueryExecutor {
    store: Arc<dyn RelationalStore>,
    matrix: Arc<AccessMatrix>,
    max_rows: usize,
    statement_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        matrix: Arc<AccessMatrix>,
        max_rows: usize,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            store,
            matrix,
            max_rows,
            statement_timeout,
        }
    }

    /// Run the query in `state`, recording an [`ExecutionOutcome`].
    ///
    /// A store failure or timeout becomes `Failure` for the
    /// orchestrator's retry policy to handle; only allow-list and
    /// mutation violations set a terminal error directly, because
    /// regenerating the statement cannot make those legitimate.
    pub async fn execute(&self, state: &mut PipelineState) {
        state.visit("execute_sql");

        if state.has_blocking_error() {
            return;
        }
        let query = match &state.synthesized_query {
            Some(query) => query.clone(),
            None => return,
        };

        let role = match Role::parse(&state.identity.role) {
            Some(role) => role,
            None => {
                state.fail(
                    ErrorKind::InvalidRole,
                    format!("unknown role at execution: {}", state.identity.role),
                    Some("Tu cuenta no tiene un rol válido configurado.".to_string()),
                );
                return;
            }
        };

        let denied: Vec<&String> = query
            .resources
            .iter()
            .filter(|r| !self.matrix.can_access(role, r, false))
            .collect();
        if !denied.is_empty() {
            state.fail(
                ErrorKind::PermissionDenied,
                format!("allow-list rejected {:?} for {} at execution", denied, role),
                Some(
                    "🔒 **Acceso restringido**\n\n\
                     No tienes acceso a ver esta información con tu rol actual."
                        .to_string(),
                ),
            );
            return;
        }

        if query.is_mutation || MUTATION_KEYWORD.is_match(&query.text) {
            state.fail(
                ErrorKind::SqlError,
                format!("mutating statement reached executor: {:.100}", query.text),
                Some(
                    "⚠️ No pude completar la búsqueda.\n\n\
                     Intenta reformular tu pregunta de otra manera."
                        .to_string(),
                ),
            );
            return;
        }

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.statement_timeout,
            self.store.execute(&query, self.max_rows),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(Ok(rows)) => {
                tracing::debug!(
                    request_id = %state.request_id,
                    rows = rows.len(),
                    elapsed_ms,
                    "query executed"
                );
                ExecutionOutcome::Success {
                    columns: rows.columns,
                    rows: rows.rows,
                    elapsed_ms,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(request_id = %state.request_id, error = %e, "query failed");
                ExecutionOutcome::Failure {
                    message: e.to_string(),
                }
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %state.request_id,
                    timeout_ms = self.statement_timeout.as_millis() as u64,
                    "query timed out"
                );
                ExecutionOutcome::Failure {
                    message: format!(
                        "statement timed out after {}ms",
                        self.statement_timeout.as_millis()
                    ),
                }
            }
        };

        state.execution_outcome = Some(outcome);
    }
}
