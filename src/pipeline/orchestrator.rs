//! Pipeline orchestration.
//!
//! Owns every stage and wires them into the per-request state machine:
//! origin dispatch, classify, permission gate, context merge, the
//! bounded synthesize/execute retry loop, fuzzy recovery on empty
//! results, and composition. The orchestrator is the only place that
//! creates a [`PipelineState`] or loops; stages stay straight-line.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::access::{AccessMatrix, PermissionGate};
use crate::config::Config;
use crate::model::ModelService;
use crate::pipeline::{
    FuzzyRecovery, IntentClassifier, QueryExecutor, QuerySynthesizer, ResponseComposer,
};
use crate::schema::SchemaCatalog;
use crate::state::{ErrorKind, ExecutionOutcome, Identity, Origin, PipelineState};
use crate::store::RelationalStore;

// ============================================================================
// Request / Response types
// ============================================================================

/// An incoming query, already sanitized by the upstream layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub query: String,
    pub origin: Origin,
    pub identity: Identity,
}

/// Completion event emitted for audit after every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub request_id: uuid::Uuid,
    pub user_id: Option<String>,
    pub role: String,
    pub intent: Option<String>,
    pub success: bool,
    pub elapsed_ms: u64,
    pub timestamp: chrono::DateTime<Utc>,
}

/// The final answer for one request.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    /// Natural-language reply; never empty.
    pub text: String,
    /// Structured payload when rows were returned.
    pub data: Option<serde_json::Value>,
    /// Audit event for the upstream layer.
    pub event: CompletionEvent,
    /// Final state, exposed for tracing and tests.
    pub state: PipelineState,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Wires the stages into the retry-bounded workflow.
pub struct Orchestrator {
    classifier: IntentClassifier,
    gate: PermissionGate,
    synthesizer: QuerySynthesizer,
    executor: QueryExecutor,
    recovery: FuzzyRecovery,
    composer: ResponseComposer,
    max_retries: u32,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        model: Arc<dyn ModelService>,
        store: Arc<dyn RelationalStore>,
    ) -> Self {
        let catalog = Arc::new(SchemaCatalog::standard());
        let matrix = Arc::new(AccessMatrix::standard());
        Self::with_parts(config, model, store, catalog, matrix)
    }

    /// Build with explicit catalog and matrix, for non-standard
    /// deployments and tests.
    pub fn with_parts(
        config: &Config,
        model: Arc<dyn ModelService>,
        store: Arc<dyn RelationalStore>,
        catalog: Arc<SchemaCatalog>,
        matrix: Arc<AccessMatrix>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(model.clone(), catalog.clone()),
            gate: PermissionGate::new(matrix.clone()),
            synthesizer: QuerySynthesizer::new(
                model.clone(),
                catalog.clone(),
                config.pipeline.max_rows,
            ),
            executor: QueryExecutor::new(
                store.clone(),
                matrix,
                config.pipeline.max_rows,
                std::time::Duration::from_secs(config.pipeline.statement_timeout_secs),
            ),
            recovery: FuzzyRecovery::new(
                store,
                catalog,
                config.pipeline.fuzzy_threshold,
                config.pipeline.fuzzy_limit,
            ),
            composer: ResponseComposer::new(model),
            max_retries: config.pipeline.max_retries,
        }
    }

    /// Run one request through the pipeline. Always yields a response;
    /// stage failures surface as friendly text, never as `Err`.
    pub async fn handle(&self, request: PipelineRequest) -> PipelineResponse {
        let started = Instant::now();
        let mut state = PipelineState::new(
            request.query,
            request.origin,
            request.identity,
            self.max_retries,
        );

        tracing::info!(
            request_id = %state.request_id,
            origin = state.origin.as_str(),
            role = %state.identity.role,
            "pipeline start"
        );

        self.dispatch(&mut state);
        self.classifier.classify(&mut state).await;
        self.gate.check(&mut state);
        self.merge_context(&mut state);
        self.run_query_stages(&mut state).await;

        let (text, data) = self.composer.compose(&mut state).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let success = !state.has_blocking_error();
        let event = CompletionEvent {
            request_id: state.request_id,
            user_id: state.identity.user_id.clone(),
            role: state.identity.role.clone(),
            intent: state.intent.map(|i| i.as_str().to_string()),
            success,
            elapsed_ms,
            timestamp: Utc::now(),
        };

        tracing::info!(
            request_id = %state.request_id,
            intent = ?event.intent,
            success,
            elapsed_ms,
            trace = ?state.visited_stages,
            "pipeline done"
        );

        PipelineResponse {
            text,
            data,
            event,
            state,
        }
    }

    /// Origin-keyed dispatch. Each channel enters the same internal
    /// chain; the patient channel additionally pins the identity to the
    /// lowest-privilege role, whatever the upstream layer sent.
    fn dispatch(&self, state: &mut PipelineState) {
        state.visit(&format!("route_by_origin_{}", state.origin.as_str()));
        if state.origin == Origin::WhatsappPatient {
            state.identity.role = "Recepcion".to_string();
        }
    }

    /// Merge ambient context the synthesizer needs, such as today's
    /// date for "citas de hoy".
    fn merge_context(&self, state: &mut PipelineState) {
        state.visit("combine_context");
        if state.has_blocking_error() {
            return;
        }
        if state.intent.map(|i| i.requires_query()).unwrap_or(false) {
            state.context.insert(
                "fecha_actual".to_string(),
                Utc::now().format("%Y-%m-%d").to_string(),
            );
        }
    }

    /// The synthesize/execute loop with bounded retries.
    ///
    /// Both stages run on every request and append to the trace; each
    /// skips its work internally when an earlier stage blocked or left
    /// nothing to do. An execution failure re-enters the synthesizer
    /// with the failure message as context: the statement is treated as
    /// wrong, not the store as flaky. Exhausted retries become a
    /// terminal SQL error.
    async fn run_query_stages(&self, state: &mut PipelineState) {
        let mut retry_context: Option<String> = None;

        loop {
            self.synthesizer
                .synthesize(state, retry_context.as_deref())
                .await;
            self.executor.execute(state).await;
            if state.has_blocking_error() || state.synthesized_query.is_none() {
                return;
            }

            match &state.execution_outcome {
                Some(ExecutionOutcome::Failure { message }) => {
                    if state.retry_count < state.max_retries {
                        state.retry_count += 1;
                        tracing::info!(
                            request_id = %state.request_id,
                            retry = state.retry_count,
                            max = state.max_retries,
                            "re-synthesizing after execution failure"
                        );
                        retry_context = Some(message.clone());
                        state.synthesized_query = None;
                        state.execution_outcome = None;
                        continue;
                    }
                    state.fail(
                        ErrorKind::SqlError,
                        format!("retries exhausted: {message}"),
                        Some(
                            "⚠️ No pude completar la búsqueda.\n\n\
                             Intenta reformular tu pregunta de otra manera."
                                .to_string(),
                        ),
                    );
                    return;
                }
                Some(ExecutionOutcome::Success { rows, .. }) if rows.is_empty() => {
                    self.recovery.recover(state).await;
                    return;
                }
                _ => return,
            }
        }
    }
}
