//! Per-request pipeline state.
//!
//! One `PipelineState` is created by the orchestrator for each request
//! and threaded through every stage by mutable reference. Each stage
//! writes only its own designated fields, appends its name to the
//! visited-stage trace, and never rewrites an earlier stage's output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::SchemaTarget;
use crate::store::Row;

// ============================================================================
// Origin
// ============================================================================

/// Request channel the query arrived through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Internal staff via the web application.
    #[default]
    Webapp,
    /// Patients via WhatsApp.
    WhatsappPatient,
    /// Internal staff via WhatsApp.
    WhatsappStaff,
}

impl Origin {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Webapp => "webapp",
            Self::WhatsappPatient => "whatsapp_patient",
            Self::WhatsappStaff => "whatsapp_staff",
        }
    }
}

// ============================================================================
// Intent
// ============================================================================

/// Closed-vocabulary classification of the user's goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Read query (search, list, show).
    QueryRead,
    /// Aggregation query (count, sum, average).
    QueryAggregate,
    /// Create a new record.
    MutationCreate,
    /// Update an existing record.
    MutationUpdate,
    /// Delete a record.
    MutationDelete,
    /// Query is ambiguous and needs more information.
    Clarification,
    /// Not related to the clinic.
    OutOfScope,
    /// Greeting or casual conversation.
    Greeting,
}

impl Intent {
    /// Parse an intent from the model's closed vocabulary.
    pub fn from_vocab(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "query_read" => Some(Self::QueryRead),
            "query_aggregate" => Some(Self::QueryAggregate),
            "mutation_create" => Some(Self::MutationCreate),
            "mutation_update" => Some(Self::MutationUpdate),
            "mutation_delete" => Some(Self::MutationDelete),
            "clarification" => Some(Self::Clarification),
            "out_of_scope" => Some(Self::OutOfScope),
            "greeting" => Some(Self::Greeting),
            _ => None,
        }
    }

    /// Whether this intent mutates data.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::MutationCreate | Self::MutationUpdate | Self::MutationDelete
        )
    }

    /// Whether this intent leads to query synthesis.
    pub fn requires_query(&self) -> bool {
        matches!(self, Self::QueryRead | Self::QueryAggregate)
    }

    /// Whether this intent is answered conversationally without a query.
    pub fn is_conversational(&self) -> bool {
        matches!(self, Self::Greeting | Self::OutOfScope | Self::Clarification)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::QueryRead => "query_read",
            Self::QueryAggregate => "query_aggregate",
            Self::MutationCreate => "mutation_create",
            Self::MutationUpdate => "mutation_update",
            Self::MutationDelete => "mutation_delete",
            Self::Clarification => "clarification",
            Self::OutOfScope => "out_of_scope",
            Self::Greeting => "greeting",
        }
    }
}

// ============================================================================
// Identity & Entities
// ============================================================================

/// Authenticated requester, as delivered by the upstream layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id, if known.
    pub user_id: Option<String>,
    /// Display name, used by conversational replies.
    pub user_name: Option<String>,
    /// Raw role name; validated by the permission gate.
    pub role: String,
}

impl Identity {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            user_id: None,
            user_name: None,
            role: role.into(),
        }
    }
}

/// Entities extracted from the query.
///
/// Domain values are kept separate from pipeline-derived flags; nothing
/// here is a loosely typed bag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entities {
    /// Extracted domain values, e.g. `nombre_paciente -> "Juan Pérez"`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, String>,
    /// Resources derived from the domain-noun lexicon.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    /// Fields the current role may not see; enforced at render time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restricted_fields: Vec<String>,
    /// Destructive operation flagged as requiring confirmation.
    #[serde(default)]
    pub requires_confirmation: bool,
}

// ============================================================================
// Synthesized Query & Execution Outcome
// ============================================================================

/// A validated, parameterized read statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedQuery {
    /// Statement text.
    pub text: String,
    /// Bound parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Logical database the statement targets.
    pub target: SchemaTarget,
    /// Resources the statement touches.
    pub resources: Vec<String>,
    /// Always false; the synthesizer rejects mutations categorically.
    pub is_mutation: bool,
}

/// Outcome of running the synthesized query. Present only after the
/// executor stage has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        rows: Vec<Row>,
        columns: Vec<String>,
        elapsed_ms: u64,
    },
    Failure {
        message: String,
    },
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn row_count(&self) -> usize {
        match self {
            Self::Success { rows, .. } => rows.len(),
            Self::Failure { .. } => 0,
        }
    }
}

// ============================================================================
// Stage Errors
// ============================================================================

/// Error taxonomy carried in the state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[default]
    None,
    InvalidRole,
    PermissionDenied,
    SqlError,
    NoResults,
    Internal,
}

/// Stage-local failure with separate internal and user-facing messages.
/// Raw storage-layer text never reaches `user_message`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageError {
    pub kind: ErrorKind,
    /// Diagnostic detail, logged but never shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    /// Friendly message shown to the user, if a stage composed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    /// Fuzzy suggestions attached to a no-results error.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

// ============================================================================
// Pipeline State
// ============================================================================

/// The per-request record threaded through every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub request_id: Uuid,
    /// Already-sanitized query text from the upstream layer.
    pub raw_query: String,
    pub origin: Origin,
    pub identity: Identity,
    pub intent: Option<Intent>,
    /// Classification confidence in `[0, 1]`.
    pub confidence: f32,
    pub entities: Entities,
    /// Ambient context merged by the orchestrator, e.g. today's date.
    /// Kept apart from `entities.values`, which holds only what the
    /// user actually said.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    pub synthesized_query: Option<SynthesizedQuery>,
    pub execution_outcome: Option<ExecutionOutcome>,
    /// Re-synthesis attempts so far; never exceeds `max_retries`.
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: StageError,
    /// Ordered trace of stages visited, for observability.
    pub visited_stages: Vec<String>,
}

impl PipelineState {
    pub fn new(raw_query: impl Into<String>, origin: Origin, identity: Identity, max_retries: u32) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            raw_query: raw_query.into(),
            origin,
            identity,
            intent: None,
            confidence: 0.0,
            entities: Entities::default(),
            context: BTreeMap::new(),
            synthesized_query: None,
            execution_outcome: None,
            retry_count: 0,
            max_retries,
            error: StageError::default(),
            visited_stages: Vec::new(),
        }
    }

    /// Append a stage name to the trace.
    pub fn visit(&mut self, stage: &str) {
        self.visited_stages.push(stage.to_string());
    }

    /// Whether any stage recorded an error.
    pub fn has_error(&self) -> bool {
        self.error.kind != ErrorKind::None
    }

    /// Whether a recorded error short-circuits the query stages.
    /// Internal classification degradation does not; the pipeline still
    /// produces a clarification reply.
    pub fn has_blocking_error(&self) -> bool {
        matches!(
            self.error.kind,
            ErrorKind::InvalidRole | ErrorKind::PermissionDenied | ErrorKind::SqlError
        )
    }

    /// Record a stage failure.
    pub fn fail(
        &mut self,
        kind: ErrorKind,
        internal_message: impl Into<String>,
        user_message: Option<String>,
    ) {
        self.error.kind = kind;
        self.error.internal_message = Some(internal_message.into());
        if user_message.is_some() {
            self.error.user_message = user_message;
        }
    }
}
