//! Consulta: Natural-Language Query Pipeline for Clinic Data
//!
//! A query-orchestration pipeline that turns free-text staff questions
//! ("citas de hoy", "busca a Juan Pérez") into safe, role-filtered
//! answers over a multi-schema relational store: intent classification,
//! permission enforcement, read-only query synthesis, bounded
//! execution, fuzzy recovery on empty results, and response
//! composition.

pub mod access;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod schema;
pub mod state;
pub mod store;

pub use access::{AccessMatrix, PermissionGate, Role};
pub use config::{Config, ModelConfig, PipelineConfig};
pub use error::{ConfigError, ConsultaError, ModelError, Result, StoreError};
pub use model::{ApiModelService, ModelService};
pub use pipeline::{
    CompletionEvent, FuzzyRecovery, IntentClassifier, Orchestrator, PipelineRequest,
    PipelineResponse, QueryExecutor, QuerySynthesizer, ResponseComposer, SuggestionMatch,
};
pub use schema::{Relation, ResourceDescriptor, SchemaCatalog, SchemaTarget};
pub use state::{
    Entities, ErrorKind, ExecutionOutcome, Identity, Intent, Origin, PipelineState, StageError,
    SynthesizedQuery,
};
pub use store::{MemoryStore, QueryRows, RelationalStore, Row};
