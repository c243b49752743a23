//! The query-orchestration pipeline.
//!
//! Stages, in order: intent classification, permission gate, query
//! synthesis, execution, fuzzy recovery on empty results, and response
//! composition. The [`Orchestrator`] wires them together with
//! origin-keyed dispatch and a bounded retry loop around
//! synthesize/execute.

pub mod classifier;
pub mod composer;
pub mod executor;
pub mod orchestrator;
pub mod recovery;
pub mod synthesizer;

pub use classifier::IntentClassifier;
pub use composer::ResponseComposer;
pub use executor::QueryExecutor;
pub use orchestrator::{CompletionEvent, Orchestrator, PipelineRequest, PipelineResponse};
pub use recovery::{FuzzyRecovery, SuggestionMatch};
pub use synthesizer::QuerySynthesizer;
