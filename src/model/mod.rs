//! Text-generation service.
//!
//! All model use in the pipeline goes through the [`ModelService`]
//! trait, so tests script responses without a network. The API
//! implementation targets any OpenAI-compatible chat endpoint.

mod api;
pub mod parse;
mod traits;

pub use api::ApiModelService;
pub use traits::ModelService;
