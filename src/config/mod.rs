//! Configuration for the Consulta pipeline.

mod settings;

pub use settings::{Config, ModelConfig, PipelineConfig};
