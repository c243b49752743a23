//! Error types for the Consulta query pipeline.

use thiserror::Error;

/// Main error type for Consulta operations.
///
/// These are infrastructure errors (configuration, model service,
/// relational store). User-visible pipeline failures such as permission
/// denials are not Rust errors; they are carried in the pipeline state
/// and always rendered as a friendly response.
#[derive(Error, Debug)]
pub enum ConsultaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model service error: {0}")]
    Model(#[from] ModelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors from the text-generation service.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Errors from the relational store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),
}

/// Result type alias for Consulta operations.
pub type Result<T> = std::result::Result<T, ConsultaError>;
