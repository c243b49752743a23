//! Model service trait.

use async_trait::async_trait;

use crate::error::ModelError;

/// A chat-style text-generation service.
///
/// Every pipeline stage that talks to a model goes through this trait.
/// Callers pass a system prompt and a user prompt and get raw text
/// back; parsing the reply into structured data is the caller's job,
/// because each stage tolerates malformed output differently.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Complete a single system + user prompt pair.
    async fn complete(
        &self,
        system: &str,
        user: &str,
    ) -> std::result::Result<String, ModelError>;
}
