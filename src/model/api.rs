//! API-based model service (OpenAI-compatible chat completions).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::{ModelError, Result};

use super::ModelService;

/// OpenAI-compatible chat completion service.
pub struct ApiModelService {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

/// Chat completion request format.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Chat completion response format.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenAI error response format.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl ApiModelService {
    /// Create a new model service from configuration.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("CONSULTA_API_KEY").ok())
            .ok_or_else(|| {
                ModelError::Api(
                    "API key not provided and CONSULTA_API_KEY env var not set".to_string(),
                )
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
        })
    }

    async fn request_completion(&self, system: &str, user: &str) -> std::result::Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else if e.is_connect() {
                    ModelError::Connection(format!("Connection failed: {}", e))
                } else {
                    ModelError::Connection(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();

        if status.is_success() {
            let result: ChatResponse = response
                .json()
                .await
                .map_err(|e| ModelError::MalformedResponse(format!("Failed to parse response: {}", e)))?;

            result
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| ModelError::MalformedResponse("empty completion".to_string()))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_text) {
                Err(ModelError::Api(format!(
                    "API error ({}): {}",
                    status, error_response.error.message
                )))
            } else {
                Err(ModelError::Api(format!("API error ({}): {}", status, error_text)))
            }
        }
    }
}

#[async_trait]
impl ModelService for ApiModelService {
    async fn complete(&self, system: &str, user: &str) -> std::result::Result<String, ModelError> {
        self.request_completion(system, user).await
    }
}
