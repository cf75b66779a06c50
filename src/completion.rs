//! Chat-completion service client.
//!
//! The [`CompletionService`] trait decouples the chat flow from the LLM
//! endpoint. [`NimClient`] implements it against an OpenAI-compatible
//! `/chat/completions` API (NVIDIA NIM by default).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::CompletionConfig;
use crate::{AppError, Result};

/// One role-tagged message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A `system` message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    /// A `user` message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Sampling parameters of one completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional `response_format` object passed through verbatim.
    pub response_format: Option<Value>,
}

impl GenerationParams {
    /// Parameters for conversational replies.
    #[must_use]
    pub fn chat() -> Self {
        Self {
            max_tokens: 800,
            temperature: 0.2,
            response_format: None,
        }
    }

    /// Parameters for resume analysis.
    #[must_use]
    pub fn resume_analysis() -> Self {
        Self {
            max_tokens: 900,
            temperature: 0.1,
            response_format: None,
        }
    }
}

/// Something that turns a conversation into generated text.
pub trait CompletionService: Send + Sync {
    /// Generate the next assistant message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Completion`] on transport, HTTP or decoding
    /// failures.
    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        params: &'a GenerationParams,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// `reqwest`-backed client for an OpenAI-compatible completion API.
#[derive(Debug, Clone)]
pub struct NimClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl NimClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Completion`] if the HTTP client cannot be built.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|err| AppError::Completion(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn request(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String> {
        let Some(ref api_key) = self.api_key else {
            return Err(AppError::Completion(
                "missing NVIDIA_API_KEY in environment".into(),
            ));
        };

        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });
        if let Some(ref format) = params.response_format {
            payload["response_format"] = format.clone();
        }

        debug!(
            endpoint = %self.endpoint,
            messages = messages.len(),
            "sending completion request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| AppError::Completion(format!("request failed: {err}")))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "completion endpoint returned an error");
            return Err(AppError::Completion(format!(
                "NIM error {}: {body}",
                status.as_u16()
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| AppError::Completion(format!("invalid response body: {err}")))?;
        extract_content(&data)
    }
}

impl CompletionService for NimClient {
    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        params: &'a GenerationParams,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.request(messages, params))
    }
}

/// Pull `choices[0].message.content` out of a completion response.
///
/// # Errors
///
/// Returns [`AppError::Completion`] when the path is missing or not a string.
pub fn extract_content(data: &Value) -> Result<String> {
    data.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AppError::Completion(format!("unexpected NIM response: {data}")))
}
