//! Chat completion client.
//!
//! Defines the [`ChatClient`] trait and the production [`OpenAiChat`]
//! implementation, speaking the OpenAI-compatible
//! `POST {base_url}/chat/completions` protocol.
//!
//! Like the embedding client, this performs no internal retries: a failed
//! generation surfaces immediately and the caller decides whether to spend
//! another call on it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::models::Credential;

/// One message in a chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Client for the generation service.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Run one chat completion and return the assistant message text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Chat client for OpenAI-compatible services.
pub struct OpenAiChat {
    base_url: String,
    model: String,
    temperature: f64,
    timeout_secs: u64,
    client: reqwest::Client,
    credential: Credential,
}

impl OpenAiChat {
    pub fn new(config: &GenerationConfig, credential: Credential) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::GenerationService(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            client,
            credential,
        })
    }
}

#[async_trait]
impl ChatClient for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.credential.secret()),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Credential(format!(
                "generation service returned {}: {}",
                status, body_text
            )));
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::GenerationService(format!(
                "{}: {}",
                status, body_text
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::GenerationService(e.to_string()))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                Error::GenerationService(
                    "invalid response: missing message content".to_string(),
                )
            })?;

        Ok(content.to_string())
    }
}

fn transport_error(err: reqwest::Error, timeout_secs: u64) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            operation: "chat completion".to_string(),
            seconds: timeout_secs,
        }
    } else {
        Error::GenerationService(err.to_string())
    }
}
