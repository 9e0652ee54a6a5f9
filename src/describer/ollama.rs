//! Native client for Ollama's `/api/chat` endpoint.
//!
//! Request body:
//!
//! ```json
//! { "model": "qwen2.5vl:7b", "stream": false,
//!   "messages": [{ "role": "user", "content": "<prompt>", "images": ["<base64>"] }] }
//! ```
//!
//! The answer text is `message.content` of the single non-streamed response.

use super::ImageDescriber;
use crate::error::{DescribeError, PipelineError};
use crate::pipeline::encode::encode_base64;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Describes images through a local or remote Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaDescriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OllamaDescriber {
    pub fn new(endpoint: &str, model: &str, timeout_secs: u64) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::ProviderNotConfigured {
                provider: "ollama".to_string(),
                hint: format!("HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
        })
    }

    fn request_body(&self, png: &[u8], prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [{
                "role": "user",
                "content": prompt,
                "images": [encode_base64(png)],
            }],
        })
    }
}

#[async_trait]
impl ImageDescriber for OllamaDescriber {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn describe(&self, png: &[u8], prompt: &str) -> Result<String, DescribeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(png, prompt))
            .send()
            .await
            .map_err(|e| DescribeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(DescribeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DescribeError::InvalidResponse(e.to_string()))?;
        let content = parsed
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();
        debug!("ollama: {} chars from {}", content.len(), self.model);
        Ok(content)
    }
}
