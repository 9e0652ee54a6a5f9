//! Image description through any `edgequake-llm` vision provider.
//!
//! Lets the pipeline use OpenAI, Anthropic, Gemini, Azure or an
//! OpenAI-compatible server instead of a local Ollama. The request is a
//! single user turn carrying the instruction and the PNG attachment.

use super::ImageDescriber;
use crate::config::PipelineConfig;
use crate::error::{DescribeError, PipelineError};
use crate::pipeline::encode::encode_base64;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

/// Describes images with an `edgequake-llm` provider.
pub struct LlmDescriber {
    provider: Arc<dyn LLMProvider>,
    model: String,
    options: CompletionOptions,
}

impl LlmDescriber {
    /// Wrap an already configured provider.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            options: build_options(config),
        }
    }

    /// Create the named provider (API keys come from the environment).
    pub fn from_provider_name(name: &str, config: &PipelineConfig) -> Result<Self, PipelineError> {
        let provider = ProviderFactory::create_llm_provider(name, &config.model).map_err(|e| {
            PipelineError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl ImageDescriber for LlmDescriber {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn describe(&self, png: &[u8], prompt: &str) -> Result<String, DescribeError> {
        let image = ImageData::new(encode_base64(png), "image/png").with_detail("high");
        let messages = vec![ChatMessage::user_with_images(prompt, vec![image])];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| DescribeError::Transport(format!("{e}")))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.model, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
