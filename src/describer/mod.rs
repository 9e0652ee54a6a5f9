//! The external image-description capability.
//!
//! One request carries a model id, a fixed instruction and one image; the
//! answer is a single text completion or an error. Timeouts, retries,
//! refusal detection and persistence are the Describe stage's business, so
//! implementations here stay thin.

pub mod llm;
pub mod ollama;

use crate::config::PipelineConfig;
use crate::error::{DescribeError, PipelineError};
use async_trait::async_trait;
use std::sync::Arc;

pub use llm::LlmDescriber;
pub use ollama::OllamaDescriber;

/// Produces a natural-language description of one image.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Describe `png` following `prompt`.
    async fn describe(&self, png: &[u8], prompt: &str) -> Result<String, DescribeError>;
}

/// Build the describer selected by `config`.
///
/// No `provider_name` means the native Ollama chat endpoint; any other name
/// is resolved through `edgequake-llm`.
pub fn from_config(config: &PipelineConfig) -> Result<Arc<dyn ImageDescriber>, PipelineError> {
    match config.provider_name.as_deref() {
        None | Some("ollama-native") => Ok(Arc::new(OllamaDescriber::new(
            &config.endpoint,
            &config.model,
            config.request_timeout_secs,
        )?)),
        Some(name) => Ok(Arc::new(LlmDescriber::from_provider_name(name, config)?)),
    }
}
