//! Configuration types for the enrichment pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built once at startup through
//! [`PipelineConfigBuilder`] and passed by reference to each stage. The
//! on-disk names of the output tree live in [`Layout`] so the resume, repair
//! and retry entry points agree with the run that produced the tree.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use crate::prompts::{DEFAULT_REFUSAL_PHRASES, DESCRIBE_IMAGE_PROMPT};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for a pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use doc2md_enrich::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .model("llava:13b")
///     .max_dimension(768)
///     .request_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_dimension, 768);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Vision model identifier. Default: `qwen2.5vl:7b`.
    ///
    /// Also printed in every description blockquote of the final Markdown.
    pub model: String,

    /// Chat endpoint of the native Ollama describer.
    /// Default: `http://localhost:11434/api/chat`.
    pub endpoint: String,

    /// Provider name routed through `edgequake-llm` (e.g. "openai", "anthropic").
    /// If None, the native Ollama describer is used.
    pub provider_name: Option<String>,

    /// Per-request timeout for the description call, in seconds. Default: 600.
    ///
    /// A timeout is a per-image failure recorded as an error sentinel.
    pub request_timeout_secs: u64,

    /// Extra attempts after a failed description request. Default: 0.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Sampling temperature (edgequake-llm route only). Default: 0.1.
    pub temperature: f32,

    /// Maximum completion tokens (edgequake-llm route only). Default: 2048.
    pub max_tokens: usize,

    /// Instruction sent with every image.
    pub prompt: String,

    /// Case-insensitive phrases that turn an answer into the refusal sentinel.
    pub refusal_phrases: Vec<String>,

    /// Longest allowed side of an optimised image, in pixels. Default: 1024.
    pub max_dimension: u32,

    /// Marker the converter leaves where an image belongs. Default: `<!-- image -->`.
    pub placeholder: String,

    /// Label of the description blockquote. Default: `Descripción`.
    pub description_label: String,

    /// Text used when an image has no description at assembly time.
    pub missing_description: String,

    /// Characters of the description reused as image alt text. Default: 100.
    pub alt_text_chars: usize,

    /// Lower-case extensions accepted as source documents. Default: pdf, docx.
    pub supported_extensions: Vec<String>,

    /// Names of the output tree.
    pub layout: Layout,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "qwen2.5vl:7b".to_string(),
            endpoint: "http://localhost:11434/api/chat".to_string(),
            provider_name: None,
            request_timeout_secs: 600,
            max_retries: 0,
            retry_backoff_ms: 500,
            temperature: 0.1,
            max_tokens: 2048,
            prompt: DESCRIBE_IMAGE_PROMPT.to_string(),
            refusal_phrases: DEFAULT_REFUSAL_PHRASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_dimension: 1024,
            placeholder: "<!-- image -->".to_string(),
            description_label: "Descripción".to_string(),
            missing_description: "Descripción no disponible.".to_string(),
            alt_text_chars: 100,
            supported_extensions: vec!["pdf".to_string(), "docx".to_string()],
            layout: Layout::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("provider_name", &self.provider_name)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("max_dimension", &self.max_dimension)
            .field("placeholder", &self.placeholder)
            .field("supported_extensions", &self.supported_extensions)
            .field("layout", &self.layout)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// True if `ext` (without the dot, any case) is a supported document type.
    pub fn is_supported_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.supported_extensions.iter().any(|e| *e == ext)
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = prompt.into();
        self
    }

    pub fn refusal_phrases(mut self, phrases: Vec<String>) -> Self {
        self.config.refusal_phrases = phrases;
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px;
        self
    }

    pub fn placeholder(mut self, marker: impl Into<String>) -> Self {
        self.config.placeholder = marker.into();
        self
    }

    pub fn description_label(mut self, label: impl Into<String>) -> Self {
        self.config.description_label = label.into();
        self
    }

    pub fn missing_description(mut self, text: impl Into<String>) -> Self {
        self.config.missing_description = text.into();
        self
    }

    pub fn supported_extensions(mut self, exts: Vec<String>) -> Self {
        self.config.supported_extensions =
            exts.into_iter().map(|e| e.to_ascii_lowercase()).collect();
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("Model name must not be empty".into()));
        }
        if c.max_dimension < 16 {
            return Err(PipelineError::InvalidConfig(format!(
                "max_dimension must be ≥ 16, got {}",
                c.max_dimension
            )));
        }
        if c.request_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Request timeout must be ≥ 1s".into(),
            ));
        }
        if c.placeholder.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Placeholder marker must not be empty".into(),
            ));
        }
        if c.supported_extensions.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "At least one supported extension is required".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Output tree ──────────────────────────────────────────────────────────

/// Names of the directories and files making up a work directory.
///
/// ```text
/// <input>_processed_NN/
///   00_log/bitacora_procesamiento.log
///   01_documentos_originales/
///   02_artefactos_extraidos/<work>/
///       texto_extraido.txt
///       imagenes_originales/img_001.png
///       imagenes_optimizadas/img_001.png
///       tablas_extraidas/
///       metadatos.json
///   03_markdown_final/<work>.md
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub logs_dir: String,
    pub originals_dir: String,
    pub artifacts_dir: String,
    pub final_markdown_dir: String,
    pub log_file: String,
    pub text_file: String,
    pub original_images_dir: String,
    pub optimized_images_dir: String,
    pub tables_dir: String,
    pub metadata_file: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            logs_dir: "00_log".to_string(),
            originals_dir: "01_documentos_originales".to_string(),
            artifacts_dir: "02_artefactos_extraidos".to_string(),
            final_markdown_dir: "03_markdown_final".to_string(),
            log_file: "bitacora_procesamiento.log".to_string(),
            text_file: "texto_extraido.txt".to_string(),
            original_images_dir: "imagenes_originales".to_string(),
            optimized_images_dir: "imagenes_optimizadas".to_string(),
            tables_dir: "tablas_extraidas".to_string(),
            metadata_file: "metadatos.json".to_string(),
        }
    }
}
