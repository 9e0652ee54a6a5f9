//! Error types for the doc2md-enrich library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Stage-fatal**: the current stage cannot finish for
//!   this work (no usable source, corrupt state document, missing assembly
//!   inputs). The orchestrator records it and moves on to the next work; only
//!   [`PipelineError::InputNotFound`] and configuration errors stop a run.
//!
//! * [`ItemError`] — **Non-fatal**: a single image failed to optimise or to
//!   be described. It is logged and either left as an absent field (retried
//!   on the next run) or persisted as a sentinel string.

use std::path::PathBuf;
use thiserror::Error;

/// Stage-fatal and run-fatal errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The root input path given on the command line does not exist.
    #[error("Input path not found: '{path}'")]
    InputNotFound { path: PathBuf },

    /// No usable text or image source could be resolved for a work.
    #[error("No usable source documents for work '{work}'")]
    SourceNotFound { work: String },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// The external converter produced no usable text for the work.
    #[error("Conversion failed for work '{work}': {detail}")]
    ConversionFailure { work: String, detail: String },

    /// The JSON state document is unreadable or has the wrong shape.
    #[error("State document '{path}' is corrupt: {detail}")]
    StateCorruption { path: PathBuf, detail: String },

    /// Base text or metadata is missing, so the final Markdown cannot be built.
    #[error("Cannot assemble Markdown: required artifact '{path}' is missing")]
    AssemblyPrerequisiteMissing { path: PathBuf },

    /// Another process holds the advisory lock for this work.
    #[error("Work '{work}' is locked by another process")]
    WorkLocked { work: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The configured description provider could not be created.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        PipelineError::StateCorruption {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}

/// A non-fatal error for a single image.
///
/// Optimisation failures leave `optimized_path` absent; description failures
/// are rendered into the error sentinel stored as the image's description.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    #[error("{id}: cannot read or write image: {detail}")]
    ImageIo { id: String, detail: String },

    #[error("{id}: cannot decode image: {detail}")]
    ImageDecode { id: String, detail: String },

    #[error("{id}: description request failed: {detail}")]
    DescriptionApi { id: String, detail: String },

    #[error("{id}: description request timed out after {secs}s")]
    Timeout { id: String, secs: u64 },
}

/// Errors raised by a [`crate::converter::DocumentConverter`].
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unsupported document type: '{path}'")]
    Unsupported { path: PathBuf },

    #[error("conversion engine failed on '{path}': {detail}")]
    Engine { path: PathBuf, detail: String },

    #[error("malformed image data URI: {0}")]
    DataUri(String),
}

/// Errors raised by a [`crate::describer::ImageDescriber`].
#[derive(Debug, Error)]
pub enum DescribeError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
