//! # doc2md-enrich
//!
//! Turn PDF and DOCX documents into Markdown where every embedded image
//! carries a description written by a vision-language model.
//!
//! ## Why this crate?
//!
//! Describing hundreds of images with a local VLM takes hours, and batches
//! get interrupted. This crate keeps a small JSON state document per work and
//! persists every result the moment it exists, so a killed run picks up
//! where it stopped without sending a single finished image to the model
//! again.
//!
//! ## Pipeline Overview
//!
//! ```text
//! work (file or corpus folder)
//!  │
//!  ├─ 0. Sources   pick text and image sources among OCR variants
//!  ├─ 1. Extract   converter → base text + original images + metadatos.json
//!  ├─ 2. Optimize  downscale images (longest side ≤ 1024 px, PNG)
//!  ├─ 3. Describe  one VLM request per image, persisted one by one
//!  └─ 4. Assemble  placeholders → image link + description blockquote
//! ```
//!
//! The final Markdown file is the completion marker: a work whose file
//! exists is skipped entirely on the next run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc2md_enrich::{describer, DoclingConverter, Pipeline, PipelineConfig, Workspace};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let input = Path::new("documentos");
//!     let workspace = Workspace::create_numbered(input, &config.layout)?;
//!
//!     let converter = Arc::new(DoclingConverter::new("docling", &config.placeholder));
//!     let describer = describer::from_config(&config)?;
//!     let pipeline = Pipeline::new(config, converter, describer);
//!
//!     let report = pipeline.run_directory(input, &workspace).await?;
//!     for w in &report.works {
//!         println!("{}: {}", w.work, w.outcome);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! doc2md-enrich = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod converter;
pub mod describer;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod sources;
pub mod store;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Layout, PipelineConfig, PipelineConfigBuilder};
pub use converter::{
    ConvertedDocument, DocumentConverter, DoclingConverter, ExtractedImage, PdfiumConverter,
};
pub use describer::{ImageDescriber, LlmDescriber, OllamaDescriber};
pub use error::{ConvertError, DescribeError, ItemError, PipelineError};
pub use orchestrator::{Pipeline, RunReport, WorkOutcome, WorkReport, WorkState};
pub use pipeline::describe::RetryPolicy;
pub use pipeline::{Stage, StageReport};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use sources::SourceSet;
pub use store::{ArtifactRecord, ArtifactStore, ImageArtifact, ImageField, SourceFiles};
pub use workspace::{WorkLock, WorkPaths, Workspace};
