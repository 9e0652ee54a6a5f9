//! Progress-callback trait for per-work and per-image pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events while a batch runs. The CLI uses it to drive an `indicatif` bar;
//! tests use it to count events.
//!
//! # Example
//!
//! ```rust
//! use doc2md_enrich::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     described: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_image_described(&self, work: &str, image_id: &str, ok: bool) {
//!         self.described.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{work}/{image_id}: {}", if ok { "ok" } else { "sentinel" });
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { described: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::orchestrator::WorkOutcome;
use crate::pipeline::Stage;
use std::sync::Arc;

/// Called by the orchestrator and the stages as a batch progresses.
///
/// The pipeline is sequential, so events arrive in order, but implementations
/// must still be `Send + Sync` because the config is shared behind an `Arc`.
/// All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before the first work, with the number of works found.
    fn on_run_start(&self, total_works: usize) {
        let _ = total_works;
    }

    /// Called when a work enters the pipeline.
    ///
    /// # Arguments
    /// * `work`  — work name
    /// * `index` — 1-indexed position in the batch
    /// * `total` — works in the batch
    fn on_work_start(&self, work: &str, index: usize, total: usize) {
        let _ = (work, index, total);
    }

    /// Called just before a stage runs for a work.
    fn on_stage_start(&self, work: &str, stage: Stage) {
        let _ = (work, stage);
    }

    /// Called after a description (real or sentinel) has been persisted.
    ///
    /// `ok` is false when a sentinel was stored instead of a real description.
    fn on_image_described(&self, work: &str, image_id: &str, ok: bool) {
        let _ = (work, image_id, ok);
    }

    /// Called once per work with its terminal outcome.
    fn on_work_complete(&self, work: &str, outcome: &WorkOutcome) {
        let _ = (work, outcome);
    }

    /// Called once after every work has been attempted.
    ///
    /// # Arguments
    /// * `total_works` — works in the batch
    /// * `assembled`   — works whose final Markdown was written in this run
    fn on_run_complete(&self, total_works: usize, assembled: usize) {
        let _ = (total_works, assembled);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
