//! Pipeline stages for document-to-Markdown enrichment.
//!
//! Each submodule implements exactly one stage. Every stage reads what it
//! needs from the work's state document, filters for the items still
//! missing a result, and persists each result as soon as it exists, so any
//! stage can be re-run after a crash without redoing finished items.
//!
//! ## Data Flow
//!
//! ```text
//! sources ──▶ extract ──▶ optimize ──▶ describe ──▶ assemble
//!  (files)   (converter)  (resize)      (VLM)      (final .md)
//! ```
//!
//! 1. [`extract`]  — convert every source file once, write the base text,
//!    the original images and the seeded state document
//! 2. [`optimize`] — downscale images to the configured maximum side
//! 3. [`describe`] — ask the vision model for one description per image;
//!    the only stage with network I/O
//! 4. [`assemble`] — substitute placeholder markers with image blocks
//!
//! [`encode`] and [`postprocess`] are helpers shared by the stages.

pub mod assemble;
pub mod describe;
pub mod encode;
pub mod extract;
pub mod optimize;
pub mod postprocess;

use crate::error::ItemError;
use std::fmt;

/// One step of the per-work state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Stage {
    Extract,
    Optimize,
    Describe,
    Assemble,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extract => "extract",
            Stage::Optimize => "optimize",
            Stage::Describe => "describe",
            Stage::Assemble => "assemble",
        };
        f.write_str(name)
    }
}

/// Outcome of a per-item stage (Optimize, Describe).
///
/// Item failures never fail the stage; they are reported here and, for
/// Describe, also persisted as sentinels.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    /// Items the stage attempted on this run.
    pub attempted: usize,
    /// Items that got a successful result.
    pub succeeded: usize,
    pub failures: Vec<ItemError>,
}

impl StageReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
