//! Drives works through the stages, one work at a time.
//!
//! Five entry points share the same per-work state machine:
//!
//! ```text
//! Pending ──▶ Extracted ──▶ Optimized ──▶ Described ──▶ Assembled
//!    │
//!    ├──▶ SkippedDone      (final Markdown already exists)
//!    ├──▶ SkippedNoSource  (no usable source documents)
//!    └──▶ SkippedLocked    (another process holds the work)
//! ```
//!
//! A stage error stops that work where it is; whatever was persisted stays
//! on disk as the resumption point and the run moves on to the next work.
//! Only a missing input directory aborts a whole run.

use crate::config::PipelineConfig;
use crate::converter::DocumentConverter;
use crate::describer::ImageDescriber;
use crate::error::PipelineError;
use crate::pipeline::assemble::assemble;
use crate::pipeline::describe::{describe, RetryPolicy};
use crate::pipeline::extract::{extract, regenerate_text};
use crate::pipeline::optimize::optimize;
use crate::pipeline::{Stage, StageReport};
use crate::sources::{self, SourceSet};
use crate::store::ArtifactStore;
use crate::workspace::{WorkLock, WorkPaths, Workspace};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Furthest state a work reached during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkState {
    Pending,
    Extracted,
    Optimized,
    Described,
    Assembled,
}

/// How a work ended in one run.
#[derive(Debug)]
pub enum WorkOutcome {
    /// The final Markdown was (re)written.
    Assembled,
    /// The final Markdown already existed; nothing ran.
    SkippedDone,
    /// No usable source documents were found.
    SkippedNoSource,
    /// Another process holds the work's lock.
    SkippedLocked,
    /// Retry mode found no description matching the policy.
    NothingToRetry,
    /// `stage` failed; later stages did not run.
    Failed { stage: Stage, error: PipelineError },
}

impl WorkOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, WorkOutcome::Failed { .. })
    }
}

impl fmt::Display for WorkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkOutcome::Assembled => f.write_str("assembled"),
            WorkOutcome::SkippedDone => f.write_str("already done"),
            WorkOutcome::SkippedNoSource => f.write_str("skipped: no source documents"),
            WorkOutcome::SkippedLocked => f.write_str("skipped: locked by another process"),
            WorkOutcome::NothingToRetry => f.write_str("nothing to retry"),
            WorkOutcome::Failed { stage, error } => write!(f, "failed in {stage}: {error}"),
        }
    }
}

/// One work's line in a [`RunReport`].
#[derive(Debug)]
pub struct WorkReport {
    pub work: String,
    pub state: WorkState,
    pub outcome: WorkOutcome,
}

/// Per-work outcomes of one run, in processing order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub works: Vec<WorkReport>,
}

impl RunReport {
    pub fn assembled(&self) -> usize {
        self.works
            .iter()
            .filter(|w| matches!(w.outcome, WorkOutcome::Assembled))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.works.iter().filter(|w| w.outcome.is_failure()).count()
    }

    pub fn outcome(&self, work: &str) -> Option<&WorkOutcome> {
        self.works.iter().find(|w| w.work == work).map(|w| &w.outcome)
    }
}

/// The enrichment pipeline: configuration plus the two external capabilities.
pub struct Pipeline {
    config: PipelineConfig,
    converter: Arc<dyn DocumentConverter>,
    describer: Arc<dyn ImageDescriber>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        converter: Arc<dyn DocumentConverter>,
        describer: Arc<dyn ImageDescriber>,
    ) -> Self {
        Self {
            config,
            converter,
            describer,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ── Entry points ─────────────────────────────────────────────────────

    /// Single-directory mode: every supported file directly inside
    /// `input_dir` is one work, named after its file stem.
    pub async fn run_directory(
        &self,
        input_dir: &Path,
        workspace: &Workspace,
    ) -> Result<RunReport, PipelineError> {
        require_dir(input_dir)?;
        let mut seen = HashSet::new();
        let mut works = Vec::new();
        for file in self.list_documents(input_dir)? {
            let Some(stem) = file.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            if !seen.insert(stem.clone()) {
                warn!("Skipping {}: work '{}' already taken", file.display(), stem);
                continue;
            }
            works.push((stem, file));
        }
        info!("Single-directory run over {} documents in {}", works.len(), input_dir.display());

        let mut report = RunReport::default();
        self.run_start(works.len());
        for (index, (name, file)) in works.iter().enumerate() {
            self.work_start(name, index, works.len());
            let paths = workspace.work_paths(name);
            let (state, outcome) = if paths.is_done() {
                (WorkState::Assembled, WorkOutcome::SkippedDone)
            } else {
                workspace.copy_original(file, None);
                self.process_work(&paths, &SourceSet::for_file(file)).await
            };
            self.record(&mut report, name, state, outcome);
        }
        self.run_complete(&report);
        Ok(report)
    }

    /// Corpus mode: every sub-folder of `corpus_dir` is one work whose
    /// sources are picked by [`sources::resolve`].
    pub async fn run_corpus(
        &self,
        corpus_dir: &Path,
        workspace: &Workspace,
    ) -> Result<RunReport, PipelineError> {
        require_dir(corpus_dir)?;
        let works = list_subdirs(corpus_dir)?;
        info!("Corpus run over {} works in {}", works.len(), corpus_dir.display());

        let mut report = RunReport::default();
        self.run_start(works.len());
        for (index, name) in works.iter().enumerate() {
            self.work_start(name, index, works.len());
            let paths = workspace.work_paths(name);
            let (state, outcome) = if paths.is_done() {
                (WorkState::Assembled, WorkOutcome::SkippedDone)
            } else {
                match sources::resolve(&corpus_dir.join(name)) {
                    Ok(set) => {
                        for file in set.all_files() {
                            workspace.copy_original(file, Some(name));
                        }
                        self.process_work(&paths, &set).await
                    }
                    Err(PipelineError::SourceNotFound { .. }) => {
                        warn!(work = %name, "No usable source documents, skipping");
                        (WorkState::Pending, WorkOutcome::SkippedNoSource)
                    }
                    Err(e) => (WorkState::Pending, failed(name, Stage::Extract, e)),
                }
            };
            self.record(&mut report, name, state, outcome);
        }
        self.run_complete(&report);
        Ok(report)
    }

    /// Resume mode: replay Optimize → Assemble for every extracted work of
    /// `workspace` that has no final Markdown yet.
    pub async fn resume(&self, workspace: &Workspace) -> Result<RunReport, PipelineError> {
        let works = workspace.existing_works()?;
        info!("Resuming {} works in {}", works.len(), workspace.root().display());

        let mut report = RunReport::default();
        self.run_start(works.len());
        for (index, name) in works.iter().enumerate() {
            self.work_start(name, index, works.len());
            let paths = workspace.work_paths(name);
            let (state, outcome) = if paths.is_done() {
                (WorkState::Assembled, WorkOutcome::SkippedDone)
            } else {
                match self.lock(&paths) {
                    Ok(_lock) => self.finish_work(&paths).await,
                    Err(outcome) => (WorkState::Pending, outcome),
                }
            };
            self.record(&mut report, name, state, outcome);
        }
        self.run_complete(&report);
        Ok(report)
    }

    /// Text-repair mode: rebuild the base text of the named works from
    /// `corpus_dir`, then re-assemble their final Markdown.
    ///
    /// Images and descriptions already recorded are reused as they are.
    pub async fn repair_text(
        &self,
        corpus_dir: &Path,
        workspace: &Workspace,
        work_ids: &[String],
    ) -> Result<RunReport, PipelineError> {
        require_dir(corpus_dir)?;
        let mut works: Vec<String> = work_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        works.sort();
        works.dedup();
        info!("Repairing text of {} works", works.len());

        let mut report = RunReport::default();
        self.run_start(works.len());
        for (index, name) in works.iter().enumerate() {
            self.work_start(name, index, works.len());
            let paths = workspace.work_paths(name);
            let (state, outcome) = self.repair_work(&corpus_dir.join(name), &paths).await;
            self.record(&mut report, name, state, outcome);
        }
        self.run_complete(&report);
        Ok(report)
    }

    /// Retry mode: clear the descriptions `policy` selects, describe those
    /// images again and re-assemble. Works with nothing to retry are untouched.
    pub async fn retry_descriptions(
        &self,
        workspace: &Workspace,
        policy: RetryPolicy,
    ) -> Result<RunReport, PipelineError> {
        let works = workspace.existing_works()?;
        info!("Retrying descriptions ({policy:?}) across {} works", works.len());

        let mut report = RunReport::default();
        self.run_start(works.len());
        for (index, name) in works.iter().enumerate() {
            self.work_start(name, index, works.len());
            let paths = workspace.work_paths(name);
            let (state, outcome) = self.retry_work(&paths, policy).await;
            self.record(&mut report, name, state, outcome);
        }
        self.run_complete(&report);
        Ok(report)
    }

    // ── Per-work drivers ─────────────────────────────────────────────────

    async fn process_work(&self, paths: &WorkPaths, sources: &SourceSet) -> (WorkState, WorkOutcome) {
        let _lock = match self.lock(paths) {
            Ok(lock) => lock,
            Err(outcome) => return (WorkState::Pending, outcome),
        };
        // Another process may have finished it before we got the lock.
        if paths.is_done() {
            return (WorkState::Assembled, WorkOutcome::SkippedDone);
        }

        self.stage_start(&paths.work, Stage::Extract);
        if let Err(e) = extract(sources, paths, &self.converter, &self.config).await {
            return (WorkState::Pending, failed(&paths.work, Stage::Extract, e));
        }
        self.finish_work(paths).await
    }

    /// Optimize → Describe → Assemble on an extracted work. Caller holds the lock.
    async fn finish_work(&self, paths: &WorkPaths) -> (WorkState, WorkOutcome) {
        let start = Instant::now();
        let mut state = WorkState::Extracted;

        self.stage_start(&paths.work, Stage::Optimize);
        match self.run_optimize(paths).await {
            Ok(r) => log_item_failures(&paths.work, Stage::Optimize, &r),
            Err(e) => return (state, failed(&paths.work, Stage::Optimize, e)),
        }
        state = WorkState::Optimized;

        self.stage_start(&paths.work, Stage::Describe);
        match describe(paths, self.describer.as_ref(), &self.config).await {
            Ok(r) => log_item_failures(&paths.work, Stage::Describe, &r),
            Err(e) => return (state, failed(&paths.work, Stage::Describe, e)),
        }
        state = WorkState::Described;

        self.stage_start(&paths.work, Stage::Assemble);
        if let Err(e) = assemble(paths, &self.config) {
            return (state, failed(&paths.work, Stage::Assemble, e));
        }
        info!(work = %paths.work, "Completed in {}ms", start.elapsed().as_millis());
        (WorkState::Assembled, WorkOutcome::Assembled)
    }

    async fn repair_work(&self, work_root: &Path, paths: &WorkPaths) -> (WorkState, WorkOutcome) {
        if !paths.artifact_dir.is_dir() {
            let e = PipelineError::AssemblyPrerequisiteMissing {
                path: paths.artifact_dir.clone(),
            };
            return (WorkState::Pending, failed(&paths.work, Stage::Extract, e));
        }
        let sources = match sources::resolve(work_root) {
            Ok(s) => s,
            Err(PipelineError::SourceNotFound { .. }) => {
                warn!(work = %paths.work, "No text sources in {}", work_root.display());
                return (WorkState::Pending, WorkOutcome::SkippedNoSource);
            }
            Err(e) => return (WorkState::Pending, failed(&paths.work, Stage::Extract, e)),
        };
        let _lock = match self.lock(paths) {
            Ok(lock) => lock,
            Err(outcome) => return (WorkState::Pending, outcome),
        };

        self.stage_start(&paths.work, Stage::Extract);
        if let Err(e) = regenerate_text(&sources, paths, &self.converter).await {
            return (WorkState::Pending, failed(&paths.work, Stage::Extract, e));
        }
        self.stage_start(&paths.work, Stage::Assemble);
        match assemble(paths, &self.config) {
            Ok(()) => (WorkState::Assembled, WorkOutcome::Assembled),
            Err(e) => (WorkState::Extracted, failed(&paths.work, Stage::Assemble, e)),
        }
    }

    async fn retry_work(&self, paths: &WorkPaths, policy: RetryPolicy) -> (WorkState, WorkOutcome) {
        let store = ArtifactStore::new(&paths.metadata);
        if !store.exists() {
            debug!(work = %paths.work, "No state document, nothing to retry");
            return (WorkState::Pending, WorkOutcome::NothingToRetry);
        }
        let _lock = match self.lock(paths) {
            Ok(lock) => lock,
            Err(outcome) => return (WorkState::Pending, outcome),
        };

        let cleared = match store.clear_descriptions(|image| policy.needs_retry(image)) {
            Ok(ids) => ids,
            Err(e) => return (WorkState::Pending, failed(&paths.work, Stage::Describe, e)),
        };
        if cleared.is_empty() {
            return (WorkState::Described, WorkOutcome::NothingToRetry);
        }
        info!(work = %paths.work, "Retrying {} descriptions", cleared.len());

        self.stage_start(&paths.work, Stage::Describe);
        match describe(paths, self.describer.as_ref(), &self.config).await {
            Ok(r) => log_item_failures(&paths.work, Stage::Describe, &r),
            Err(e) => return (WorkState::Optimized, failed(&paths.work, Stage::Describe, e)),
        }
        self.stage_start(&paths.work, Stage::Assemble);
        match assemble(paths, &self.config) {
            Ok(()) => (WorkState::Assembled, WorkOutcome::Assembled),
            Err(e) => (WorkState::Described, failed(&paths.work, Stage::Assemble, e)),
        }
    }

    async fn run_optimize(&self, paths: &WorkPaths) -> Result<StageReport, PipelineError> {
        let owned = paths.clone();
        let max_dimension = self.config.max_dimension;
        tokio::task::spawn_blocking(move || optimize(&owned, max_dimension))
            .await
            .map_err(|e| PipelineError::Internal(format!("Optimize task panicked: {e}")))?
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn lock(&self, paths: &WorkPaths) -> Result<WorkLock, WorkOutcome> {
        match WorkLock::acquire(paths) {
            Ok(lock) => Ok(lock),
            Err(PipelineError::WorkLocked { .. }) => {
                warn!(work = %paths.work, "Locked by another process, skipping");
                Err(WorkOutcome::SkippedLocked)
            }
            Err(e) => Err(failed(&paths.work, Stage::Extract, e)),
        }
    }

    /// Supported documents directly inside `dir`, sorted by file name.
    fn list_documents(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| !is_hidden(p))
            .filter(|p| {
                p.extension()
                    .is_some_and(|e| self.config.is_supported_extension(&e.to_string_lossy()))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn record(&self, report: &mut RunReport, work: &str, state: WorkState, outcome: WorkOutcome) {
        if let Some(cb) = &self.config.progress_callback {
            cb.on_work_complete(work, &outcome);
        }
        report.works.push(WorkReport {
            work: work.to_string(),
            state,
            outcome,
        });
    }

    fn run_start(&self, total: usize) {
        if let Some(cb) = &self.config.progress_callback {
            cb.on_run_start(total);
        }
    }

    fn work_start(&self, work: &str, index: usize, total: usize) {
        info!("[{}/{}] {}", index + 1, total, work);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_work_start(work, index + 1, total);
        }
    }

    fn stage_start(&self, work: &str, stage: Stage) {
        debug!(work, %stage, "Stage start");
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_start(work, stage);
        }
    }

    fn run_complete(&self, report: &RunReport) {
        info!(
            "Run complete: {} works, {} assembled, {} failed",
            report.works.len(),
            report.assembled(),
            report.failed()
        );
        if let Some(cb) = &self.config.progress_callback {
            cb.on_run_complete(report.works.len(), report.assembled());
        }
    }
}

fn failed(work: &str, stage: Stage, error: PipelineError) -> WorkOutcome {
    error!(work, %stage, "{error}");
    WorkOutcome::Failed { stage, error }
}

fn log_item_failures(work: &str, stage: Stage, report: &StageReport) {
    if !report.is_clean() {
        warn!(
            work,
            %stage,
            "{}/{} items failed",
            report.failures.len(),
            report.attempted
        );
    }
}

fn require_dir(path: &Path) -> Result<(), PipelineError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(PipelineError::InputNotFound {
            path: path.to_path_buf(),
        })
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with('.') || n.starts_with("~$"))
}

/// Non-hidden sub-directories of `dir`, sorted by name.
fn list_subdirs(dir: &Path) -> Result<Vec<String>, PipelineError> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && !is_hidden(p))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered() {
        assert!(WorkState::Pending < WorkState::Extracted);
        assert!(WorkState::Described < WorkState::Assembled);
    }

    #[test]
    fn outcome_display() {
        let f = WorkOutcome::Failed {
            stage: Stage::Describe,
            error: PipelineError::corrupt("/w/metadatos.json", "bad"),
        };
        assert!(f.to_string().starts_with("failed in describe: "));
        assert_eq!(WorkOutcome::SkippedDone.to_string(), "already done");
    }

    #[test]
    fn report_counts() {
        let mut r = RunReport::default();
        for (work, outcome) in [
            ("a", WorkOutcome::Assembled),
            ("b", WorkOutcome::SkippedDone),
            (
                "c",
                WorkOutcome::Failed {
                    stage: Stage::Extract,
                    error: PipelineError::SourceNotFound { work: "c".into() },
                },
            ),
        ] {
            r.works.push(WorkReport {
                work: work.into(),
                state: WorkState::Pending,
                outcome,
            });
        }
        assert_eq!(r.assembled(), 1);
        assert_eq!(r.failed(), 1);
        assert!(matches!(r.outcome("b"), Some(WorkOutcome::SkippedDone)));
        assert!(r.outcome("z").is_none());
    }

    #[test]
    fn hidden_and_lock_files_are_ignored() {
        assert!(is_hidden(Path::new("/in/.DS_Store")));
        assert!(is_hidden(Path::new("/in/~$doc.docx")));
        assert!(!is_hidden(Path::new("/in/doc.docx")));
    }
}
