//! Output tree bootstrap and per-work paths.
//!
//! A fresh run never writes into an existing tree: [`Workspace::create_numbered`]
//! picks the first free `<input>_processed_NN` sibling of the input. The
//! resume, repair and retry entry points reopen an existing tree with
//! [`Workspace::open`] instead.

use crate::config::Layout;
use crate::error::PipelineError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Highest suffix tried by [`Workspace::create_numbered`].
const MAX_ATTEMPTS: u32 = 999;

/// Name of the advisory lock file inside each artifact directory.
const LOCK_FILE: &str = ".lock";

/// A work directory holding logs, originals, artifacts and final Markdown.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    layout: Layout,
}

impl Workspace {
    /// Create `<parent>/<basename>_processed_NN` next to `input_root`.
    pub fn create_numbered(input_root: &Path, layout: &Layout) -> Result<Self, PipelineError> {
        if !input_root.exists() {
            return Err(PipelineError::InputNotFound {
                path: input_root.to_path_buf(),
            });
        }
        let base = input_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());
        let parent = input_root.parent().unwrap_or_else(|| Path::new("."));

        for attempt in 1..=MAX_ATTEMPTS {
            let candidate = parent.join(format!("{base}_processed_{attempt:02}"));
            // create_dir (not create_dir_all) fails if another run grabbed it first.
            match fs::create_dir(&candidate) {
                Ok(()) => {
                    info!("Created output directory: {}", candidate.display());
                    let ws = Self {
                        root: candidate,
                        layout: layout.clone(),
                    };
                    ws.ensure_dirs()?;
                    return Ok(ws);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(PipelineError::io(candidate, e)),
            }
        }

        Err(PipelineError::Internal(format!(
            "no free output directory name for '{}' after {MAX_ATTEMPTS} attempts",
            input_root.display()
        )))
    }

    /// Open an existing work directory.
    pub fn open(root: &Path, layout: &Layout) -> Result<Self, PipelineError> {
        if !root.is_dir() {
            return Err(PipelineError::InputNotFound {
                path: root.to_path_buf(),
            });
        }
        let ws = Self {
            root: root.to_path_buf(),
            layout: layout.clone(),
        };
        ws.ensure_dirs()?;
        Ok(ws)
    }

    fn ensure_dirs(&self) -> Result<(), PipelineError> {
        for dir in [
            self.logs_dir(),
            self.originals_dir(),
            self.artifacts_dir(),
            self.final_markdown_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(&self.layout.logs_dir)
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(&self.layout.log_file)
    }

    pub fn originals_dir(&self) -> PathBuf {
        self.root.join(&self.layout.originals_dir)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(&self.layout.artifacts_dir)
    }

    pub fn final_markdown_dir(&self) -> PathBuf {
        self.root.join(&self.layout.final_markdown_dir)
    }

    /// All paths belonging to one work.
    pub fn work_paths(&self, work: &str) -> WorkPaths {
        let artifact_dir = self.artifacts_dir().join(work);
        WorkPaths {
            work: work.to_string(),
            text_file: artifact_dir.join(&self.layout.text_file),
            original_images: artifact_dir.join(&self.layout.original_images_dir),
            optimized_images: artifact_dir.join(&self.layout.optimized_images_dir),
            tables: artifact_dir.join(&self.layout.tables_dir),
            metadata: artifact_dir.join(&self.layout.metadata_file),
            final_markdown: self.final_markdown_dir().join(format!("{work}.md")),
            artifacts_link_prefix: format!("../{}/{}", self.layout.artifacts_dir, work),
            original_images_rel: self.layout.original_images_dir.clone(),
            optimized_images_rel: self.layout.optimized_images_dir.clone(),
            artifact_dir,
        }
    }

    /// Names of the works with an artifact directory, sorted.
    pub fn existing_works(&self) -> Result<Vec<String>, PipelineError> {
        let dir = self.artifacts_dir();
        let entries = fs::read_dir(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Copy a source document into the originals folder.
    ///
    /// `subdir` groups the copies of a multi-file work. Failures are logged
    /// and swallowed: the copy is a convenience, not a pipeline input.
    pub fn copy_original(&self, source: &Path, subdir: Option<&str>) {
        let target_dir = match subdir {
            Some(s) => self.originals_dir().join(s),
            None => self.originals_dir(),
        };
        let Some(name) = source.file_name() else {
            return;
        };
        let target = target_dir.join(name);
        let result = fs::create_dir_all(&target_dir).and_then(|_| fs::copy(source, &target));
        match result {
            Ok(_) => debug!("Copied original {} → {}", source.display(), target.display()),
            Err(e) => warn!("Could not copy original '{}': {}", source.display(), e),
        }
    }
}

/// Paths of one work inside a [`Workspace`].
#[derive(Debug, Clone)]
pub struct WorkPaths {
    pub work: String,
    pub artifact_dir: PathBuf,
    pub text_file: PathBuf,
    pub original_images: PathBuf,
    pub optimized_images: PathBuf,
    pub tables: PathBuf,
    pub metadata: PathBuf,
    pub final_markdown: PathBuf,
    /// Artifact directory as seen from the final-Markdown directory.
    pub artifacts_link_prefix: String,
    /// `original_images` relative to `artifact_dir`.
    pub original_images_rel: String,
    /// `optimized_images` relative to `artifact_dir`.
    pub optimized_images_rel: String,
}

impl WorkPaths {
    /// Create the artifact sub-directories. Idempotent.
    pub fn ensure_dirs(&self) -> Result<(), PipelineError> {
        for dir in [&self.original_images, &self.optimized_images, &self.tables] {
            fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        Ok(())
    }

    /// The top-level completion marker.
    pub fn is_done(&self) -> bool {
        self.final_markdown.exists()
    }

    /// Resolve a path stored in the state document against the artifact dir.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.artifact_dir.clone(), |p, seg| p.join(seg))
    }

    /// Link to an artifact-relative path, as written in the final Markdown.
    pub fn markdown_link(&self, relative: &str) -> String {
        format!("{}/{}", self.artifacts_link_prefix, relative)
    }
}

/// Write `bytes` to `path` through a temp file in the same directory and a rename.
///
/// Readers see either the previous file or the complete new one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| PipelineError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| PipelineError::io(path, e.error))?;
    Ok(())
}

/// Exclusive advisory lock on one work's artifact directory.
///
/// Held by the orchestrator while it drives a work through its stages, so
/// two processes never read-modify-write the same state document. Released
/// when dropped.
#[derive(Debug)]
pub struct WorkLock {
    file: File,
    path: PathBuf,
}

impl WorkLock {
    /// Try to lock `paths`, creating the artifact directory if needed.
    ///
    /// Returns [`PipelineError::WorkLocked`] without blocking if another
    /// process holds the lock.
    pub fn acquire(paths: &WorkPaths) -> Result<Self, PipelineError> {
        fs::create_dir_all(&paths.artifact_dir)
            .map_err(|e| PipelineError::io(&paths.artifact_dir, e))?;
        let path = paths.artifact_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| PipelineError::io(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Locked {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(PipelineError::WorkLocked {
                    work: paths.work.clone(),
                })
            }
            Err(e) => Err(PipelineError::io(&path, e)),
        }
    }
}

impl Drop for WorkLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
