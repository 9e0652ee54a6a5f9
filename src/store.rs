//! The per-work JSON state document (`metadatos.json`).
//!
//! Stages never keep the document in memory across items: every incremental
//! update goes through [`ArtifactStore::patch_image_field`], which re-reads
//! the file, changes one field of one image and rewrites the whole document.
//! Writes go to a temp file in the same directory followed by an atomic
//! rename, so a kill at any instant leaves either the old or the new
//! document on disk, never a truncated one.
//!
//! The store assumes a single writer per work; the orchestrator guarantees
//! it by holding a [`crate::workspace::WorkLock`].

use crate::error::PipelineError;
use crate::sources::SourceSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Provenance of the inputs a work was extracted from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFiles {
    pub text: Vec<String>,
    pub image: Vec<String>,
}

impl From<&SourceSet> for SourceFiles {
    fn from(s: &SourceSet) -> Self {
        let render = |v: &[PathBuf]| -> Vec<String> { v.iter().map(|p| p.display().to_string()).collect() };
        Self {
            text: render(&s.text),
            image: render(&s.image),
        }
    }
}

/// One extracted image and its progress through Optimize and Describe.
///
/// Paths are relative to the work's artifact directory, `/`-separated.
/// Absent fields serialise as JSON `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub id: String,
    pub original_path: String,
    #[serde(default)]
    pub optimized_path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ImageArtifact {
    pub fn new(id: impl Into<String>, original_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            original_path: original_path.into(),
            optimized_path: None,
            description: None,
        }
    }

    /// Eligible for the Optimize stage.
    pub fn needs_optimization(&self) -> bool {
        self.optimized_path.is_none()
    }

    /// Eligible for the Describe stage: optimised, and no result recorded yet.
    ///
    /// A recorded sentinel counts as "done" here; see
    /// [`crate::pipeline::describe::RetryPolicy`] for the retry predicates.
    pub fn needs_description(&self) -> bool {
        self.optimized_path.is_some() && self.description.is_none()
    }
}

/// The persisted state of one work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub source_files: SourceFiles,
    pub images: Vec<ImageArtifact>,
    /// Reserved; never filled by the pipeline.
    #[serde(default)]
    pub tables: Vec<serde_json::Value>,
}

impl ArtifactRecord {
    pub fn image(&self, id: &str) -> Option<&ImageArtifact> {
        self.images.iter().find(|i| i.id == id)
    }
}

/// Field of an [`ImageArtifact`] that stages may update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageField {
    OptimizedPath,
    Description,
}

/// Read/write access to one work's state document.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    path: PathBuf,
}

impl ArtifactStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Persist a freshly extracted record. Never overwrites an existing document.
    pub fn create(&self, record: &ArtifactRecord) -> Result<(), PipelineError> {
        validate(&self.path, record)?;
        let tmp = self.write_temp(record)?;
        tmp.persist_noclobber(&self.path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                PipelineError::corrupt(&self.path, "state document already exists")
            } else {
                PipelineError::io(&self.path, e.error)
            }
        })?;
        debug!("Created {} with {} images", self.path.display(), record.images.len());
        Ok(())
    }

    /// Read and validate the document.
    ///
    /// # Errors
    /// [`PipelineError::StateCorruption`] if the file is missing, is not JSON,
    /// or does not have the `ArtifactRecord` shape (including duplicate ids).
    pub fn load(&self) -> Result<ArtifactRecord, PipelineError> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::corrupt(&self.path, "state document not found")
            } else {
                PipelineError::io(&self.path, e)
            }
        })?;
        let record: ArtifactRecord =
            serde_json::from_slice(&bytes).map_err(|e| PipelineError::corrupt(&self.path, e))?;
        validate(&self.path, &record)?;
        Ok(record)
    }

    /// Set one field of one image and persist the whole document.
    ///
    /// Re-reads the file first so updates already on disk are never lost.
    /// Returns the record as written.
    pub fn patch_image_field(
        &self,
        image_id: &str,
        field: ImageField,
        value: Option<String>,
    ) -> Result<ArtifactRecord, PipelineError> {
        let mut record = self.load()?;
        let image = record
            .images
            .iter_mut()
            .find(|i| i.id == image_id)
            .ok_or_else(|| {
                PipelineError::corrupt(&self.path, format!("no image with id '{image_id}'"))
            })?;
        match field {
            ImageField::OptimizedPath => image.optimized_path = value,
            ImageField::Description => image.description = value,
        }
        self.replace(&record)?;
        debug!(image = image_id, ?field, "Patched {}", self.path.display());
        Ok(record)
    }

    /// Clear the description of every image matching `predicate`.
    ///
    /// Returns the ids that were cleared; writes nothing if none matched.
    pub fn clear_descriptions<F>(&self, predicate: F) -> Result<Vec<String>, PipelineError>
    where
        F: Fn(&ImageArtifact) -> bool,
    {
        let mut record = self.load()?;
        let mut cleared = Vec::new();
        for image in record.images.iter_mut().filter(|i| predicate(i)) {
            image.description = None;
            cleared.push(image.id.clone());
        }
        if !cleared.is_empty() {
            self.replace(&record)?;
        }
        Ok(cleared)
    }

    fn replace(&self, record: &ArtifactRecord) -> Result<(), PipelineError> {
        let tmp = self.write_temp(record)?;
        tmp.persist(&self.path)
            .map_err(|e| PipelineError::io(&self.path, e.error))?;
        Ok(())
    }

    fn write_temp(&self, record: &ArtifactRecord) -> Result<NamedTempFile, PipelineError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| PipelineError::Internal(format!("serialise state: {e}")))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(dir, e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| PipelineError::io(tmp.path(), e))?;
        Ok(tmp)
    }
}

fn validate(path: &Path, record: &ArtifactRecord) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    for image in &record.images {
        if image.id.is_empty() {
            return Err(PipelineError::corrupt(path, "image with empty id"));
        }
        if !seen.insert(image.id.as_str()) {
            return Err(PipelineError::corrupt(
                path,
                format!("duplicate image id '{}'", image.id),
            ));
        }
    }
    Ok(())
}
