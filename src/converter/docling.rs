//! Conversion through the external `docling` command-line tool.
//!
//! docling runs layout analysis and OCR and understands both PDF and DOCX.
//! With `--image-export-mode embedded` every picture is written inline as a
//! base64 data URI, which [`super::split_embedded_images`] turns back into
//! placeholder markers plus raw image bytes.

use super::{split_embedded_images, ConvertedDocument, DocumentConverter};
use crate::error::ConvertError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, info};

/// Longest stderr excerpt kept in an error message.
const STDERR_TAIL: usize = 600;

/// Runs `docling <file> --to md --image-export-mode embedded --output <tmp>`.
#[derive(Debug, Clone)]
pub struct DoclingConverter {
    program: PathBuf,
    placeholder: String,
}

impl DoclingConverter {
    /// `program` is the docling executable (usually just `docling` on `PATH`).
    pub fn new(program: impl Into<PathBuf>, placeholder: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            placeholder: placeholder.into(),
        }
    }
}

impl DocumentConverter for DoclingConverter {
    fn name(&self) -> &str {
        "docling"
    }

    fn convert(&self, path: &Path) -> Result<ConvertedDocument, ConvertError> {
        let engine_err = |detail: String| ConvertError::Engine {
            path: path.to_path_buf(),
            detail,
        };

        let out_dir = TempDir::new().map_err(|e| engine_err(format!("temp dir: {e}")))?;
        info!("docling: converting {}", path.display());

        let output = Command::new(&self.program)
            .arg(path)
            .args(["--to", "md", "--image-export-mode", "embedded", "--output"])
            .arg(out_dir.path())
            .output()
            .map_err(|e| engine_err(format!("cannot run '{}': {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(engine_err(format!(
                "exit status {}: {}",
                output.status,
                tail(&stderr, STDERR_TAIL)
            )));
        }

        let md_path = find_markdown(out_dir.path())
            .ok_or_else(|| engine_err("docling produced no .md file".into()))?;
        let markdown = fs::read_to_string(&md_path)
            .map_err(|e| engine_err(format!("read {}: {e}", md_path.display())))?;

        let doc = split_embedded_images(&markdown, &self.placeholder);
        debug!(
            "docling: {} chars, {} images from {}",
            doc.markdown.len(),
            doc.images.len(),
            path.display()
        );
        Ok(doc)
    }
}

/// First `.md` file (by name) in `dir`.
fn find_markdown(dir: &Path) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "md"))
        .collect();
    found.sort();
    found.into_iter().next()
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    let s = s.trim_end();
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
