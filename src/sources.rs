//! Source selection across competing OCR variants of the same work.
//!
//! A corpus work folder may hold up to three variants of one document:
//!
//! | Subfolder  | Content                         | Text priority | Images |
//! |------------|---------------------------------|---------------|--------|
//! | `ocr_docx` | re-typed / OCR'd Word documents | 1st           | —      |
//! | `ocr_pdf`  | OCR'd PDFs with a text layer    | 2nd           | —      |
//! | `img_pdf`  | scanned page images as PDF      | 3rd           | 1st    |
//!
//! Text and images are resolved independently: the cleanest text and the
//! most faithful rasters usually live in different files.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const OCR_DOCX_DIR: &str = "ocr_docx";
pub const OCR_PDF_DIR: &str = "ocr_pdf";
pub const IMG_PDF_DIR: &str = "img_pdf";

/// Files feeding text and image extraction for one work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSet {
    pub text: Vec<PathBuf>,
    pub image: Vec<PathBuf>,
}

impl SourceSet {
    /// Single-file work: the same file feeds text and images.
    pub fn for_file(path: &Path) -> Self {
        Self {
            text: vec![path.to_path_buf()],
            image: vec![path.to_path_buf()],
        }
    }

    /// Every distinct file, text sources first.
    pub fn all_files(&self) -> Vec<&Path> {
        let mut out: Vec<&Path> = Vec::new();
        for p in self.text.iter().chain(self.image.iter()) {
            if !out.contains(&p.as_path()) {
                out.push(p);
            }
        }
        out
    }
}

/// Resolve the text and image sources of a corpus work folder.
///
/// Text: `ocr_docx/*.docx`, else `ocr_pdf/*.pdf`, else `img_pdf/*.pdf`, else
/// the work root itself (`*.docx` if any, otherwise `*.pdf`). Images:
/// `img_pdf/*.pdf` if present, otherwise whatever won for text. Every list
/// is sorted by file name.
///
/// # Errors
/// [`PipelineError::SourceNotFound`] when either list ends up empty.
pub fn resolve(work_root: &Path) -> Result<SourceSet, PipelineError> {
    let work = work_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let img_pdf = list_with_extension(&work_root.join(IMG_PDF_DIR), "pdf");

    let text = [
        (OCR_DOCX_DIR, "docx"),
        (OCR_PDF_DIR, "pdf"),
        (IMG_PDF_DIR, "pdf"),
    ]
    .iter()
    .map(|(dir, ext)| list_with_extension(&work_root.join(dir), ext))
    .find(|files| !files.is_empty())
    .unwrap_or_else(|| {
        let docx = list_with_extension(work_root, "docx");
        if docx.is_empty() {
            list_with_extension(work_root, "pdf")
        } else {
            docx
        }
    });

    let image = if img_pdf.is_empty() {
        text.clone()
    } else {
        img_pdf
    };

    if text.is_empty() || image.is_empty() {
        return Err(PipelineError::SourceNotFound { work });
    }

    debug!(
        work = %work,
        text = ?text,
        image = ?image,
        "Resolved sources"
    );
    Ok(SourceSet { text, image })
}

/// Sorted regular files in `dir` with extension `ext` (case-insensitive).
///
/// A missing directory yields an empty list. Hidden files and Office lock
/// files (`~$name.docx`) are skipped.
fn list_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            !name.starts_with('.') && !name.starts_with("~$")
        })
        .filter(|p| {
            p.extension()
                .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}
