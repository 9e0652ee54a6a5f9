//! Native PDF conversion via pdfium.
//!
//! Reads each page's text layer and every raster image object on the page.
//! There is no OCR and no layout analysis: this backend suits born-digital
//! PDFs or scans that already carry an OCR text layer. Each page's image
//! markers are placed after that page's text, in object order.
//!
//! pdfium keeps thread-local state and is not async-safe; the Extract stage
//! calls converters from `spawn_blocking`.

use super::{ConvertedDocument, DocumentConverter, ExtractedImage};
use crate::error::ConvertError;
use crate::pipeline::encode::encode_png;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Converts PDFs with the pdfium library.
#[derive(Debug, Clone)]
pub struct PdfiumConverter {
    /// Directory holding the platform pdfium library; system library if None.
    library_dir: Option<PathBuf>,
    placeholder: String,
}

impl PdfiumConverter {
    pub fn new(library_dir: Option<PathBuf>, placeholder: impl Into<String>) -> Self {
        Self {
            library_dir,
            placeholder: placeholder.into(),
        }
    }

    fn bind(&self, path: &Path) -> Result<Pdfium, ConvertError> {
        let bindings = match &self.library_dir {
            Some(dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ConvertError::Engine {
            path: path.to_path_buf(),
            detail: format!("cannot bind pdfium library: {e:?}"),
        })?;
        Ok(Pdfium::new(bindings))
    }
}

impl DocumentConverter for PdfiumConverter {
    fn name(&self) -> &str {
        "pdfium"
    }

    fn convert(&self, path: &Path) -> Result<ConvertedDocument, ConvertError> {
        let is_pdf = path
            .extension()
            .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            return Err(ConvertError::Unsupported {
                path: path.to_path_buf(),
            });
        }

        let pdfium = self.bind(path)?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| ConvertError::Engine {
                path: path.to_path_buf(),
                detail: format!("{e:?}"),
            })?;

        let pages = document.pages();
        info!("pdfium: {} pages in {}", pages.len(), path.display());

        let mut page_blocks: Vec<String> = Vec::with_capacity(pages.len() as usize);
        let mut images = Vec::new();

        for (idx, page) in pages.iter().enumerate() {
            let mut block = match page.text() {
                Ok(text) => text.all().trim().to_string(),
                Err(e) => {
                    warn!("pdfium: no text layer on page {}: {:?}", idx + 1, e);
                    String::new()
                }
            };

            for object in page.objects().iter() {
                let Some(image_object) = object.as_image_object() else {
                    continue;
                };
                let encoded = image_object
                    .get_raw_image()
                    .map_err(|e| format!("{e:?}"))
                    .and_then(|img| encode_png(&img).map_err(|e| e.to_string()));
                match encoded {
                    Ok(bytes) => {
                        if !block.is_empty() {
                            block.push_str("\n\n");
                        }
                        block.push_str(&self.placeholder);
                        images.push(ExtractedImage {
                            bytes,
                            mime_type: "image/png".to_string(),
                        });
                    }
                    Err(e) => warn!("pdfium: skipping image on page {}: {}", idx + 1, e),
                }
            }

            debug!("pdfium: page {} → {} chars", idx + 1, block.len());
            page_blocks.push(block);
        }

        Ok(ConvertedDocument {
            markdown: page_blocks.join("\n\n"),
            images,
        })
    }
}
