//! The external document-conversion capability.
//!
//! A converter turns one PDF or DOCX file into Markdown-flavoured text plus
//! the raster images embedded in it. The text carries one placeholder
//! marker per image, in the same order as the returned images, so the
//! Assemble stage can later put each description back where its image was.
//!
//! Two backends are provided:
//!
//! * [`docling::DoclingConverter`] — shells out to the `docling` CLI (layout
//!   analysis + OCR, PDF and DOCX) and decodes its embedded data URIs.
//! * [`pdfium::PdfiumConverter`] — native PDF text layer and image objects via
//!   pdfium; no OCR, PDF only, no external process.
//!
//! Converters are synchronous and CPU- or process-bound; the Extract stage
//! runs them on Tokio's blocking pool.

pub mod docling;
pub mod pdfium;

use crate::error::ConvertError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::warn;

pub use docling::DoclingConverter;
pub use pdfium::PdfiumConverter;

/// An image pulled out of a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Result of converting one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertedDocument {
    /// Text with one placeholder marker per entry of `images`.
    pub markdown: String,
    pub images: Vec<ExtractedImage>,
}

/// Converts one source document.
pub trait DocumentConverter: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Convert the file at `path`.
    fn convert(&self, path: &Path) -> Result<ConvertedDocument, ConvertError>;
}

/// Decode a `data:<mime>;base64,<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<ExtractedImage, ConvertError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ConvertError::DataUri("missing 'data:' scheme".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ConvertError::DataUri("missing ',' separator".into()))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| ConvertError::DataUri(format!("not base64-encoded: '{header}'")))?;

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ConvertError::DataUri(e.to_string()))?;

    Ok(ExtractedImage {
        bytes,
        mime_type: mime_type.to_string(),
    })
}

static EMBEDDED_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[[^\]]*\]\((data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=\s]+)\)")
        .expect("valid regex")
});

/// Replace every embedded `![..](data:image/...)` reference by `placeholder`.
///
/// Returns the rewritten text and the decoded images in encounter order.
/// A reference whose payload cannot be decoded is dropped together with its
/// marker, so markers and images stay aligned.
pub fn split_embedded_images(markdown: &str, placeholder: &str) -> ConvertedDocument {
    let mut out = String::with_capacity(markdown.len());
    let mut images = Vec::new();
    let mut last = 0;

    for caps in EMBEDDED_IMAGE.captures_iter(markdown) {
        let (Some(whole), Some(uri)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&markdown[last..whole.start()]);
        match decode_data_uri(uri.as_str()) {
            Ok(image) => {
                out.push_str(placeholder);
                images.push(image);
            }
            Err(e) => warn!("Dropping embedded image: {}", e),
        }
        last = whole.end();
    }
    out.push_str(&markdown[last..]);

    ConvertedDocument {
        markdown: out,
        images,
    }
}
