//! Extract stage: source documents → base text, original images, state document.
//!
//! Every distinct source file is converted exactly once, even when it feeds
//! both text and images. Text from the text group is concatenated with a
//! horizontal rule between files; images from the image group are numbered
//! in encounter order (`img_001`, `img_002`, …).
//!
//! The state document is written last and never overwritten, so its presence
//! marks the work as extracted. Re-running the stage on an extracted work
//! only reloads the existing record.

use crate::config::PipelineConfig;
use crate::converter::{ConvertedDocument, DocumentConverter, ExtractedImage};
use crate::error::{ConvertError, PipelineError};
use crate::pipeline::encode::encode_png;
use crate::sources::SourceSet;
use crate::store::{ArtifactRecord, ArtifactStore, ImageArtifact, SourceFiles};
use crate::workspace::{write_atomic, WorkPaths};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Separator placed between the texts of consecutive text-source files.
pub const FILE_SEPARATOR: &str = "\n\n---\n\n";

/// Run the Extract stage for one work.
///
/// # Errors
/// - [`PipelineError::StateCorruption`] if an existing state document is unreadable.
/// - [`PipelineError::ConversionFailure`] if no text source converted.
/// - [`PipelineError::Io`] if an artifact cannot be written.
pub async fn extract(
    sources: &SourceSet,
    paths: &WorkPaths,
    converter: &Arc<dyn DocumentConverter>,
    config: &PipelineConfig,
) -> Result<ArtifactRecord, PipelineError> {
    let store = ArtifactStore::new(&paths.metadata);
    if store.exists() {
        let record = store.load()?;
        info!(
            work = %paths.work,
            images = record.images.len(),
            "Already extracted, reusing state document"
        );
        return Ok(record);
    }

    paths.ensure_dirs()?;

    let mut converted: HashMap<PathBuf, ConvertedDocument> = HashMap::new();
    for file in sources.all_files() {
        match convert_one(converter, file).await {
            Ok(doc) => {
                debug!(
                    work = %paths.work,
                    "{} → {} chars, {} images",
                    file.display(),
                    doc.markdown.len(),
                    doc.images.len()
                );
                converted.insert(file.to_path_buf(), doc);
            }
            Err(e) => warn!(work = %paths.work, "Skipping source: {e}"),
        }
    }

    let text = join_text(&sources.text, &converted).ok_or_else(|| {
        PipelineError::ConversionFailure {
            work: paths.work.clone(),
            detail: format!(
                "none of {} text source(s) produced text with {}",
                sources.text.len(),
                converter.name()
            ),
        }
    })?;

    let mut images = Vec::new();
    for file in &sources.image {
        let Some(doc) = converted.get(file) else {
            continue;
        };
        for extracted in &doc.images {
            let id = format!("img_{:03}", images.len() + 1);
            let file_name = format!("{id}.png");
            let target = paths.original_images.join(&file_name);
            write_atomic(&target, &as_png(&id, extracted))?;
            images.push(ImageArtifact::new(
                id,
                format!("{}/{}", paths.original_images_rel, file_name),
            ));
        }
    }

    write_atomic(&paths.text_file, text.as_bytes())?;

    let record = ArtifactRecord {
        source_files: SourceFiles::from(sources),
        images,
        tables: Vec::new(),
    };
    store.create(&record)?;

    let markers = text.matches(config.placeholder.as_str()).count();
    if markers != record.images.len() {
        // Assembly tolerates the mismatch; surplus images get no block.
        warn!(
            work = %paths.work,
            markers,
            images = record.images.len(),
            "Placeholder count differs from image count"
        );
    }
    info!(
        work = %paths.work,
        images = record.images.len(),
        "Extracted {} chars of text",
        text.len()
    );
    Ok(record)
}

/// Rebuild only the base text artifact from freshly resolved sources.
///
/// Images and the state document are left as they are.
pub async fn regenerate_text(
    sources: &SourceSet,
    paths: &WorkPaths,
    converter: &Arc<dyn DocumentConverter>,
) -> Result<(), PipelineError> {
    let mut converted = HashMap::new();
    for file in &sources.text {
        match convert_one(converter, file).await {
            Ok(doc) => {
                converted.insert(file.clone(), doc);
            }
            Err(e) => warn!(work = %paths.work, "Skipping source: {e}"),
        }
    }
    let text = join_text(&sources.text, &converted).ok_or_else(|| {
        PipelineError::ConversionFailure {
            work: paths.work.clone(),
            detail: "no text source converted during repair".to_string(),
        }
    })?;

    std::fs::create_dir_all(&paths.artifact_dir)
        .map_err(|e| PipelineError::io(&paths.artifact_dir, e))?;
    write_atomic(&paths.text_file, text.as_bytes())?;
    info!(work = %paths.work, "Regenerated base text ({} chars)", text.len());
    Ok(())
}

/// Convert on the blocking pool; converters may shell out or call into C.
async fn convert_one(
    converter: &Arc<dyn DocumentConverter>,
    path: &Path,
) -> Result<ConvertedDocument, ConvertError> {
    let conv = Arc::clone(converter);
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || conv.convert(&owned))
        .await
        .map_err(|e| ConvertError::Engine {
            path: path.to_path_buf(),
            detail: format!("conversion task panicked: {e}"),
        })?
}

/// Concatenate the converted text files in order.
///
/// `None` when no text file converted or the combined text is blank.
fn join_text(text_files: &[PathBuf], converted: &HashMap<PathBuf, ConvertedDocument>) -> Option<String> {
    let parts: Vec<&str> = text_files
        .iter()
        .filter_map(|f| converted.get(f))
        .map(|d| d.markdown.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(FILE_SEPARATOR))
    }
}

/// PNG bytes for an extracted image, transcoding other formats.
///
/// Undecodable payloads are stored as-is; Optimize will report them.
fn as_png(id: &str, image: &ExtractedImage) -> Vec<u8> {
    if image.mime_type == "image/png" {
        return image.bytes.clone();
    }
    match image::load_from_memory(&image.bytes)
        .map_err(|e| e.to_string())
        .and_then(|img| encode_png(&img).map_err(|e| e.to_string()))
    {
        Ok(png) => png,
        Err(e) => {
            warn!(image = id, "Keeping {} bytes untranscoded: {e}", image.mime_type);
            image.bytes.clone()
        }
    }
}
