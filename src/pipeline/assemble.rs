//! Assemble stage: base text + state document → final Markdown.
//!
//! Placeholder markers are consumed in order, one per image in record order.
//! Images beyond the last marker get no block; markers beyond the last image
//! stay in the text untouched. Each block looks like:
//!
//! ```text
//!
//! ![Diagrama de bloques del sistema](../02_artefactos_extraidos/doc1/imagenes_originales/img_001.png)
//! > **Descripción (qwen2.5vl:7b):** Diagrama de bloques del sistema.
//! > Segunda línea de la descripción.
//!
//! ```
//!
//! The final file is written in one atomic replace; its existence marks the
//! work as done.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::store::{ArtifactRecord, ArtifactStore, ImageArtifact};
use crate::workspace::{write_atomic, WorkPaths};
use tracing::{debug, info};

/// Run the Assemble stage for one work.
///
/// # Errors
/// - [`PipelineError::AssemblyPrerequisiteMissing`] if the base text or the
///   state document does not exist.
/// - [`PipelineError::StateCorruption`] if the state document is invalid.
/// - [`PipelineError::Io`] if the final file cannot be written.
pub fn assemble(paths: &WorkPaths, config: &PipelineConfig) -> Result<(), PipelineError> {
    for required in [&paths.text_file, &paths.metadata] {
        if !required.is_file() {
            return Err(PipelineError::AssemblyPrerequisiteMissing {
                path: required.clone(),
            });
        }
    }
    let base = std::fs::read_to_string(&paths.text_file)
        .map_err(|e| PipelineError::io(&paths.text_file, e))?;
    let record = ArtifactStore::new(&paths.metadata).load()?;

    let markdown = render_markdown(&base, &record, paths, config);

    if let Some(dir) = paths.final_markdown.parent() {
        std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    }
    write_atomic(&paths.final_markdown, markdown.as_bytes())?;
    info!(
        work = %paths.work,
        "Wrote {} ({} chars)",
        paths.final_markdown.display(),
        markdown.len()
    );
    Ok(())
}

/// Substitute placeholder markers in `base` with image blocks.
///
/// Pure; text inside descriptions is never scanned for markers.
pub fn render_markdown(
    base: &str,
    record: &ArtifactRecord,
    paths: &WorkPaths,
    config: &PipelineConfig,
) -> String {
    let marker = config.placeholder.as_str();
    let mut segments = base.split(marker);
    let mut out = String::with_capacity(base.len() + record.images.len() * 256);
    out.push_str(segments.next().unwrap_or_default());

    let mut images = record.images.iter();
    let mut consumed = 0usize;
    for segment in segments {
        match images.next() {
            Some(image) => {
                out.push_str(&image_block(image, paths, config));
                consumed += 1;
            }
            None => out.push_str(marker),
        }
        out.push_str(segment);
    }

    let dropped = record.images.len().saturating_sub(consumed);
    if dropped > 0 {
        debug!(work = %paths.work, dropped, "More images than placeholder markers");
    }
    out
}

fn image_block(image: &ImageArtifact, paths: &WorkPaths, config: &PipelineConfig) -> String {
    let description = image
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(config.missing_description.as_str());

    let link = paths.markdown_link(&image.original_path);
    let alt = alt_text(description, config.alt_text_chars);

    let mut lines = description.lines();
    let first = lines.next().unwrap_or_default();
    let mut block = format!(
        "\n![{alt}]({link})\n> **{} ({}):** {first}\n",
        config.description_label, config.model
    );
    for line in lines {
        if line.trim().is_empty() {
            block.push_str(">\n");
        } else {
            block.push_str("> ");
            block.push_str(line);
            block.push('\n');
        }
    }
    block
}

/// First `max_chars` characters, on one line, without brackets.
fn alt_text(description: &str, max_chars: usize) -> String {
    description
        .chars()
        .take(max_chars)
        .filter(|c| *c != '[' && *c != ']')
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}
