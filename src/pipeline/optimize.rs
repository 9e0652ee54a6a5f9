//! Optimize stage: downscale extracted images for the vision model.
//!
//! Only images without an `optimized_path` are touched. A per-image read,
//! decode or write failure leaves that image unoptimized, so the next run
//! picks it up again; only state-document failures abort the stage.
//!
//! CPU-bound and synchronous; the orchestrator runs it on the blocking pool.

use crate::error::{ItemError, PipelineError};
use crate::pipeline::encode::{encode_png, fit_within};
use crate::pipeline::StageReport;
use crate::store::{ArtifactStore, ImageArtifact, ImageField};
use crate::workspace::{write_atomic, WorkPaths};
use tracing::{debug, info, warn};

/// Run the Optimize stage for one work.
pub fn optimize(paths: &WorkPaths, max_dimension: u32) -> Result<StageReport, PipelineError> {
    let store = ArtifactStore::new(&paths.metadata);
    let record = store.load()?;
    let pending: Vec<&ImageArtifact> = record
        .images
        .iter()
        .filter(|i| i.needs_optimization())
        .collect();

    let mut report = StageReport {
        attempted: pending.len(),
        ..Default::default()
    };
    if pending.is_empty() {
        debug!(work = %paths.work, "Nothing to optimize");
        return Ok(report);
    }

    std::fs::create_dir_all(&paths.optimized_images)
        .map_err(|e| PipelineError::io(&paths.optimized_images, e))?;

    for image in pending {
        match optimize_one(paths, image, max_dimension) {
            Ok(relative) => {
                store.patch_image_field(&image.id, ImageField::OptimizedPath, Some(relative))?;
                report.succeeded += 1;
            }
            Err(e) => {
                warn!(work = %paths.work, "{e}");
                report.failures.push(e);
            }
        }
    }

    info!(
        work = %paths.work,
        "Optimized {}/{} images",
        report.succeeded,
        report.attempted
    );
    Ok(report)
}

/// Resize one image; returns its optimized path relative to the artifact dir.
fn optimize_one(
    paths: &WorkPaths,
    image: &ImageArtifact,
    max_dimension: u32,
) -> Result<String, ItemError> {
    let io_err = |detail: String| ItemError::ImageIo {
        id: image.id.clone(),
        detail,
    };

    let source = paths.resolve(&image.original_path);
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| io_err(format!("no file name in '{}'", image.original_path)))?;
    let bytes =
        std::fs::read(&source).map_err(|e| io_err(format!("{}: {e}", source.display())))?;

    let decoded = image::load_from_memory(&bytes).map_err(|e| ItemError::ImageDecode {
        id: image.id.clone(),
        detail: e.to_string(),
    })?;
    let (w, h) = (decoded.width(), decoded.height());
    let resized = fit_within(decoded, max_dimension);
    let png = encode_png(&resized).map_err(|e| io_err(format!("encode: {e}")))?;

    let target = paths.optimized_images.join(&file_name);
    write_atomic(&target, &png).map_err(|e| io_err(e.to_string()))?;
    debug!(
        image = %image.id,
        "{}x{} → {}x{}",
        w,
        h,
        resized.width(),
        resized.height()
    );
    Ok(format!("{}/{}", paths.optimized_images_rel, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Layout;
    use crate::store::ArtifactRecord;
    use crate::workspace::Workspace;
    use image::{DynamicImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn seed(images: &[(&str, Option<Vec<u8>>)]) -> (TempDir, WorkPaths) {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path(), &Layout::default()).unwrap();
        let paths = ws.work_paths("doc1");
        paths.ensure_dirs().unwrap();
        let mut record = ArtifactRecord::default();
        for (id, bytes) in images {
            let rel = format!("imagenes_originales/{id}.png");
            if let Some(b) = bytes {
                std::fs::write(paths.resolve(&rel), b).unwrap();
            }
            record.images.push(ImageArtifact::new(*id, rel));
        }
        ArtifactStore::new(&paths.metadata).create(&record).unwrap();
        (tmp, paths)
    }

    fn png(w: u32, h: u32) -> Vec<u8> {
        encode_png(&DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            w,
            h,
            Rgba([9, 9, 9, 255]),
        )))
        .unwrap()
    }

    #[test]
    fn large_image_is_downscaled_and_recorded() {
        let (_tmp, paths) = seed(&[("img_001", Some(png(200, 100)))]);
        let report = optimize(&paths, 64).unwrap();
        assert_eq!((report.attempted, report.succeeded), (1, 1));

        let record = ArtifactStore::new(&paths.metadata).load().unwrap();
        let rel = record.images[0].optimized_path.clone().unwrap();
        assert_eq!(rel, "imagenes_optimizadas/img_001.png");
        let out = image::open(paths.resolve(&rel)).unwrap();
        assert_eq!((out.width(), out.height()), (64, 32));
    }

    #[test]
    fn bad_images_stay_pending() {
        let (_tmp, paths) = seed(&[
            ("img_001", None),
            ("img_002", Some(b"not an image".to_vec())),
            ("img_003", Some(png(8, 8))),
        ]);
        let report = optimize(&paths, 1024).unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(matches!(report.failures[0], ItemError::ImageIo { .. }));
        assert!(matches!(report.failures[1], ItemError::ImageDecode { .. }));

        let record = ArtifactStore::new(&paths.metadata).load().unwrap();
        assert!(record.images[0].optimized_path.is_none());
        assert!(record.images[1].optimized_path.is_none());
        assert!(record.images[2].optimized_path.is_some());
    }

    #[test]
    fn optimized_images_are_not_redone() {
        let (_tmp, paths) = seed(&[("img_001", Some(png(8, 8)))]);
        optimize(&paths, 1024).unwrap();
        let again = optimize(&paths, 1024).unwrap();
        assert_eq!(again.attempted, 0);
    }

    #[test]
    fn missing_state_is_corruption() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path(), &Layout::default()).unwrap();
        let err = optimize(&ws.work_paths("ghost"), 1024).unwrap_err();
        assert!(matches!(err, PipelineError::StateCorruption { .. }));
    }
}
