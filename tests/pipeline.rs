//! Integration tests for the enrichment pipeline.
//!
//! The two external capabilities are replaced by in-process fakes:
//!
//! * [`TextConverter`] reads a source "document" as UTF-8 text and returns
//!   one synthetic PNG per placeholder marker it contains.
//! * [`CountingDescriber`] answers deterministically from the image size and
//!   counts every request, so tests can assert exactly how many model calls
//!   a run made.

use async_trait::async_trait;
use doc2md_enrich::pipeline::encode::encode_png;
use doc2md_enrich::{
    ArtifactRecord, ArtifactStore, ConvertError, ConvertedDocument, DescribeError,
    DocumentConverter, ExtractedImage, ImageDescriber, Pipeline, PipelineConfig, PipelineError,
    RetryPolicy, Stage, WorkLock, WorkOutcome, WorkState, Workspace,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const MARKER: &str = "<!-- image -->";

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TextConverter {
    converted: Mutex<Vec<PathBuf>>,
}

impl TextConverter {
    fn calls(&self) -> usize {
        self.converted.lock().unwrap().len()
    }

    fn converted_names(&self) -> Vec<String> {
        self.converted
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }
}

impl DocumentConverter for TextConverter {
    fn name(&self) -> &str {
        "text"
    }

    fn convert(&self, path: &Path) -> Result<ConvertedDocument, ConvertError> {
        self.converted.lock().unwrap().push(path.to_path_buf());
        let text = fs::read_to_string(path).map_err(|e| ConvertError::Engine {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let images = (0..text.matches(MARKER).count())
            .map(|i| {
                let side = 8 + i as u32;
                let img = RgbaImage::from_pixel(side, side, Rgba([i as u8 * 40, 0, 0, 255]));
                ExtractedImage {
                    bytes: encode_png(&DynamicImage::ImageRgba8(img)).unwrap(),
                    mime_type: "image/png".into(),
                }
            })
            .collect();
        Ok(ConvertedDocument {
            markdown: text,
            images,
        })
    }
}

/// Deterministic describer; the first `fail_first` calls fail and every call
/// numbered `hang_after + 1` or later never returns.
struct CountingDescriber {
    calls: AtomicUsize,
    fail_first: usize,
    hang_after: Option<usize>,
    answer: Option<&'static str>,
}

impl CountingDescriber {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            hang_after: None,
            answer: None,
        })
    }

    fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: n,
            hang_after: None,
            answer: None,
        })
    }

    fn hanging_after(k: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            hang_after: Some(k),
            answer: None,
        })
    }

    fn answering(text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            hang_after: None,
            answer: Some(text),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageDescriber for CountingDescriber {
    fn model_name(&self) -> &str {
        "fake-vlm"
    }

    async fn describe(&self, png: &[u8], _prompt: &str) -> Result<String, DescribeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_after.is_some_and(|k| n > k) {
            std::future::pending::<()>().await;
        }
        if n <= self.fail_first {
            return Err(DescribeError::Status {
                status: 503,
                body: "model loading".into(),
            });
        }
        Ok(self
            .answer
            .map(str::to_string)
            .unwrap_or_else(|| format!("Imagen PNG de {} bytes.", png.len())))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config() -> PipelineConfig {
    PipelineConfig::builder().model("fake-vlm").build().unwrap()
}

fn pipeline(conv: &Arc<TextConverter>, desc: &Arc<CountingDescriber>) -> Pipeline {
    Pipeline::new(config(), conv.clone(), desc.clone())
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// `<tmp>/docs/` with the given files.
fn input_dir(tmp: &TempDir, files: &[(&str, &str)]) -> PathBuf {
    let dir = tmp.path().join("docs");
    fs::create_dir_all(&dir).unwrap();
    for (name, content) in files {
        write(&dir.join(name), content);
    }
    dir
}

fn record(ws: &Workspace, work: &str) -> ArtifactRecord {
    ArtifactStore::new(ws.work_paths(work).metadata).load().unwrap()
}

fn final_md(ws: &Workspace, work: &str) -> String {
    fs::read_to_string(ws.work_paths(work).final_markdown).unwrap()
}

const FOUR_IMAGES: &str = "# Informe\n\n<!-- image -->\nUno.\n<!-- image -->\nDos.\n<!-- image -->\nTres.\n<!-- image -->\nFin.";

// ── Single-directory mode ────────────────────────────────────────────────────

#[tokio::test]
async fn single_directory_run_assembles_every_document() {
    let tmp = TempDir::new().unwrap();
    let input = input_dir(
        &tmp,
        &[
            ("doc1.pdf", "Hola <!-- image --> mundo"),
            ("doc2.docx", "Sin imágenes."),
            ("notas.txt", "ignored"),
        ],
    );
    let ws = Workspace::create_numbered(&input, &config().layout).unwrap();
    let (conv, desc) = (Arc::new(TextConverter::default()), CountingDescriber::ok());

    let report = pipeline(&conv, &desc).run_directory(&input, &ws).await.unwrap();

    assert_eq!(report.works.len(), 2);
    assert_eq!(report.assembled(), 2);
    assert_eq!(desc.calls(), 1);
    assert!(ws.originals_dir().join("doc1.pdf").is_file());

    let md = final_md(&ws, "doc1");
    assert!(md.starts_with("Hola \n![Imagen PNG de "), "got: {md}");
    assert!(md.contains("](../02_artefactos_extraidos/doc1/imagenes_originales/img_001.png)\n"));
    assert!(md.contains("> **Descripción (fake-vlm):** Imagen PNG de "));
    assert!(md.ends_with(" mundo"));
    assert_eq!(final_md(&ws, "doc2"), "Sin imágenes.");

    let rec = record(&ws, "doc1");
    assert_eq!(rec.images[0].optimized_path.as_deref(), Some("imagenes_optimizadas/img_001.png"));
    assert!(rec.tables.is_empty());
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let input = input_dir(&tmp, &[("doc1.pdf", FOUR_IMAGES)]);
    let ws = Workspace::create_numbered(&input, &config().layout).unwrap();
    let (conv, desc) = (Arc::new(TextConverter::default()), CountingDescriber::ok());
    let p = pipeline(&conv, &desc);

    p.run_directory(&input, &ws).await.unwrap();
    let first = final_md(&ws, "doc1");
    assert_eq!((conv.calls(), desc.calls()), (1, 4));

    let again = p.run_directory(&input, &ws).await.unwrap();
    assert!(matches!(again.outcome("doc1"), Some(WorkOutcome::SkippedDone)));
    assert_eq!((conv.calls(), desc.calls()), (1, 4));
    assert_eq!(final_md(&ws, "doc1"), first);

    // A fresh output directory yields the same bytes.
    let ws2 = Workspace::create_numbered(&input, &config().layout).unwrap();
    assert_ne!(ws.root(), ws2.root());
    p.run_directory(&input, &ws2).await.unwrap();
    assert_eq!(final_md(&ws2, "doc1"), first);
}

#[tokio::test]
async fn existing_final_markdown_skips_every_stage() {
    let tmp = TempDir::new().unwrap();
    let input = input_dir(&tmp, &[("doc1.pdf", FOUR_IMAGES)]);
    let ws = Workspace::create_numbered(&input, &config().layout).unwrap();
    write(&ws.work_paths("doc1").final_markdown, "hecho a mano");
    let (conv, desc) = (Arc::new(TextConverter::default()), CountingDescriber::ok());

    let report = pipeline(&conv, &desc).run_directory(&input, &ws).await.unwrap();

    assert!(matches!(report.outcome("doc1"), Some(WorkOutcome::SkippedDone)));
    assert_eq!((conv.calls(), desc.calls()), (0, 0));
    assert!(!ws.work_paths("doc1").metadata.exists());
    assert_eq!(final_md(&ws, "doc1"), "hecho a mano");
}

#[tokio::test]
async fn interrupted_describe_resumes_with_remaining_calls() {
    const K: usize = 2;
    let tmp = TempDir::new().unwrap();
    let input = input_dir(&tmp, &[("doc1.pdf", FOUR_IMAGES)]);
    let ws = Workspace::create_numbered(&input, &config().layout).unwrap();
    let conv = Arc::new(TextConverter::default());

    // The (K+1)th request never answers; dropping the run simulates a kill.
    let stuck = CountingDescriber::hanging_after(K);
    let p = pipeline(&conv, &stuck);
    let run = tokio::time::timeout(Duration::from_secs(2), p.run_directory(&input, &ws)).await;
    assert!(run.is_err(), "run should have been cut off");

    let rec = record(&ws, "doc1");
    let described = rec.images.iter().filter(|i| i.description.is_some()).count();
    assert_eq!(described, K);
    assert!(!ws.work_paths("doc1").is_done());

    let desc = CountingDescriber::ok();
    let report = pipeline(&conv, &desc).resume(&ws).await.unwrap();

    assert!(matches!(report.outcome("doc1"), Some(WorkOutcome::Assembled)));
    assert_eq!(desc.calls(), 4 - K);
    assert!(record(&ws, "doc1").images.iter().all(|i| i.description.is_some()));
    assert_eq!(conv.calls(), 1);
}

#[tokio::test]
async fn corrupt_state_fails_only_that_work() {
    let tmp = TempDir::new().unwrap();
    let input = input_dir(&tmp, &[("a.pdf", "A <!-- image -->"), ("b.pdf", "B <!-- image -->")]);
    let ws = Workspace::create_numbered(&input, &config().layout).unwrap();
    write(&ws.work_paths("a").metadata, "{ not json");
    let (conv, desc) = (Arc::new(TextConverter::default()), CountingDescriber::ok());

    let report = pipeline(&conv, &desc).run_directory(&input, &ws).await.unwrap();

    match report.outcome("a") {
        Some(WorkOutcome::Failed { stage, error }) => {
            assert_eq!(*stage, Stage::Extract);
            assert!(matches!(error, PipelineError::StateCorruption { .. }));
        }
        other => panic!("unexpected outcome for a: {other:?}"),
    }
    assert_eq!(report.works[0].state, WorkState::Pending);
    assert!(matches!(report.outcome("b"), Some(WorkOutcome::Assembled)));
    assert_eq!(report.works[1].state, WorkState::Assembled);
    assert_eq!(fs::read_to_string(ws.work_paths("a").metadata).unwrap(), "{ not json");
}

#[tokio::test]
async fn locked_work_is_left_alone() {
    let tmp = TempDir::new().unwrap();
    let input = input_dir(&tmp, &[("a.pdf", "A"), ("b.pdf", "B")]);
    let ws = Workspace::create_numbered(&input, &config().layout).unwrap();
    let held = WorkLock::acquire(&ws.work_paths("a")).unwrap();
    let (conv, desc) = (Arc::new(TextConverter::default()), CountingDescriber::ok());

    let report = pipeline(&conv, &desc).run_directory(&input, &ws).await.unwrap();

    assert!(matches!(report.outcome("a"), Some(WorkOutcome::SkippedLocked)));
    assert!(matches!(report.outcome("b"), Some(WorkOutcome::Assembled)));
    assert_eq!(conv.converted_names(), ["b.pdf"]);
    drop(held);
}

#[tokio::test]
async fn duplicate_stems_become_one_work() {
    let tmp = TempDir::new().unwrap();
    let input = input_dir(&tmp, &[("doc1.docx", "versión docx"), ("doc1.pdf", "versión pdf")]);
    let ws = Workspace::create_numbered(&input, &config().layout).unwrap();
    let (conv, desc) = (Arc::new(TextConverter::default()), CountingDescriber::ok());

    let report = pipeline(&conv, &desc).run_directory(&input, &ws).await.unwrap();

    assert_eq!(report.works.len(), 1);
    assert_eq!(final_md(&ws, "doc1"), "versión docx");
}

#[tokio::test]
async fn missing_input_directory_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::open(tmp.path(), &config().layout).unwrap();
    let (conv, desc) = (Arc::new(TextConverter::default()), CountingDescriber::ok());

    let err = pipeline(&conv, &desc)
        .run_directory(&tmp.path().join("nope"), &ws)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InputNotFound { .. }));
}

// ── Corpus mode ──────────────────────────────────────────────────────────────

fn corpus(tmp: &TempDir) -> PathBuf {
    let root = tmp.path().join("corpus");
    write(&root.join("obra1/ocr_docx/b.docx"), "Texto B <!-- image -->");
    write(&root.join("obra1/ocr_docx/a.docx"), "Texto A <!-- image -->");
    write(&root.join("obra1/ocr_pdf/ocr.pdf"), "OCR ruidoso <!-- image -->");
    write(&root.join("obra1/img_pdf/scan.pdf"), "escaneo <!-- image --> <!-- image -->");
    write(&root.join("obra2/obra2.pdf"), "Solo raíz <!-- image -->");
    fs::create_dir_all(root.join("obra3/ocr_pdf")).unwrap();
    root
}

#[tokio::test]
async fn corpus_run_uses_hybrid_sources() {
    let tmp = TempDir::new().unwrap();
    let root = corpus(&tmp);
    let ws = Workspace::create_numbered(&root, &config().layout).unwrap();
    let (conv, desc) = (Arc::new(TextConverter::default()), CountingDescriber::ok());

    let report = pipeline(&conv, &desc).run_corpus(&root, &ws).await.unwrap();

    let names: Vec<_> = report.works.iter().map(|w| w.work.as_str()).collect();
    assert_eq!(names, ["obra1", "obra2", "obra3"]);
    assert!(matches!(report.outcome("obra1"), Some(WorkOutcome::Assembled)));
    assert!(matches!(report.outcome("obra2"), Some(WorkOutcome::Assembled)));
    assert!(matches!(report.outcome("obra3"), Some(WorkOutcome::SkippedNoSource)));

    // Text from the sorted ocr_docx files, images from img_pdf only.
    assert!(!conv.converted_names().contains(&"ocr.pdf".to_string()));
    let text = fs::read_to_string(ws.work_paths("obra1").text_file).unwrap();
    assert_eq!(text, "Texto A <!-- image -->\n\n---\n\nTexto B <!-- image -->");
    let rec = record(&ws, "obra1");
    assert_eq!(rec.images.len(), 2);
    assert_eq!(rec.source_files.text.len(), 2);
    assert!(rec.source_files.text[0].ends_with("a.docx"));
    assert!(rec.source_files.image[0].ends_with("scan.pdf"));
    assert!(ws.originals_dir().join("obra1").join("scan.pdf").is_file());

    let md = final_md(&ws, "obra1");
    assert!(md.contains("img_001.png") && md.contains("img_002.png"));
}

#[tokio::test]
async fn repair_text_rebuilds_text_without_new_descriptions() {
    let tmp = TempDir::new().unwrap();
    let root = corpus(&tmp);
    let ws = Workspace::create_numbered(&root, &config().layout).unwrap();
    let (conv, desc) = (Arc::new(TextConverter::default()), CountingDescriber::ok());
    let p = pipeline(&conv, &desc);
    p.run_corpus(&root, &ws).await.unwrap();
    let calls = desc.calls();
    let before = record(&ws, "obra1");

    write(&root.join("obra1/ocr_docx/a.docx"), "Texto A corregido <!-- image -->");
    let ids = vec!["obra1".to_string(), " ".to_string(), "obra9".to_string()];
    let report = p.repair_text(&root, &ws, &ids).await.unwrap();

    assert!(matches!(report.outcome("obra1"), Some(WorkOutcome::Assembled)));
    assert!(matches!(
        report.outcome("obra9"),
        Some(WorkOutcome::Failed { stage: Stage::Extract, .. })
    ));
    assert_eq!(desc.calls(), calls);
    assert_eq!(record(&ws, "obra1"), before);
    assert!(final_md(&ws, "obra1").starts_with("Texto A corregido \n![Imagen PNG"));
}

// ── Retry mode ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_descriptions_redoes_error_sentinels_only() {
    let tmp = TempDir::new().unwrap();
    let input = input_dir(&tmp, &[("a.pdf", FOUR_IMAGES), ("b.pdf", "B <!-- image -->")]);
    let ws = Workspace::create_numbered(&input, &config().layout).unwrap();
    let conv = Arc::new(TextConverter::default());

    let flaky = CountingDescriber::failing_first(1);
    let report = pipeline(&conv, &flaky).run_directory(&input, &ws).await.unwrap();
    assert_eq!(report.assembled(), 2);
    let first = record(&ws, "a").images[0].description.clone().unwrap();
    assert!(first.starts_with("Error de API: "), "got: {first}");
    assert!(final_md(&ws, "a").contains("Error de API"));

    let desc = CountingDescriber::ok();
    let report = pipeline(&conv, &desc)
        .retry_descriptions(&ws, RetryPolicy::TransportErrors)
        .await
        .unwrap();

    assert!(matches!(report.outcome("a"), Some(WorkOutcome::Assembled)));
    assert!(matches!(report.outcome("b"), Some(WorkOutcome::NothingToRetry)));
    assert_eq!(desc.calls(), 1);
    assert!(!final_md(&ws, "a").contains("Error de API"));
}

#[tokio::test]
async fn refusals_are_retried_only_under_any_sentinel() {
    let tmp = TempDir::new().unwrap();
    let input = input_dir(&tmp, &[("a.pdf", "A <!-- image -->")]);
    let ws = Workspace::create_numbered(&input, &config().layout).unwrap();
    let conv = Arc::new(TextConverter::default());

    let refusing = CountingDescriber::answering("No puedo ver la imagen, lo siento.");
    pipeline(&conv, &refusing).run_directory(&input, &ws).await.unwrap();
    assert_eq!(
        record(&ws, "a").images[0].description.as_deref(),
        Some("No se pudo generar una descripción válida.")
    );

    let desc = CountingDescriber::ok();
    let p = pipeline(&conv, &desc);
    let report = p.retry_descriptions(&ws, RetryPolicy::TransportErrors).await.unwrap();
    assert!(matches!(report.outcome("a"), Some(WorkOutcome::NothingToRetry)));
    assert_eq!(desc.calls(), 0);

    let report = p.retry_descriptions(&ws, RetryPolicy::AnySentinel).await.unwrap();
    assert!(matches!(report.outcome("a"), Some(WorkOutcome::Assembled)));
    assert_eq!(desc.calls(), 1);
    assert!(final_md(&ws, "a").contains("Imagen PNG de "));
}
