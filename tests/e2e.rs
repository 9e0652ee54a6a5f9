//! End-to-end tests against real external tools.
//!
//! These talk to a live Ollama server and run the `docling` executable, so
//! they are gated behind the `E2E_ENABLED` environment variable and do not
//! run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 OLLAMA_VISION_MODEL=qwen2.5vl:7b cargo test --test e2e -- --nocapture
//!
//! The full-pipeline test additionally needs `E2E_DOCUMENT` pointing at a
//! PDF or DOCX with at least one embedded picture.

use doc2md_enrich::pipeline::encode::encode_png;
use doc2md_enrich::{
    DoclingConverter, ImageDescriber, OllamaDescriber, Pipeline, PipelineConfig, WorkOutcome,
    Workspace,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_HOST: &str = "http://localhost:11434";

fn ollama_host() -> String {
    std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string())
}

fn vision_model() -> String {
    std::env::var("OLLAMA_VISION_MODEL").unwrap_or_else(|_| "qwen2.5vl:7b".to_string())
}

async fn ollama_is_available() -> bool {
    reqwest::Client::new()
        .get(format!("{}/api/tags", ollama_host()))
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await
        .is_ok()
}

fn docling_is_available() -> bool {
    std::process::Command::new("docling")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

macro_rules! e2e_skip_unless_ollama {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        if !ollama_is_available().await {
            println!("SKIP — Ollama not reachable at {}", ollama_host());
            return;
        }
    }};
}

/// Red square on white, large enough for a VLM to say something about it.
fn sample_png() -> Vec<u8> {
    let mut img = RgbaImage::from_pixel(256, 256, Rgba([255, 255, 255, 255]));
    for y in 64..192 {
        for x in 64..192 {
            img.put_pixel(x, y, Rgba([220, 20, 20, 255]));
        }
    }
    encode_png(&DynamicImage::ImageRgba8(img)).expect("encode sample png")
}

#[tokio::test]
async fn ollama_describes_a_png() {
    e2e_skip_unless_ollama!();

    let model = vision_model();
    let describer = OllamaDescriber::new(&format!("{}/api/chat", ollama_host()), &model, 300)
        .expect("client must build");
    let config = PipelineConfig::builder().model(&model).build().unwrap();

    let text = describer
        .describe(&sample_png(), &config.prompt)
        .await
        .unwrap_or_else(|e| panic!("'{model}' failed: {e}"));

    println!("[ollama] '{model}': {text}");
    assert!(!text.trim().is_empty(), "description must not be empty");
}

#[tokio::test]
async fn full_pipeline_on_real_document() {
    e2e_skip_unless_ollama!();
    if !docling_is_available() {
        println!("SKIP — docling not on PATH (pip install docling)");
        return;
    }
    let Some(document) = std::env::var_os("E2E_DOCUMENT").map(PathBuf::from) else {
        println!("SKIP — set E2E_DOCUMENT to a PDF or DOCX");
        return;
    };

    let tmp = tempfile::TempDir::new().unwrap();
    let input = tmp.path().join("docs");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::copy(&document, input.join(document.file_name().unwrap())).unwrap();
    let work = document.file_stem().unwrap().to_string_lossy().to_string();

    let model = vision_model();
    let config = PipelineConfig::builder()
        .model(&model)
        .endpoint(format!("{}/api/chat", ollama_host()))
        .max_retries(1)
        .build()
        .unwrap();
    let ws = Workspace::create_numbered(&input, &config.layout).unwrap();
    let converter = Arc::new(DoclingConverter::new("docling", &config.placeholder));
    let describer = doc2md_enrich::describer::from_config(&config).unwrap();
    let placeholder = config.placeholder.clone();
    let pipeline = Pipeline::new(config, converter, describer);

    let report = pipeline.run_directory(&input, &ws).await.unwrap();
    assert!(
        matches!(report.outcome(&work), Some(WorkOutcome::Assembled)),
        "unexpected outcome: {:?}",
        report.outcome(&work)
    );

    let md = std::fs::read_to_string(ws.work_paths(&work).final_markdown).unwrap();
    println!("[e2e] {} chars of Markdown:\n{md}", md.len());
    assert!(!md.trim().is_empty());
    assert!(!md.contains("data:image/"), "embedded images must be extracted");
    if md.contains("](../") {
        assert!(md.contains(&format!("({model}):**")));
    } else {
        println!("[e2e] no images found; {} markers left", md.matches(&placeholder).count());
    }

    // A second run touches nothing.
    let again = pipeline.run_directory(&input, &ws).await.unwrap();
    assert!(matches!(again.outcome(&work), Some(WorkOutcome::SkippedDone)));
}
