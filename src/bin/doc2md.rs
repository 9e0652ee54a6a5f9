//! CLI binary for doc2md-enrich.
//!
//! A thin shim over the library crate: one subcommand per entry point,
//! positional arguments only, tuning knobs from `DOC2MD_*` environment
//! variables (or the matching long flags).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc2md_enrich::{
    describer, DoclingConverter, DocumentConverter, PdfiumConverter, Pipeline, PipelineConfig,
    PipelineProgressCallback, ProgressCallback, RetryPolicy, RunReport, Stage, WorkOutcome,
    Workspace,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over the works of a run; per-work result lines printed above it.
struct CliProgressCallback {
    bar: ProgressBar,
    described: AtomicUsize,
    sentinels: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            described: AtomicUsize::new(0),
            sentinels: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_works: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} works  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_works as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_works} works to check…"))
        ));
    }

    fn on_work_start(&self, work: &str, _index: usize, _total: usize) {
        self.bar.set_message(work.to_string());
    }

    fn on_stage_start(&self, work: &str, stage: Stage) {
        self.bar.set_message(format!("{work} · {stage}"));
    }

    fn on_image_described(&self, work: &str, image_id: &str, ok: bool) {
        if ok {
            self.described.fetch_add(1, Ordering::SeqCst);
        } else {
            self.sentinels.fetch_add(1, Ordering::SeqCst);
        }
        self.bar.set_message(format!("{work} · describe · {image_id}"));
    }

    fn on_work_complete(&self, work: &str, outcome: &WorkOutcome) {
        let mark = match outcome {
            WorkOutcome::Assembled => green("✓"),
            WorkOutcome::Failed { .. } => red("✗"),
            _ => dim("·"),
        };
        self.bar
            .println(format!("  {mark} {work:<32}  {}", dim(&outcome.to_string())));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_works: usize, assembled: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}/{} works assembled  ({} images described, {} sentinels)",
            if assembled > 0 { green("✔") } else { cyan("⚠") },
            bold(&assembled.to_string()),
            total_works,
            self.described.load(Ordering::SeqCst),
            self.sentinels.load(Ordering::SeqCst),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Every PDF/DOCX directly inside a folder
  doc2md single ./documentos

  # One work per sub-folder (ocr_docx / ocr_pdf / img_pdf variants)
  doc2md corpus ./corpus

  # Finish an interrupted run
  doc2md resume ./corpus_processed_01

  # Rebuild the text of two works from the original corpus
  doc2md repair-text ./corpus ./corpus_processed_01 obra_07,obra_12

  # Describe again every image whose request failed
  doc2md retry-descriptions ./corpus_processed_01

ENVIRONMENT VARIABLES:
  DOC2MD_MODEL           Vision model (default qwen2.5vl:7b)
  DOC2MD_ENDPOINT        Ollama chat endpoint (default http://localhost:11434/api/chat)
  DOC2MD_PROVIDER        Route through edgequake-llm instead (openai, anthropic, gemini, ...)
  DOC2MD_TIMEOUT         Per-image request timeout in seconds (default 600)
  DOC2MD_MAX_RETRIES     Extra attempts per failed request (default 0)
  DOC2MD_MAX_DIMENSION   Longest image side after optimisation (default 1024)
  DOC2MD_CONVERTER       docling (default) or pdfium
  DOC2MD_DOCLING_BIN     docling executable (default: docling on PATH)
  DOC2MD_PDFIUM_LIB      Directory holding libpdfium (default: system library)
  DOC2MD_RETRY_REFUSALS  retry-descriptions also retries refused images
  RUST_LOG               Override the log filter
"#;

/// Resumable document → Markdown pipeline with VLM image descriptions.
#[derive(Parser, Debug)]
#[command(
    name = "doc2md",
    version,
    about = "Convert PDF/DOCX works to Markdown with VLM image descriptions",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vision model ID.
    #[arg(long, global = true, env = "DOC2MD_MODEL", default_value = "qwen2.5vl:7b")]
    model: String,

    /// Ollama chat endpoint.
    #[arg(
        long,
        global = true,
        env = "DOC2MD_ENDPOINT",
        default_value = "http://localhost:11434/api/chat"
    )]
    endpoint: String,

    /// edgequake-llm provider name; unset = native Ollama endpoint.
    #[arg(long, global = true, env = "DOC2MD_PROVIDER")]
    provider: Option<String>,

    /// Per-image request timeout in seconds.
    #[arg(long, global = true, env = "DOC2MD_TIMEOUT", default_value_t = 600)]
    timeout: u64,

    /// Extra attempts per failed description request.
    #[arg(long, global = true, env = "DOC2MD_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Longest side of an optimised image, in pixels.
    #[arg(long, global = true, env = "DOC2MD_MAX_DIMENSION", default_value_t = 1024)]
    max_dimension: u32,

    /// Document conversion backend.
    #[arg(long, global = true, env = "DOC2MD_CONVERTER", value_enum, default_value = "docling")]
    converter: ConverterArg,

    /// docling executable.
    #[arg(long, global = true, env = "DOC2MD_DOCLING_BIN", default_value = "docling")]
    docling_bin: PathBuf,

    /// Directory holding the pdfium shared library.
    #[arg(long, global = true, env = "DOC2MD_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// retry-descriptions: also retry images the model refused.
    #[arg(long, global = true, env = "DOC2MD_RETRY_REFUSALS")]
    retry_refusals: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DOC2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOC2MD_VERBOSE")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every supported file directly inside a directory.
    Single { input_directory: PathBuf },
    /// Process every sub-folder of a corpus as one work.
    Corpus { corpus_directory: PathBuf },
    /// Finish the works of an existing output directory.
    Resume { work_directory: PathBuf },
    /// Re-extract the text of the listed works and re-assemble them.
    RepairText {
        corpus_directory: PathBuf,
        work_directory: PathBuf,
        /// Comma-separated work names.
        ids: String,
    },
    /// Describe again the images whose description recorded an error.
    RetryDescriptions { work_directory: PathBuf },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ConverterArg {
    Docling,
    Pdfium,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Usage errors exit with 1; --help and --version with 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let layout = PipelineConfig::default().layout;
    let workspace = match &cli.command {
        Command::Single { input_directory } => {
            require_dir(input_directory)?;
            Workspace::create_numbered(input_directory, &layout)
        }
        Command::Corpus { corpus_directory } => {
            require_dir(corpus_directory)?;
            Workspace::create_numbered(corpus_directory, &layout)
        }
        Command::RepairText {
            corpus_directory,
            work_directory,
            ..
        } => {
            require_dir(corpus_directory)?;
            Workspace::open(work_directory, &layout)
        }
        Command::Resume { work_directory } | Command::RetryDescriptions { work_directory } => {
            Workspace::open(work_directory, &layout)
        }
    }
    .context("Cannot prepare the output directory")?;

    let show_progress = !cli.no_progress && !cli.verbose;
    init_logging(&workspace.log_file(), cli.verbose, show_progress)?;
    info!(
        "doc2md {} · output in {}",
        env!("CARGO_PKG_VERSION"),
        workspace.root().display()
    );

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let converter: Arc<dyn DocumentConverter> = match cli.converter {
        ConverterArg::Docling => Arc::new(DoclingConverter::new(
            cli.docling_bin.clone(),
            config.placeholder.clone(),
        )),
        ConverterArg::Pdfium => Arc::new(PdfiumConverter::new(
            cli.pdfium_lib.clone(),
            config.placeholder.clone(),
        )),
    };
    let describer = describer::from_config(&config).context("Cannot create the describer")?;
    let pipeline = Pipeline::new(config, converter, describer);

    let report = match &cli.command {
        Command::Single { input_directory } => {
            pipeline.run_directory(input_directory, &workspace).await
        }
        Command::Corpus { corpus_directory } => {
            pipeline.run_corpus(corpus_directory, &workspace).await
        }
        Command::Resume { .. } => pipeline.resume(&workspace).await,
        Command::RepairText {
            corpus_directory,
            ids,
            ..
        } => {
            let ids: Vec<String> = ids.split(',').map(str::to_string).collect();
            pipeline.repair_text(corpus_directory, &workspace, &ids).await
        }
        Command::RetryDescriptions { .. } => {
            let policy = if cli.retry_refusals {
                RetryPolicy::AnySentinel
            } else {
                RetryPolicy::TransportErrors
            };
            pipeline.retry_descriptions(&workspace, policy).await
        }
    }
    .context("Run aborted")?;

    print_summary(&report, &workspace, show_progress);
    Ok(())
}

/// Process-wide tracing setup. Call once, after the workspace exists.
///
/// stderr gets the interactive level (quiet under a progress bar); the log
/// file under `00_log/` always gets INFO or more, without ANSI colours.
fn init_logging(log_file: &Path, verbose: bool, show_progress: bool) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Cannot open log file {}", log_file.display()))?;

    let stderr_level = if verbose {
        "debug"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };
    let file_level = if verbose { "debug" } else { "info" };

    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(stderr_level)),
    );
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(EnvFilter::new(file_level));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Logging was already initialised")?;
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .model(cli.model.clone())
        .endpoint(cli.endpoint.clone())
        .request_timeout_secs(cli.timeout)
        .max_retries(cli.max_retries)
        .max_dimension(cli.max_dimension);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn require_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        anyhow::bail!("Input directory not found: {}", path.display());
    }
    Ok(())
}

/// Per-work lines (when no progress bar printed them) plus the output location.
fn print_summary(report: &RunReport, workspace: &Workspace, show_progress: bool) {
    if !show_progress {
        for w in &report.works {
            eprintln!("  {:<32}  {}", w.work, w.outcome);
        }
        eprintln!(
            "{} works, {} assembled, {} failed",
            report.works.len(),
            report.assembled(),
            report.failed()
        );
    }
    eprintln!(
        "   Markdown in {}",
        bold(&workspace.final_markdown_dir().display().to_string())
    );
}
