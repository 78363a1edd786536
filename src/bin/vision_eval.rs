//! vision_eval - run one prompt variant over every image in a directory

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use clutter_eval::{
    list_images, load_records, run_batch, AccuracyReport, BackendRegistry, BaselineComparison,
    EvalConfig, OpenAiBackend, PromptVariant, RunOptions, StubBackend,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Send room photographs to a vision model and report clutter detection results"
)]
struct Args {
    /// Prompt variant to evaluate (v1|v2).
    #[arg(long, env = "CLUTTER_EVAL_VARIANT", default_value = "v1")]
    variant: String,
    /// Directory of room photographs (defaults to the configured images dir).
    #[arg(long)]
    images_dir: Option<PathBuf>,
    /// Directory for per-image records and reports (defaults to the variant's results dir).
    #[arg(long)]
    results_dir: Option<PathBuf>,
    /// Detector backend (openai|stub).
    #[arg(long, default_value = "openai")]
    backend: String,
    /// Reply text served by the stub backend instead of its built-in sample.
    #[arg(long)]
    stub_reply_file: Option<PathBuf>,
    /// Pause between requests in milliseconds (overrides config).
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Earlier results directory to compare object counts against.
    #[arg(long)]
    baseline_dir: Option<PathBuf>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);
    let variant: PromptVariant = args.variant.parse()?;

    let cfg = {
        let _stage = ui.stage("Load configuration");
        EvalConfig::load()?
    };

    let mut registry = build_registry(&args, &cfg)?;
    registry.set_default(&args.backend)?;

    let images_dir = args.images_dir.clone().unwrap_or_else(|| cfg.images_dir.clone());
    let images = {
        let _stage = ui.stage("Enumerate images");
        list_images(&images_dir)?
    };
    log::info!(
        "Found {} test images in {}",
        images.len(),
        images_dir.display()
    );
    if images.is_empty() {
        log::warn!("No .jpg, .jpeg, .webp or .png files to process");
    }

    let results_dir = args
        .results_dir
        .clone()
        .unwrap_or_else(|| cfg.results_dir_for(variant));
    let baseline_dir = args.baseline_dir.clone().or_else(|| {
        variant
            .baseline()
            .map(|baseline| cfg.results_dir_for(baseline))
            .filter(|dir| dir.is_dir())
    });
    let options = RunOptions {
        variant,
        results_dir: results_dir.clone(),
        delay: args
            .delay_ms
            .map(Duration::from_millis)
            .unwrap_or(cfg.request_delay),
        baseline_dir: baseline_dir.clone(),
    };

    let backend = registry
        .default_backend_mut()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;
    log::info!(
        "Running {} prompt with {} backend, results in {}",
        variant,
        backend.name(),
        results_dir.display()
    );
    let progress = ui.progress(
        images.len(),
        log::log_enabled!(target: "clutter_eval::runner", log::Level::Info),
    );
    let records = run_batch(&mut **backend, &images, &options, |record| {
        progress.advance(&record.image_name)
    })?;
    progress.finish();

    let mut report = AccuracyReport::from_records(&records, variant);
    if let Some(dir) = baseline_dir.as_deref() {
        match load_records(dir) {
            Ok(baseline) => {
                report = report.with_baseline(BaselineComparison::build(dir, &records, &baseline))
            }
            Err(err) => log::warn!("Baseline comparison skipped: {:#}", err),
        }
    }
    let paths = {
        let _stage = ui.stage("Write report");
        report.write(&results_dir)?
    };

    println!(
        "{} images processed: {} succeeded, {} failed",
        report.total_images_processed, report.successful_detections, report.failed_detections
    );
    println!(
        "detected {} objects ({:.1} avg per image)",
        report.total_objects_detected, report.average_objects_per_image
    );
    if let Some(baseline) = &report.baseline {
        println!(
            "baseline {} -> {} objects over {} matched images ({:+.1}%)",
            baseline.baseline_total_objects,
            baseline.current_total_objects,
            baseline.matched_images,
            baseline.total_improvement_percent
        );
    }
    println!("report written to {}", paths.json.display());
    println!("summary written to {}", paths.summary.display());
    Ok(())
}

fn build_registry(args: &Args, cfg: &EvalConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    match args.backend.as_str() {
        "openai" => {
            registry.register(OpenAiBackend::new(&cfg.api)?);
        }
        "stub" => {
            let backend = match args.stub_reply_file.as_deref() {
                Some(path) => StubBackend::new(std::fs::read_to_string(path).with_context(
                    || format!("failed to read stub reply file {}", path.display()),
                )?),
                None => StubBackend::default(),
            };
            registry.register(backend);
        }
        other => {
            return Err(anyhow!(
                "unknown backend '{}'; expected openai or stub",
                other
            ))
        }
    }
    Ok(registry)
}
