//! eval_report - rebuild report files from stored per-image records

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use clutter_eval::{load_records, AccuracyReport, BaselineComparison, EvalConfig, PromptVariant};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Prompt variant the records were produced with (v1|v2).
    #[arg(long, env = "CLUTTER_EVAL_VARIANT", default_value = "v1")]
    variant: String,
    /// Results directory holding `<stem>_result.json` records.
    #[arg(long)]
    results_dir: Option<PathBuf>,
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

    let results_dir = match args.results_dir {
        Some(dir) => dir,
        None => {
            let _stage = ui.stage("Load configuration");
            EvalConfig::load()?.results_dir_for(variant)
        }
    };

    let records = {
        let _stage = ui.stage("Load records");
        load_records(&results_dir)?
    };
    if records.is_empty() {
        return Err(anyhow!(
            "no *_result.json records found in {}",
            results_dir.display()
        ));
    }

    let mut report = AccuracyReport::from_records(&records, variant);
    if let Some(dir) = args.baseline_dir.as_deref() {
        let baseline = {
            let _stage = ui.stage("Load baseline records");
            load_records(dir)?
        };
        report = report.with_baseline(BaselineComparison::build(dir, &records, &baseline));
    }

    let paths = {
        let _stage = ui.stage("Write report");
        report.write(&results_dir)?
    };
    println!(
        "{} records aggregated: {} succeeded, {} failed, {} objects",
        report.total_images_processed,
        report.successful_detections,
        report.failed_detections,
        report.total_objects_detected
    );
    println!("report written to {}", paths.json.display());
    println!("summary written to {}", paths.summary.display());
    Ok(())
}
