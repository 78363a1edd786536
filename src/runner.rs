//! Sequential batch over an image directory.
//!
//! Every image produces exactly one `DetectionRecord`, whatever goes wrong
//! while loading, sending or parsing. Records are written as they are built
//! so an interrupted run still leaves usable results behind.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;

use crate::compare::{baseline_count, improvement_percent};
use crate::detect::{DetectionOutcome, DetectionRecord, DetectorBackend, PromptVariant};
use crate::extract::extract_detection;
use crate::ingest::{file_name, ImagePayload};

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub variant: PromptVariant,
    pub results_dir: PathBuf,
    /// Pause after each request except the last.
    pub delay: Duration,
    /// Results directory of an earlier run, used for per-image count deltas.
    pub baseline_dir: Option<PathBuf>,
}

/// Process `images` in order and return one record per image.
///
/// `observe` is called after each record has been persisted.
pub fn run_batch<F>(
    backend: &mut dyn DetectorBackend,
    images: &[PathBuf],
    options: &RunOptions,
    observe: F,
) -> Result<Vec<DetectionRecord>>
where
    F: FnMut(&DetectionRecord),
{
    run_batch_with_pause(backend, images, options, observe, std::thread::sleep)
}

/// `run_batch` with the inter-request pause supplied by the caller.
pub fn run_batch_with_pause<F, P>(
    backend: &mut dyn DetectorBackend,
    images: &[PathBuf],
    options: &RunOptions,
    mut observe: F,
    mut pause: P,
) -> Result<Vec<DetectionRecord>>
where
    F: FnMut(&DetectionRecord),
    P: FnMut(Duration),
{
    std::fs::create_dir_all(&options.results_dir).with_context(|| {
        format!(
            "failed to create results directory {}",
            options.results_dir.display()
        )
    })?;

    let mut records = Vec::with_capacity(images.len());
    for (idx, path) in images.iter().enumerate() {
        log::info!(
            "Processing {}/{}: {}",
            idx + 1,
            images.len(),
            file_name(path)
        );
        let record = process_image(backend, path, options.variant);

        if let Err(err) = write_record(&options.results_dir, &record) {
            log::warn!("Failed to save result for {}: {:#}", record.image_name, err);
        }
        log_outcome(&record, options.baseline_dir.as_deref());
        observe(&record);
        records.push(record);

        if idx + 1 < images.len() && !options.delay.is_zero() {
            pause(options.delay);
        }
    }
    Ok(records)
}

/// Load, send and parse one image. Failures end up in the record.
pub fn process_image(
    backend: &mut dyn DetectorBackend,
    path: &Path,
    variant: PromptVariant,
) -> DetectionRecord {
    let start = Instant::now();
    let mut image_sha256 = None;
    let outcome = match ImagePayload::load(path) {
        Ok(image) => {
            image_sha256 = Some(image.sha256.clone());
            match backend.detect(&image, variant) {
                Ok(reply) => extract_detection(&reply),
                Err(err) => DetectionOutcome::from_error(&err),
            }
        }
        Err(err) => DetectionOutcome::from_error(&err),
    };
    let processing_time = round_to(start.elapsed().as_secs_f64(), 2);

    DetectionRecord {
        image_name: file_name(path),
        image_path: path.display().to_string(),
        processing_time,
        detection_result: outcome,
        timestamp: Local::now().naive_local(),
        variant: Some(variant),
        image_sha256,
    }
}

/// Path of the record file for an image name: `<stem>_result.json`.
pub fn record_path(results_dir: &Path, image_name: &str) -> PathBuf {
    let stem = Path::new(image_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_name.to_string());
    results_dir.join(format!("{}_result.json", stem))
}

pub fn write_record(results_dir: &Path, record: &DetectionRecord) -> Result<PathBuf> {
    let path = record_path(results_dir, &record.image_name);
    let json = serde_json::to_string_pretty(record).context("serialize detection record")?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn log_outcome(record: &DetectionRecord, baseline_dir: Option<&Path>) {
    match record.object_count() {
        Some(count) => {
            match record.mess_level() {
                Some(level) => log::info!(
                    "  Detected {} objects (mess level: {}) in {:.1}s",
                    count,
                    level,
                    record.processing_time
                ),
                None => log::info!(
                    "  Detected {} objects in {:.1}s",
                    count,
                    record.processing_time
                ),
            }
            let baseline = baseline_dir.and_then(|dir| baseline_count(dir, &record.image_name));
            if let Some(baseline) = baseline {
                log::info!(
                    "    baseline -> current: {} -> {} ({:+.0}%)",
                    baseline,
                    count,
                    improvement_percent(baseline, count)
                );
            }
        }
        None => log::warn!(
            "  Detection failed: {}",
            record.detection_result.error().unwrap_or("unknown error")
        ),
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;

    fn options(results_dir: &Path, delay: Duration) -> RunOptions {
        RunOptions {
            variant: PromptVariant::V1,
            results_dir: results_dir.to_path_buf(),
            delay,
            baseline_dir: None,
        }
    }

    fn write_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::write(&path, b"not really a jpeg").unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn pauses_between_images_but_not_after_the_last() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let delay = Duration::from_millis(250);

        let one = write_images(dir.path(), &["a.jpg"]);
        let mut pauses = Vec::new();
        let records = run_batch_with_pause(
            &mut StubBackend::default(),
            &one,
            &options(&results, delay),
            |_| {},
            |d| pauses.push(d),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert!(pauses.is_empty());

        let three = write_images(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]);
        let mut pauses = Vec::new();
        run_batch_with_pause(
            &mut StubBackend::default(),
            &three,
            &options(&results, delay),
            |_| {},
            |d| pauses.push(d),
        )
        .unwrap();
        assert_eq!(pauses, vec![delay, delay]);

        let mut pauses = 0;
        run_batch_with_pause(
            &mut StubBackend::default(),
            &three,
            &options(&results, Duration::ZERO),
            |_| {},
            |_| pauses += 1,
        )
        .unwrap();
        assert_eq!(pauses, 0);
    }

    #[test]
    fn unwritable_record_is_still_returned() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        // A directory where a.jpg's record file should go makes that write fail.
        std::fs::create_dir_all(results.join("a_result.json")).unwrap();
        let images = write_images(dir.path(), &["a.jpg", "b.jpg"]);

        let mut observed = Vec::new();
        let records = run_batch(
            &mut StubBackend::default(),
            &images,
            &options(&results, Duration::ZERO),
            |record| observed.push(record.image_name.clone()),
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(DetectionRecord::is_success));
        assert_eq!(observed, vec!["a.jpg", "b.jpg"]);
        assert!(results.join("a_result.json").is_dir());
        assert!(results.join("b_result.json").is_file());
    }

    #[test]
    fn record_path_uses_file_stem() {
        let dir = Path::new("results");
        assert_eq!(
            record_path(dir, "room.v2.webp"),
            PathBuf::from("results/room.v2_result.json")
        );
        assert_eq!(
            record_path(dir, "kitchen.jpg"),
            PathBuf::from("results/kitchen_result.json")
        );
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(2.25, 1), 2.3);
        assert_eq!(round_to(0.0, 1), 0.0);
    }

    #[test]
    fn unreadable_image_becomes_failure_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = StubBackend::default();
        let record = process_image(
            &mut backend,
            &dir.path().join("missing.jpg"),
            PromptVariant::V1,
        );
        assert!(!record.is_success());
        assert!(record
            .detection_result
            .error()
            .unwrap()
            .contains("failed to read image"));
        assert_eq!(record.image_sha256, None);
        assert_eq!(backend.calls(), 0);
    }
}
