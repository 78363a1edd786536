//! Aggregate accuracy report over a set of detection records.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::compare::BaselineComparison;
use crate::detect::{DetectionRecord, PromptVariant};
use crate::runner::round_to;

pub const SUMMARY_FILE_NAME: &str = "SUMMARY.md";
const RECORD_SUFFIX: &str = "_result.json";
const HIGH_CONFIDENCE: f64 = 0.8;
const MEDIUM_CONFIDENCE: f64 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl ConfidenceDistribution {
    /// High is `>= 0.8`, medium `>= 0.5`, everything else low.
    pub fn record(&mut self, confidence: f64) {
        if confidence >= HIGH_CONFIDENCE {
            self.high += 1;
        } else if confidence >= MEDIUM_CONFIDENCE {
            self.medium += 1;
        } else {
            self.low += 1;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub timestamp: NaiveDateTime,
    pub variant: PromptVariant,
    pub total_images_processed: usize,
    pub successful_detections: usize,
    pub failed_detections: usize,
    pub total_objects_detected: usize,
    pub average_objects_per_image: f64,
    /// Seconds, over successful records only.
    pub average_processing_time: f64,
    pub category_breakdown: BTreeMap<String, usize>,
    pub confidence_distribution: ConfidenceDistribution,
    pub mess_level_breakdown: BTreeMap<String, usize>,
    pub failed_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompt_improvements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<BaselineComparison>,
}

/// Files written by `AccuracyReport::write`.
#[derive(Clone, Debug)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub summary: PathBuf,
}

impl AccuracyReport {
    /// Single pass over `records`. Records without an objects list count as
    /// failed and contribute nothing else.
    pub fn from_records(records: &[DetectionRecord], variant: PromptVariant) -> Self {
        let mut successful = 0usize;
        let mut total_objects = 0usize;
        let mut total_time = 0.0f64;
        let mut category_breakdown = BTreeMap::new();
        let mut confidence_distribution = ConfidenceDistribution::default();
        let mut mess_level_breakdown = BTreeMap::new();
        let mut failed_images = Vec::new();

        for record in records {
            let Some(objects) = record.objects() else {
                failed_images.push(record.image_name.clone());
                continue;
            };
            successful += 1;
            total_objects += objects.len();
            total_time += record.processing_time;
            for object in objects {
                *category_breakdown
                    .entry(object.category_or_unknown().to_string())
                    .or_insert(0) += 1;
                confidence_distribution.record(object.confidence_or_zero());
            }
            if let Some(level) = record.mess_level() {
                *mess_level_breakdown
                    .entry(level.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }

        let per_success = |total: f64, decimals: i32| {
            if successful == 0 {
                0.0
            } else {
                round_to(total / successful as f64, decimals)
            }
        };

        Self {
            timestamp: Local::now().naive_local(),
            variant,
            total_images_processed: records.len(),
            successful_detections: successful,
            failed_detections: failed_images.len(),
            total_objects_detected: total_objects,
            average_objects_per_image: per_success(total_objects as f64, 1),
            average_processing_time: per_success(total_time, 2),
            category_breakdown,
            confidence_distribution,
            mess_level_breakdown,
            failed_images,
            prompt_improvements: variant
                .improvements()
                .iter()
                .map(|item| item.to_string())
                .collect(),
            baseline: None,
        }
    }

    pub fn with_baseline(mut self, baseline: BaselineComparison) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Markdown view of the report, for `SUMMARY.md`.
    pub fn markdown(&self) -> MarkdownSummary<'_> {
        MarkdownSummary { report: self }
    }

    /// Write the variant's JSON report and `SUMMARY.md` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<ReportPaths> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create report directory {}", dir.display()))?;
        let json_path = dir.join(self.variant.report_file_name());
        let json = serde_json::to_string_pretty(self).context("serialize accuracy report")?;
        std::fs::write(&json_path, json)
            .with_context(|| format!("failed to write {}", json_path.display()))?;

        let summary_path = dir.join(SUMMARY_FILE_NAME);
        std::fs::write(&summary_path, self.markdown().to_string())
            .with_context(|| format!("failed to write {}", summary_path.display()))?;
        Ok(ReportPaths {
            json: json_path,
            summary: summary_path,
        })
    }
}

pub struct MarkdownSummary<'a> {
    report: &'a AccuracyReport,
}

impl fmt::Display for MarkdownSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(
            f,
            "# Vision Detection Accuracy Report ({})",
            report.variant.label().to_uppercase()
        )?;
        writeln!(f)?;
        writeln!(f, "Generated: {}", report.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f)?;
        writeln!(f, "## Overview")?;
        writeln!(
            f,
            "- **Total Images Processed**: {}",
            report.total_images_processed
        )?;
        writeln!(
            f,
            "- **Successful Detections**: {}",
            report.successful_detections
        )?;
        writeln!(f, "- **Failed Detections**: {}", report.failed_detections)?;
        writeln!(
            f,
            "- **Total Objects Detected**: {}",
            report.total_objects_detected
        )?;
        writeln!(
            f,
            "- **Average Objects per Image**: {:.1}",
            report.average_objects_per_image
        )?;
        writeln!(
            f,
            "- **Average Processing Time**: {:.2}s",
            report.average_processing_time
        )?;
        writeln!(f)?;

        writeln!(f, "## Category Breakdown")?;
        if report.category_breakdown.is_empty() {
            writeln!(f, "None")?;
        }
        for (category, count) in &report.category_breakdown {
            writeln!(f, "- {}: {}", category, count)?;
        }
        writeln!(f)?;

        let confidence = &report.confidence_distribution;
        writeln!(f, "## Confidence Distribution")?;
        writeln!(f, "- High (≥0.8): {}", confidence.high)?;
        writeln!(f, "- Medium (0.5-0.8): {}", confidence.medium)?;
        writeln!(f, "- Low (<0.5): {}", confidence.low)?;
        writeln!(f)?;

        if !report.mess_level_breakdown.is_empty() {
            writeln!(f, "## Mess Levels")?;
            for (level, count) in &report.mess_level_breakdown {
                writeln!(f, "- {}: {}", level, count)?;
            }
            writeln!(f)?;
        }

        if !report.prompt_improvements.is_empty() {
            writeln!(f, "## Prompt Changes")?;
            for item in &report.prompt_improvements {
                writeln!(f, "- {}", item)?;
            }
            writeln!(f)?;
        }

        if let Some(baseline) = &report.baseline {
            writeln!(f, "## Baseline Comparison")?;
            writeln!(f, "Baseline: `{}`", baseline.baseline_dir)?;
            writeln!(f)?;
            writeln!(
                f,
                "- **Matched Images**: {}",
                baseline.matched_images
            )?;
            writeln!(
                f,
                "- **Objects**: {} -> {} ({:+.1}%)",
                baseline.baseline_total_objects,
                baseline.current_total_objects,
                baseline.total_improvement_percent
            )?;
            writeln!(
                f,
                "- **Average per Image**: {:.1} -> {:.1}",
                baseline.baseline_average_objects, baseline.current_average_objects
            )?;
            if !baseline.images.is_empty() {
                writeln!(f)?;
                writeln!(f, "| Image | Baseline | Current | Change |")?;
                writeln!(f, "|---|---:|---:|---:|")?;
                for image in &baseline.images {
                    writeln!(
                        f,
                        "| {} | {} | {} | {:+.1}% |",
                        image.image_name,
                        image.baseline_objects,
                        image.current_objects,
                        image.improvement_percent
                    )?;
                }
            }
            writeln!(f)?;
        }

        writeln!(f, "## Failed Images")?;
        if report.failed_images.is_empty() {
            writeln!(f, "None")?;
        }
        for image in &report.failed_images {
            writeln!(f, "- {}", image)?;
        }
        Ok(())
    }
}

/// Read every `*_result.json` record in `dir`, sorted by file name.
/// Files that fail to parse are skipped with a warning.
pub fn load_records(dir: &Path) -> Result<Vec<DetectionRecord>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read results directory {}", dir.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", dir.display()))?
            .path();
        let is_record = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(RECORD_SUFFIX));
        if is_record && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        let parsed = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))
            .and_then(|raw| {
                serde_json::from_str::<DetectionRecord>(&raw)
                    .with_context(|| format!("invalid record {}", path.display()))
            });
        match parsed {
            Ok(record) => records.push(record),
            Err(err) => log::warn!("Skipping {}: {:#}", path.display(), err),
        }
    }
    Ok(records)
}
