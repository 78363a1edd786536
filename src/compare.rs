//! Object-count comparison against an earlier run.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::detect::DetectionRecord;
use crate::runner::{record_path, round_to};

/// Relative change from `baseline` to `current`, in percent. Zero when the
/// baseline is zero.
pub fn improvement_percent(baseline: usize, current: usize) -> f64 {
    if baseline == 0 {
        return 0.0;
    }
    (current as f64 - baseline as f64) / baseline as f64 * 100.0
}

/// Object count stored for `image_name` in a baseline results directory, if
/// that record exists and succeeded.
pub fn baseline_count(baseline_dir: &Path, image_name: &str) -> Option<usize> {
    let path = record_path(baseline_dir, image_name);
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<DetectionRecord>(&raw) {
        Ok(record) => record.object_count(),
        Err(err) => {
            log::debug!("ignoring baseline record {}: {}", path.display(), err);
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageComparison {
    pub image_name: String,
    pub baseline_objects: usize,
    pub current_objects: usize,
    pub improvement_percent: f64,
}

/// Per-image and overall counts for images that succeeded in both runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub baseline_dir: String,
    pub matched_images: usize,
    pub baseline_total_objects: usize,
    pub current_total_objects: usize,
    pub baseline_average_objects: f64,
    pub current_average_objects: f64,
    pub total_improvement_percent: f64,
    pub images: Vec<ImageComparison>,
}

impl BaselineComparison {
    pub fn build(
        baseline_dir: &Path,
        current: &[DetectionRecord],
        baseline: &[DetectionRecord],
    ) -> Self {
        let baseline_counts: HashMap<&str, usize> = baseline
            .iter()
            .filter_map(|record| {
                record
                    .object_count()
                    .map(|count| (record.image_name.as_str(), count))
            })
            .collect();

        let images: Vec<ImageComparison> = current
            .iter()
            .filter_map(|record| {
                let current_objects = record.object_count()?;
                let baseline_objects = *baseline_counts.get(record.image_name.as_str())?;
                Some(ImageComparison {
                    image_name: record.image_name.clone(),
                    baseline_objects,
                    current_objects,
                    improvement_percent: round_to(
                        improvement_percent(baseline_objects, current_objects),
                        1,
                    ),
                })
            })
            .collect();

        let baseline_total: usize = images.iter().map(|image| image.baseline_objects).sum();
        let current_total: usize = images.iter().map(|image| image.current_objects).sum();
        let average = |total: usize| {
            if images.is_empty() {
                0.0
            } else {
                round_to(total as f64 / images.len() as f64, 1)
            }
        };

        Self {
            baseline_dir: baseline_dir.display().to_string(),
            matched_images: images.len(),
            baseline_total_objects: baseline_total,
            current_total_objects: current_total,
            baseline_average_objects: average(baseline_total),
            current_average_objects: average(current_total),
            total_improvement_percent: round_to(
                improvement_percent(baseline_total, current_total),
                1,
            ),
            images,
        }
    }
}
