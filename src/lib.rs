//! Clutter detection evaluation harness.
//!
//! Sends room photographs to a hosted multimodal model with one of two prompt
//! variants, stores every reply as a per-image JSON record and folds the
//! records into an accuracy report.
//!
//! # Pipeline
//!
//! 1. `config`: defaults, TOML file, `.env` and environment overrides.
//! 2. `ingest`: enumerate and load images from a flat directory.
//! 3. `detect`: prompt variants and backends (hosted chat completion, stub).
//! 4. `extract`: pull the embedded JSON out of free-form reply text.
//! 5. `runner`: sequential batch, one record per image, failures included.
//! 6. `report` / `compare`: aggregate counts and compare against a baseline run.
//!
//! Detection itself is delegated entirely to the hosted model.

pub mod compare;
pub mod config;
pub mod detect;
pub mod extract;
pub mod ingest;
pub mod report;
pub mod runner;

pub use compare::{improvement_percent, BaselineComparison, ImageComparison};
pub use config::{ApiSettings, EvalConfig};
pub use detect::{
    BackendRegistry, DetectedObject, DetectionOutcome, DetectionPayload, DetectionRecord,
    DetectorBackend, MessLevel, OpenAiBackend, PromptVariant, StubBackend,
};
pub use extract::extract_detection;
pub use ingest::{list_images, ImagePayload};
pub use report::{load_records, AccuracyReport, ConfidenceDistribution};
pub use runner::{run_batch, run_batch_with_pause, RunOptions};
