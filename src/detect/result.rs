use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::prompt::PromptVariant;

const UNKNOWN_CATEGORY: &str = "unknown";

/// Bounding box as percentages (0..100) of the image dimensions.
///
/// Coordinates the model left out, nulled or wrote as non-numbers are `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub x: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub y: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub width: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub height: Option<f64>,
}

/// A JSON number, or a string holding one.
pub(crate) fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}

/// One object the model reported.
///
/// Fields are optional because the model does not always follow the schema.
/// Keys outside the schema are kept in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub confidence: Option<f64>,
    #[serde(
        rename = "boundingBox",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DetectedObject {
    /// Missing confidence counts as zero.
    pub fn confidence_or_zero(&self) -> f64 {
        self.confidence.unwrap_or(0.0)
    }

    pub fn category_or_unknown(&self) -> &str {
        self.category.as_deref().unwrap_or(UNKNOWN_CATEGORY)
    }
}

/// Self-reported severity of the room.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessLevel {
    Low,
    Medium,
    High,
    Extreme,
    Other(String),
}

impl MessLevel {
    pub fn as_str(&self) -> &str {
        match self {
            MessLevel::Low => "low",
            MessLevel::Medium => "medium",
            MessLevel::High => "high",
            MessLevel::Extreme => "extreme",
            MessLevel::Other(raw) => raw,
        }
    }
}

impl From<String> for MessLevel {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => MessLevel::Low,
            "medium" => MessLevel::Medium,
            "high" => MessLevel::High,
            "extreme" => MessLevel::Extreme,
            _ => MessLevel::Other(raw),
        }
    }
}

impl From<&str> for MessLevel {
    fn from(raw: &str) -> Self {
        MessLevel::from(raw.to_string())
    }
}

impl From<MessLevel> for String {
    fn from(level: MessLevel) -> Self {
        match level {
            MessLevel::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed model reply that carried an `objects` array.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionPayload {
    pub objects: Vec<DetectedObject>,
    #[serde(rename = "totalObjectCount", default)]
    pub total_object_count: u64,
    #[serde(rename = "messLevel", default, skip_serializing_if = "Option::is_none")]
    pub mess_level: Option<MessLevel>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionFailure {
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

/// Outcome stored under `detection_result`.
///
/// Serialized without a tag: success is recognised by the `objects` key, so
/// anything else read back from disk lands in `Failure`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetectionOutcome {
    Success(DetectionPayload),
    Failure(DetectionFailure),
}

impl DetectionOutcome {
    pub fn failure(error: impl Into<String>, raw_content: Option<&str>) -> Self {
        DetectionOutcome::Failure(DetectionFailure {
            error: error.into(),
            raw_content: raw_content.map(str::to_string),
        })
    }

    /// Failure outcome for an error raised before any reply text existed.
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self::failure(format!("{err:#}"), None)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DetectionOutcome::Success(_))
    }

    pub fn payload(&self) -> Option<&DetectionPayload> {
        match self {
            DetectionOutcome::Success(payload) => Some(payload),
            DetectionOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            DetectionOutcome::Success(_) => None,
            DetectionOutcome::Failure(failure) => Some(&failure.error),
        }
    }
}

/// One image's request/response outcome, written once as `<stem>_result.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub image_name: String,
    pub image_path: String,
    /// Seconds spent on request and parse, two decimals.
    pub processing_time: f64,
    pub detection_result: DetectionOutcome,
    pub timestamp: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<PromptVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
}

impl DetectionRecord {
    pub fn is_success(&self) -> bool {
        self.detection_result.is_success()
    }

    pub fn objects(&self) -> Option<&[DetectedObject]> {
        self.detection_result
            .payload()
            .map(|payload| payload.objects.as_slice())
    }

    pub fn object_count(&self) -> Option<usize> {
        self.objects().map(<[DetectedObject]>::len)
    }

    pub fn mess_level(&self) -> Option<&MessLevel> {
        self.detection_result
            .payload()
            .and_then(|payload| payload.mess_level.as_ref())
    }
}
