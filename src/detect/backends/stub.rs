use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::prompt::PromptVariant;
use crate::ingest::ImagePayload;

const DEFAULT_REPLY: &str = r#"Here is the detection result:
{
  "objects": [
    {"label": "grey hoodie", "confidence": 0.91, "boundingBox": {"x": 12, "y": 60, "width": 18, "height": 14}, "category": "clothes"},
    {"label": "phone charger", "confidence": 0.64, "boundingBox": {"x": 48, "y": 40, "width": 6, "height": 3}, "category": "electronics"}
  ],
  "totalObjectCount": 2,
  "messLevel": "medium"
}"#;

/// Offline backend that answers from a fixed script.
///
/// Replies are handed out in order and the last one repeats once the script
/// runs out. An `Err` entry makes that call fail with the given message.
pub struct StubBackend {
    script: Vec<Result<String, String>>,
    calls: usize,
}

impl StubBackend {
    /// Always answer with `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self::scripted(vec![Ok(reply.into())])
    }

    pub fn scripted(script: Vec<Result<String, String>>) -> Self {
        Self { script, calls: 0 }
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &ImagePayload, variant: PromptVariant) -> Result<String> {
        log::debug!(
            "stub backend answering for {} ({})",
            image.name,
            variant.label()
        );
        let idx = self.calls.min(self.script.len().saturating_sub(1));
        self.calls += 1;
        match self.script.get(idx) {
            Some(Ok(reply)) => Ok(reply.clone()),
            Some(Err(message)) => Err(anyhow!("{}", message)),
            None => Err(anyhow!("stub backend has an empty script")),
        }
    }
}
