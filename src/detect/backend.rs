use anyhow::Result;

use super::prompt::PromptVariant;
use crate::ingest::ImagePayload;

/// Detector backend trait.
///
/// Backends own the transport to whatever model answers the prompt. They
/// return the reply text untouched; extracting the embedded JSON is the
/// caller's job, so every backend is parsed the same way.
pub trait DetectorBackend: Send {
    /// Backend identifier used for selection on the command line.
    fn name(&self) -> &'static str;

    /// Send one image with the variant's instruction and return the reply text.
    fn detect(&mut self, image: &ImagePayload, variant: PromptVariant) -> Result<String>;
}
