mod backend;
pub mod backends;
mod prompt;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{OpenAiBackend, StubBackend};
pub use prompt::PromptVariant;
pub use registry::BackendRegistry;
pub(crate) use result::number_from_value;
pub use result::{
    BoundingBox, DetectedObject, DetectionFailure, DetectionOutcome, DetectionPayload,
    DetectionRecord, MessLevel,
};
