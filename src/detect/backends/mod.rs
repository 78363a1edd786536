pub mod openai;
pub mod stub;

pub use openai::OpenAiBackend;
pub use stub::StubBackend;
