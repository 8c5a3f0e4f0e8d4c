pub mod claude;
pub mod openai;

pub use claude::ClaudeBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use planloom_core::PlanloomResult;

/// A completed (non-streaming) LM exchange.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The response text.
    pub text: String,
    /// The provider flagged the response as a refusal.
    pub refused: bool,
}

/// Trait for LM provider backends.
///
/// Each provider (Claude, OpenAI, scripted fakes in tests) implements this
/// trait to handle the actual exchange. [`crate::LmClient`] layers timeout,
/// truncation, and telemetry on top, so implementations stay plain.
#[async_trait]
pub trait LmBackend: Send + Sync {
    /// One prompt in, one completion out.
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
    ) -> PlanloomResult<Completion>;
}
