//! LM transport for the Planloom engine.
//!
//! The engine never talks HTTP directly: it goes through [`LmClient`], which
//! wraps an [`LmBackend`] (Claude or OpenAI, or a scripted fake in tests)
//! with a hard timeout, prompt/response char caps, JSON extraction from
//! prose, and unconditional telemetry — one [`planloom_core::LlmCall`] row
//! per call, success or not, through the [`TelemetrySink`] seam.

/// Provider backends.
pub mod backends;
mod client;
mod extract;
mod telemetry;

pub use backends::{ClaudeBackend, Completion, LmBackend, OpenAiBackend};
pub use client::{CallOutcome, CallRequest, LmClient};
pub use extract::extract_json;
pub use telemetry::{MemorySink, TelemetrySink};
