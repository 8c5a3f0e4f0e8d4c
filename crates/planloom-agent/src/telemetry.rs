use parking_lot::Mutex;
use planloom_core::{ErrorCode, LlmCall, PlanloomResult};
use serde_json::Value;
use uuid::Uuid;

/// Where LM call telemetry rows go.
///
/// The store implements this in the engine; tests use [`MemorySink`]. One
/// [`record`](TelemetrySink::record) per call is mandatory, whatever the
/// outcome; [`finish`](TelemetrySink::finish) back-fills the contract
/// normalization result once the engine has it.
pub trait TelemetrySink: Send + Sync {
    /// Persist a freshly completed (or failed) call.
    fn record(&self, call: &LlmCall) -> PlanloomResult<()>;

    /// Attach the normalization outcome to an already recorded call.
    fn finish(
        &self,
        llm_call_id: Uuid,
        normalized_json: Option<&Value>,
        validator_error: Option<&str>,
        error_code: Option<ErrorCode>,
        error_message: Option<&str>,
    ) -> PlanloomResult<()>;
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemorySink {
    calls: Mutex<Vec<LlmCall>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn calls(&self) -> Vec<LlmCall> {
        self.calls.lock().clone()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, call: &LlmCall) -> PlanloomResult<()> {
        self.calls.lock().push(call.clone());
        Ok(())
    }

    fn finish(
        &self,
        llm_call_id: Uuid,
        normalized_json: Option<&Value>,
        validator_error: Option<&str>,
        error_code: Option<ErrorCode>,
        error_message: Option<&str>,
    ) -> PlanloomResult<()> {
        let mut calls = self.calls.lock();
        if let Some(call) = calls.iter_mut().find(|c| c.llm_call_id == llm_call_id) {
            call.normalized_json = normalized_json.cloned();
            call.validator_error = validator_error.map(str::to_string);
            call.error_code = error_code;
            call.error_message = error_message.map(str::to_string);
        }
        Ok(())
    }
}
