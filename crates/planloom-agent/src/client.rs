use crate::backends::LmBackend;
use crate::extract::extract_json;
use crate::telemetry::TelemetrySink;
use chrono::Utc;
use planloom_core::{AgentKind, CallScope, ErrorCode, LlmCall, LlmCallMeta, PlanloomResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// One LM call the engine wants made.
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Which agent is being called.
    pub agent: AgentKind,
    /// Which engine operation this call belongs to.
    pub scope: CallScope,
    /// Plan scope, when known.
    pub plan_id: Option<Uuid>,
    /// Task scope, when task-bound.
    pub task_id: Option<Uuid>,
    /// System prompt (the shared + agent-specific parts).
    pub system_prompt: Option<String>,
    /// The runtime-context prompt.
    pub prompt: String,
    /// Attempt counters and retry reason, filled by the caller.
    pub meta: LlmCallMeta,
}

/// What came back, with the telemetry row id for later back-fill.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Id of the persisted [`LlmCall`] row.
    pub llm_call_id: Uuid,
    /// Raw response text (possibly truncated; see the row's meta).
    pub response_text: String,
    /// JSON extracted from the response, before contract normalization.
    pub parsed: Option<Value>,
    /// Transport-level error, when the call itself failed.
    pub error_code: Option<ErrorCode>,
    /// Human-readable error detail.
    pub error_message: Option<String>,
}

impl CallOutcome {
    /// Whether the transport succeeded and produced extractable JSON.
    pub fn is_usable(&self) -> bool {
        self.error_code.is_none() && self.parsed.is_some()
    }
}

/// The engine's only way to talk to an LM.
///
/// Wraps a backend with a hard timeout, prompt/response char caps (cut text
/// is flagged in the telemetry meta, never silently), JSON extraction, and
/// unconditional telemetry persistence.
pub struct LmClient {
    backend: Arc<dyn LmBackend>,
    timeout: Duration,
    max_prompt_chars: usize,
    max_response_chars: usize,
    sink: Arc<dyn TelemetrySink>,
}

impl LmClient {
    /// Build a client over `backend`, persisting telemetry into `sink`.
    pub fn new(
        backend: Arc<dyn LmBackend>,
        timeout: Duration,
        max_prompt_chars: usize,
        max_response_chars: usize,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            backend,
            timeout,
            max_prompt_chars,
            max_response_chars,
            sink,
        }
    }

    /// Make the call, persist the telemetry row, return the outcome.
    ///
    /// Transport failures are reported through [`CallOutcome::error_code`]
    /// rather than `Err`; `Err` is reserved for the sink itself failing.
    pub async fn call(&self, request: CallRequest) -> PlanloomResult<CallOutcome> {
        let llm_call_id = Uuid::new_v4();
        let mut meta = request.meta.clone();

        let (prompt, prompt_truncated) = truncate(&request.prompt, self.max_prompt_chars);
        meta.prompt_truncated = prompt_truncated;
        if prompt_truncated {
            warn!(
                llm_call_id = %llm_call_id,
                cap = self.max_prompt_chars,
                "prompt cut at char cap"
            );
        }

        info!(
            llm_call_id = %llm_call_id,
            agent = %request.agent,
            scope = %request.scope,
            prompt_chars = prompt.len(),
            "LM call"
        );

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            self.backend
                .complete(request.system_prompt.as_deref(), &prompt),
        )
        .await;

        let (response_text, parsed, error_code, error_message) = match result {
            Ok(Ok(completion)) => {
                let (text, response_truncated) =
                    truncate(&completion.text, self.max_response_chars);
                meta.response_truncated = response_truncated;
                if completion.refused {
                    (text, None, Some(ErrorCode::LlmRefusal), Some("the model refused the request".to_string()))
                } else {
                    let parsed = extract_json(&text);
                    let code = if parsed.is_none() {
                        Some(ErrorCode::LlmUnparseable)
                    } else {
                        None
                    };
                    let message =
                        code.map(|_| "no JSON object found in the response".to_string());
                    (text, parsed, code, message)
                }
            }
            Ok(Err(e)) => (
                String::new(),
                None,
                Some(ErrorCode::LlmTimeout),
                Some(e.to_string()),
            ),
            Err(_) => (
                String::new(),
                None,
                Some(ErrorCode::LlmTimeout),
                Some(format!("LM call exceeded {}s", self.timeout.as_secs())),
            ),
        };

        info!(
            llm_call_id = %llm_call_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            error_code = error_code.map(|c| c.as_str()).unwrap_or("-"),
            "LM call finished"
        );

        let call = LlmCall {
            llm_call_id,
            created_at: Utc::now(),
            plan_id: request.plan_id,
            task_id: request.task_id,
            agent: request.agent,
            scope: request.scope,
            prompt_text: prompt,
            response_text: response_text.clone(),
            parsed_json: parsed.clone(),
            normalized_json: None,
            validator_error: None,
            error_code,
            error_message: error_message.clone(),
            meta,
        };
        self.sink.record(&call)?;

        Ok(CallOutcome {
            llm_call_id,
            response_text,
            parsed,
            error_code,
            error_message,
        })
    }

    /// Back-fill the contract normalization result onto the telemetry row.
    pub fn finish(
        &self,
        llm_call_id: Uuid,
        normalized_json: Option<&Value>,
        validator_error: Option<&str>,
        error_code: Option<ErrorCode>,
        error_message: Option<&str>,
    ) -> PlanloomResult<()> {
        self.sink.finish(
            llm_call_id,
            normalized_json,
            validator_error,
            error_code,
            error_message,
        )
    }
}

/// Cut `text` at `cap` chars on a char boundary; the flag says whether
/// anything was lost.
fn truncate(text: &str, cap: usize) -> (String, bool) {
    if text.chars().count() <= cap {
        return (text.to_string(), false);
    }
    (text.chars().take(cap).collect(), true)
}
