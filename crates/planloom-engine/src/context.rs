use crate::skills::{PlainTextExtractor, TextExtractor};
use crate::workspace::Workspace;
use planloom_agent::{LmBackend, LmClient, TelemetrySink};
use planloom_core::{
    BlockedReason, Config, ErrorCode, PlanloomResult, TaskEvent, TaskNode, TaskStatus,
};
use planloom_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Telemetry sink writing into the store's `llm_calls` table.
struct StoreSink {
    store: Store,
}

impl TelemetrySink for StoreSink {
    fn record(&self, call: &planloom_core::LlmCall) -> PlanloomResult<()> {
        self.store.insert_llm_call(call)
    }

    fn finish(
        &self,
        llm_call_id: Uuid,
        normalized_json: Option<&serde_json::Value>,
        validator_error: Option<&str>,
        error_code: Option<ErrorCode>,
        error_message: Option<&str>,
    ) -> PlanloomResult<()> {
        self.store.update_llm_call_result(
            llm_call_id,
            normalized_json,
            validator_error,
            error_code,
            error_message,
        )
    }
}

/// Everything a phase needs, threaded explicitly through the call graph.
pub struct EngineContext {
    /// The durable store; the run loop is its only writer.
    pub store: Store,
    /// Engine configuration.
    pub config: Config,
    /// On-disk workspace layout.
    pub workspace: Workspace,
    /// LM client for the executor agent.
    pub executor: LmClient,
    /// LM client for the reviewer agent.
    pub reviewer: LmClient,
    /// Evidence-to-text seam.
    pub extractor: Arc<dyn TextExtractor>,
}

impl EngineContext {
    /// Wire a context from its parts. The two backends are injectable so
    /// tests can script them.
    pub fn new(
        store: Store,
        config: Config,
        workspace: Workspace,
        executor_backend: Arc<dyn LmBackend>,
        reviewer_backend: Arc<dyn LmBackend>,
    ) -> Self {
        let timeout = Duration::from_secs(config.llm.timeout_s);
        let sink: Arc<dyn TelemetrySink> = Arc::new(StoreSink {
            store: store.clone(),
        });
        let executor = LmClient::new(
            executor_backend,
            timeout,
            config.guardrails.max_prompt_chars,
            config.guardrails.max_response_chars,
            sink.clone(),
        );
        let reviewer = LmClient::new(
            reviewer_backend,
            timeout,
            config.guardrails.max_prompt_chars,
            config.guardrails.max_response_chars,
            sink,
        );
        Self {
            store,
            config,
            workspace,
            executor,
            reviewer,
            extractor: Arc::new(PlainTextExtractor),
        }
    }

    /// Swap the evidence-to-text seam (extraction plug-ins).
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Append a journal row, logging it as well.
    pub fn emit(&self, event: &TaskEvent) -> PlanloomResult<()> {
        info!(
            plan_id = %event.plan_id,
            task_id = event.task_id.map(|t| t.to_string()).unwrap_or_default(),
            event = %event.event_type,
            "event"
        );
        if let Some(task_id) = event.task_id {
            let count = self.store.event_count_for_task(task_id)?;
            if count >= self.config.guardrails.max_task_events_per_task {
                warn!(
                    task_id = %task_id,
                    count = count,
                    "task exceeds the journal guardrail; repair-db will prune"
                );
            }
        }
        self.store.insert_event(event)
    }

    /// Write a status if it actually changes, journaling the transition.
    pub fn transition(
        &self,
        node: &TaskNode,
        to: TaskStatus,
        reason: Option<BlockedReason>,
    ) -> PlanloomResult<()> {
        if node.status == to && node.blocked_reason == reason {
            return Ok(());
        }
        self.store.set_status(node.task_id, to, reason)?;
        self.emit(&TaskEvent::status_changed(
            node.plan_id,
            node.task_id,
            node.status,
            to,
            reason,
        ))
    }
}
