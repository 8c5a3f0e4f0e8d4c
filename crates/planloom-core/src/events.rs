use crate::model::TaskEvent;
use crate::status::{BlockedReason, ErrorCode, TaskStatus};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

/// Tags of the append-only task event journal.
///
/// The payload is tag-specific but always JSON; readers scan events in
/// insertion order per task to recover causality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A task status actually changed.
    StatusChanged,
    /// Evidence was bound to a requirement.
    EvidenceAdded,
    /// An artifact version was produced.
    ArtifactCreated,
    /// A review verdict was persisted.
    ReviewCreated,
    /// A structured error with code and hint.
    Error,
    /// The reviewer rejected a generated plan.
    PlanReviewed,
    /// The reviewer approved a generated plan.
    PlanApproved,
    /// The matcher saw a file under `inputs/`.
    FileObserved,
    /// A previously observed file disappeared.
    FileRemoved,
    /// A file scored a tie across distinct requirements; nothing was bound.
    InputConflict,
    /// A run-level fuse tripped.
    Timeout,
    /// Normalization rewrote a START/END chain into DECOMPOSE fan-out.
    RewriteChain,
    /// Normalization synthesized missing root DECOMPOSE edges.
    RewriteRootEdges,
}

impl EventType {
    /// Canonical uppercase tag text.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::StatusChanged => "STATUS_CHANGED",
            EventType::EvidenceAdded => "EVIDENCE_ADDED",
            EventType::ArtifactCreated => "ARTIFACT_CREATED",
            EventType::ReviewCreated => "REVIEW_CREATED",
            EventType::Error => "ERROR",
            EventType::PlanReviewed => "PLAN_REVIEWED",
            EventType::PlanApproved => "PLAN_APPROVED",
            EventType::FileObserved => "FILE_OBSERVED",
            EventType::FileRemoved => "FILE_REMOVED",
            EventType::InputConflict => "INPUT_CONFLICT",
            EventType::Timeout => "TIMEOUT",
            EventType::RewriteChain => "REWRITE_CHAIN",
            EventType::RewriteRootEdges => "REWRITE_ROOT_EDGES",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TaskEvent {
    /// Build an event with an arbitrary payload.
    pub fn new(
        plan_id: Uuid,
        task_id: Option<Uuid>,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            plan_id,
            task_id,
            event_type: event_type.as_str().to_string(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Journal an actual status write.
    pub fn status_changed(
        plan_id: Uuid,
        task_id: Uuid,
        before: TaskStatus,
        after: TaskStatus,
        reason: Option<BlockedReason>,
    ) -> Self {
        Self::new(
            plan_id,
            Some(task_id),
            EventType::StatusChanged,
            json!({
                "before": before.as_str(),
                "after": after.as_str(),
                "reason": reason.map(|r| r.as_str()),
            }),
        )
    }

    /// Journal a structured error with its code, hint, and telemetry link.
    pub fn error(
        plan_id: Uuid,
        task_id: Option<Uuid>,
        code: ErrorCode,
        message: impl Into<String>,
        llm_call_id: Option<Uuid>,
    ) -> Self {
        Self::new(
            plan_id,
            task_id,
            EventType::Error,
            json!({
                "code": code.as_str(),
                "message": message.into(),
                "hint": code.hint(),
                "llm_call_id": llm_call_id,
            }),
        )
    }

    /// Journal a fuse trip.
    pub fn timeout(plan_id: Uuid, scope: &str, detail: impl Into<String>) -> Self {
        Self::new(
            plan_id,
            None,
            EventType::Timeout,
            json!({ "scope": scope, "detail": detail.into() }),
        )
    }
}
