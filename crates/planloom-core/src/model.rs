use crate::status::{
    ActionRequired, AgentKind, AndOr, ArtifactFormat, BlockedReason, CallScope, EdgeType,
    ErrorCode, NodeType, RequirementKind, RequirementSource, SkillRunStatus, SuggestionPriority,
    TaskStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The top-level unit of work: an approved DAG of task nodes.
///
/// A plan is created once by the create-plan sub-workflow and is structurally
/// immutable after approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Primary key.
    pub plan_id: Uuid,
    /// Human-readable plan title.
    pub title: String,
    /// Agent that generated the plan.
    pub owner_agent: String,
    /// The GOAL node everything decomposes from.
    pub root_task_id: Uuid,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Optional deadline constraint.
    pub deadline: Option<DateTime<Utc>>,
    /// Plan priority constraint.
    pub priority: i32,
    /// When the reviewer approved the plan; `None` for an unapproved stub.
    pub approved_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Create a new unapproved plan.
    pub fn new(title: impl Into<String>, owner_agent: impl Into<String>, root_task_id: Uuid) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            title: title.into(),
            owner_agent: owner_agent.into(),
            root_task_id,
            created_at: Utc::now(),
            deadline: None,
            priority: 0,
            approved_at: None,
        }
    }
}

/// A node in the plan graph.
///
/// Structure (type, title, edges, requirements) is immutable after import;
/// only status fields, counters, and artifact pointers change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Primary key.
    pub task_id: Uuid,
    /// Owning plan.
    pub plan_id: Uuid,
    /// GOAL, ACTION, or CHECK.
    pub node_type: NodeType,
    /// Human-readable task title.
    pub title: String,
    /// Agent responsible for the node.
    pub owner_agent: String,
    /// Scheduling priority; higher runs first.
    pub priority: i32,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Why the task is BLOCKED, when it is.
    pub blocked_reason: Option<BlockedReason>,
    /// Executor/review attempts consumed; monotonically increasing.
    pub attempt_count: u32,
    /// The most recently produced artifact, reviewed or not.
    pub active_artifact_id: Option<Uuid>,
    /// The last artifact that passed review.
    pub approved_artifact_id: Option<Uuid>,
    /// Creation timestamp; the scheduler's final tiebreak.
    pub created_at: DateTime<Utc>,
    /// Estimated effort (strong-workflow mode).
    pub estimated_person_days: Option<f64>,
    /// What the deliverable should be (strong-workflow mode).
    pub deliverable_spec: Option<String>,
    /// The reviewer's checklist for the deliverable (strong-workflow mode).
    pub acceptance_criteria: Option<String>,
    /// For CHECK nodes: the ACTION this check reviews (strong-workflow mode).
    pub review_target_task_id: Option<Uuid>,
}

impl TaskNode {
    /// Create a PENDING node with default priority.
    pub fn new(plan_id: Uuid, node_type: NodeType, title: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            plan_id,
            node_type,
            title: title.into(),
            owner_agent: String::new(),
            priority: 0,
            status: TaskStatus::Pending,
            blocked_reason: None,
            attempt_count: 0,
            active_artifact_id: None,
            approved_artifact_id: None,
            created_at: Utc::now(),
            estimated_person_days: None,
            deliverable_spec: None,
            acceptance_criteria: None,
            review_target_task_id: None,
        }
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the owning agent.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner_agent = owner.into();
        self
    }
}

/// A directed edge between two task nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEdge {
    /// Primary key.
    pub edge_id: Uuid,
    /// Owning plan.
    pub plan_id: Uuid,
    /// DECOMPOSE, DEPENDS_ON, or ALTERNATIVE.
    pub edge_type: EdgeType,
    /// Source node.
    pub from_task_id: Uuid,
    /// Target node.
    pub to_task_id: Uuid,
    /// AND/OR aggregation; only on DECOMPOSE edges.
    pub and_or: Option<AndOr>,
    /// Alternative group; only on ALTERNATIVE edges.
    pub group_id: Option<String>,
}

impl TaskEdge {
    /// Create an edge of the given type.
    pub fn new(plan_id: Uuid, edge_type: EdgeType, from: Uuid, to: Uuid) -> Self {
        Self {
            edge_id: Uuid::new_v4(),
            plan_id,
            edge_type,
            from_task_id: from,
            to_task_id: to,
            and_or: if edge_type == EdgeType::Decompose {
                Some(AndOr::And)
            } else {
                None
            },
            group_id: None,
        }
    }
}

/// An input a task declares it needs before it can run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRequirement {
    /// Primary key.
    pub requirement_id: Uuid,
    /// Owning plan.
    pub plan_id: Uuid,
    /// Task the requirement is declared on.
    pub task_id: Uuid,
    /// Requirement name; also the expected `inputs/<name>/` directory.
    pub name: String,
    /// FILE, CONFIRMATION, or SKILL_OUTPUT.
    pub kind: RequirementKind,
    /// Whether readiness waits for it.
    pub required: bool,
    /// Minimum evidence rows before the requirement counts as satisfied.
    pub min_count: u32,
    /// Accepted file extensions (lowercase, no dot).
    pub allowed_types: Vec<String>,
    /// Who may provide the evidence.
    pub source: RequirementSource,
    /// Case-insensitive filename keywords used by the matcher.
    pub filename_keywords: Vec<String>,
}

impl InputRequirement {
    /// Create a required FILE requirement with `min_count = 1`.
    pub fn new(plan_id: Uuid, task_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            requirement_id: Uuid::new_v4(),
            plan_id,
            task_id,
            name: name.into(),
            kind: RequirementKind::File,
            required: true,
            min_count: 1,
            allowed_types: Vec::new(),
            source: RequirementSource::Any,
            filename_keywords: Vec::new(),
        }
    }
}

/// A concrete satisfaction of an [`InputRequirement`].
///
/// Unique per `(requirement_id, ref_id)`; binding the same reference twice
/// yields exactly one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Primary key.
    pub evidence_id: Uuid,
    /// The requirement this satisfies.
    pub requirement_id: Uuid,
    /// Content hash for files, confirmation id, or skill-output id.
    pub ref_id: String,
    /// What kind of reference this is.
    pub kind: RequirementKind,
    /// On-disk path for file evidence.
    pub path: Option<String>,
    /// Binding timestamp.
    pub created_at: DateTime<Utc>,
}

impl Evidence {
    /// Create file evidence keyed by its content hash.
    pub fn file(requirement_id: Uuid, content_hash: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            evidence_id: Uuid::new_v4(),
            requirement_id,
            ref_id: content_hash.into(),
            kind: RequirementKind::File,
            path: Some(path.into()),
            created_at: Utc::now(),
        }
    }
}

/// A produced deliverable version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Primary key.
    pub artifact_id: Uuid,
    /// Producing task.
    pub task_id: Uuid,
    /// Deliverable filename.
    pub name: String,
    /// On-disk path under `artifacts/<task_id>/<artifact_id>/`.
    pub path: String,
    /// Deliverable format.
    pub format: ArtifactFormat,
    /// Version counter per task, starting at 1.
    pub version: u32,
    /// sha256 of the file contents.
    pub content_hash: String,
    /// Production timestamp.
    pub created_at: DateTime<Utc>,
}

/// One structured score dimension inside a review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Scored dimension name.
    pub dimension: String,
    /// Score contribution for the dimension.
    pub score: u32,
}

/// One actionable reviewer suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    /// HIGH, MED, or LOW.
    pub priority: SuggestionPriority,
    /// What should change.
    pub change: String,
    /// Concrete steps to apply the change.
    #[serde(default)]
    pub steps: Vec<String>,
    /// How the reviewer will verify the change landed.
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
}

/// A reviewer verdict on a task's deliverable (or on a generated plan).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    /// Primary key.
    pub review_id: Uuid,
    /// Reviewed task.
    pub task_id: Uuid,
    /// Reviewer agent name.
    pub reviewer_agent: String,
    /// The artifact version locked at the moment review began.
    pub reviewed_artifact_id: Option<Uuid>,
    /// Overall score in `[0, 100]`.
    pub total_score: u32,
    /// The authoritative verdict.
    pub action_required: ActionRequired,
    /// Structured per-dimension scores.
    pub breakdown: Vec<ScoreBreakdown>,
    /// Structured rework suggestions.
    pub suggestions: Vec<Suggestion>,
    /// Free-text summary.
    pub summary: String,
    /// Verdict timestamp.
    pub created_at: DateTime<Utc>,
}

/// An external tool invocation with an idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRun {
    /// Primary key.
    pub skill_run_id: Uuid,
    /// Task the run was made for, if any.
    pub task_id: Option<Uuid>,
    /// Invoked skill name.
    pub skill_name: String,
    /// Content hashes of the inputs, sorted.
    pub input_hashes: Vec<String>,
    /// Invocation parameters.
    pub params: serde_json::Value,
    /// Run status.
    pub status: SkillRunStatus,
    /// Outputs produced by the run.
    pub outputs: serde_json::Value,
    /// `sha256(skill_name ⊕ sorted(input_hashes) ⊕ params)`.
    pub idempotency_key: String,
    /// Invocation timestamp.
    pub created_at: DateTime<Utc>,
}

/// One row of the append-only per-plan event journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Primary key.
    pub event_id: Uuid,
    /// Owning plan.
    pub plan_id: Uuid,
    /// Task the event concerns, when task-scoped.
    pub task_id: Option<Uuid>,
    /// Event tag, e.g. `STATUS_CHANGED`.
    pub event_type: String,
    /// Tag-specific structured payload.
    pub payload: serde_json::Value,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
}

/// Meta fields persisted alongside every LM call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmCallMeta {
    /// Executor attempt number, when task-scoped.
    #[serde(default)]
    pub attempt: Option<u32>,
    /// Reviewer attempt number within a plan-generation attempt.
    #[serde(default)]
    pub review_attempt: Option<u32>,
    /// Why the call is a retry, when it is one.
    #[serde(default)]
    pub retry_reason: Option<String>,
    /// The prompt was cut at the configured char cap.
    #[serde(default)]
    pub prompt_truncated: bool,
    /// The response was cut at the configured char cap.
    #[serde(default)]
    pub response_truncated: bool,
}

/// Persisted telemetry of one LM exchange, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCall {
    /// Primary key.
    pub llm_call_id: Uuid,
    /// Call timestamp.
    pub created_at: DateTime<Utc>,
    /// Plan scope, back-filled for PLAN_GEN once the stub plan row exists.
    pub plan_id: Option<Uuid>,
    /// Task scope for TASK_ACTION / TASK_CHECK calls.
    pub task_id: Option<Uuid>,
    /// Which agent was called.
    pub agent: AgentKind,
    /// Which engine operation the call belongs to.
    pub scope: CallScope,
    /// The full prompt as sent (possibly truncated; see meta).
    pub prompt_text: String,
    /// The raw response text.
    pub response_text: String,
    /// JSON extracted from the raw response, before contract normalization.
    pub parsed_json: Option<serde_json::Value>,
    /// The canonical contract shape after normalization.
    pub normalized_json: Option<serde_json::Value>,
    /// The strict-validation failure, when there was one.
    pub validator_error: Option<String>,
    /// Error code, when the call failed.
    pub error_code: Option<ErrorCode>,
    /// Error message, when the call failed.
    pub error_message: Option<String>,
    /// Attempt counters and truncation flags.
    pub meta: LlmCallMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_creation_defaults() {
        let plan_id = Uuid::new_v4();
        let node = TaskNode::new(plan_id, NodeType::Action, "Write the landing page");
        assert_eq!(node.status, TaskStatus::Pending);
        assert_eq!(node.attempt_count, 0);
        assert!(node.active_artifact_id.is_none());
        assert!(node.blocked_reason.is_none());
    }

    #[test]
    fn test_node_builders() {
        let node = TaskNode::new(Uuid::new_v4(), NodeType::Action, "t")
            .with_priority(7)
            .with_owner("xiaobo");
        assert_eq!(node.priority, 7);
        assert_eq!(node.owner_agent, "xiaobo");
    }

    #[test]
    fn test_decompose_edge_defaults_to_and() {
        let plan = Uuid::new_v4();
        let e = TaskEdge::new(plan, EdgeType::Decompose, Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(e.and_or, Some(AndOr::And));
        let d = TaskEdge::new(plan, EdgeType::DependsOn, Uuid::new_v4(), Uuid::new_v4());
        assert!(d.and_or.is_none());
    }

    #[test]
    fn test_requirement_defaults() {
        let r = InputRequirement::new(Uuid::new_v4(), Uuid::new_v4(), "product_spec");
        assert!(r.required);
        assert_eq!(r.min_count, 1);
        assert_eq!(r.kind, RequirementKind::File);
    }

    #[test]
    fn test_evidence_file_constructor() {
        let e = Evidence::file(Uuid::new_v4(), "abc123", "inputs/product_spec/spec.md");
        assert_eq!(e.ref_id, "abc123");
        assert_eq!(e.kind, RequirementKind::File);
        assert_eq!(e.path.as_deref(), Some("inputs/product_spec/spec.md"));
    }

    #[test]
    fn test_suggestion_serde_defaults() {
        let s: Suggestion = serde_json::from_str(
            r#"{"priority":"HIGH","change":"add game-over screen"}"#,
        )
        .unwrap();
        assert_eq!(s.priority, SuggestionPriority::High);
        assert!(s.steps.is_empty());
        assert!(s.acceptance_criteria.is_none());
    }

    #[test]
    fn test_llm_call_meta_defaults() {
        let m: LlmCallMeta = serde_json::from_str("{}").unwrap();
        assert!(m.attempt.is_none());
        assert!(!m.prompt_truncated);
    }
}
