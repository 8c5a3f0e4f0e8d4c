use serde::{Deserialize, Serialize};

/// Status of a task node in the plan graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Imported but not yet swept by readiness.
    Pending,
    /// All prerequisites and inputs satisfied; the scheduler may run it.
    Ready,
    /// The executor is working on it within the current tick.
    InProgress,
    /// An ACTION holding an unreviewed candidate artifact.
    ReadyToCheck,
    /// Rejected by review; scheduled ahead of READY tasks for rework.
    ToBeModify,
    /// Cannot proceed; see the blocked reason.
    Blocked,
    /// Approved (ACTION) or aggregated (GOAL).
    Done,
    /// An executor attempt failed with a hard error.
    Failed,
    /// Dropped from the plan; never revisited.
    Abandoned,
}

impl TaskStatus {
    /// Canonical uppercase text used in the database and the wire contracts.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Ready => "READY",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::ReadyToCheck => "READY_TO_CHECK",
            TaskStatus::ToBeModify => "TO_BE_MODIFY",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Abandoned => "ABANDONED",
        }
    }

    /// Parse the canonical text back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "READY" => Some(TaskStatus::Ready),
            "IN_PROGRESS" => Some(TaskStatus::InProgress),
            "READY_TO_CHECK" => Some(TaskStatus::ReadyToCheck),
            "TO_BE_MODIFY" => Some(TaskStatus::ToBeModify),
            "BLOCKED" => Some(TaskStatus::Blocked),
            "DONE" => Some(TaskStatus::Done),
            "FAILED" => Some(TaskStatus::Failed),
            "ABANDONED" => Some(TaskStatus::Abandoned),
            _ => None,
        }
    }

    /// Whether the status is terminal for the readiness sweep.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Abandoned)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a BLOCKED task cannot proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockedReason {
    /// A required input file or confirmation is missing.
    WaitingInput,
    /// An upstream skill must produce the missing input.
    WaitingSkill,
    /// A human must intervene (attempt cap, reviewer escalation, conflict).
    WaitingExternal,
    /// A human approval gate is pending.
    WaitingApproval,
}

impl BlockedReason {
    /// Canonical uppercase text used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockedReason::WaitingInput => "WAITING_INPUT",
            BlockedReason::WaitingSkill => "WAITING_SKILL",
            BlockedReason::WaitingExternal => "WAITING_EXTERNAL",
            BlockedReason::WaitingApproval => "WAITING_APPROVAL",
        }
    }

    /// Parse the canonical text back into a reason.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WAITING_INPUT" => Some(BlockedReason::WaitingInput),
            "WAITING_SKILL" => Some(BlockedReason::WaitingSkill),
            "WAITING_EXTERNAL" => Some(BlockedReason::WaitingExternal),
            "WAITING_APPROVAL" => Some(BlockedReason::WaitingApproval),
            _ => None,
        }
    }
}

impl std::fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a node in the plan graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Aggregator; DONE when its DECOMPOSE children are.
    Goal,
    /// Executor-run; produces a deliverable.
    Action,
    /// Reviewer-run bookkeeping node (strong-workflow mode).
    Check,
}

impl NodeType {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Goal => "GOAL",
            NodeType::Action => "ACTION",
            NodeType::Check => "CHECK",
        }
    }

    /// Parse the canonical text back into a node type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GOAL" => Some(NodeType::Goal),
            "ACTION" => Some(NodeType::Action),
            "CHECK" => Some(NodeType::Check),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of edge between two task nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Parent-to-child structural decomposition; carries AND/OR metadata.
    Decompose,
    /// Execution-order dependency; the graph must stay acyclic on these.
    DependsOn,
    /// Mutually exclusive alternatives within a group.
    Alternative,
}

impl EdgeType {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Decompose => "DECOMPOSE",
            EdgeType::DependsOn => "DEPENDS_ON",
            EdgeType::Alternative => "ALTERNATIVE",
        }
    }

    /// Parse the canonical text back into an edge type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DECOMPOSE" => Some(EdgeType::Decompose),
            "DEPENDS_ON" => Some(EdgeType::DependsOn),
            "ALTERNATIVE" => Some(EdgeType::Alternative),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AND/OR aggregation metadata on DECOMPOSE edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AndOr {
    /// All children must be DONE for the parent to aggregate.
    And,
    /// Any single child DONE completes the parent.
    Or,
}

impl AndOr {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            AndOr::And => "AND",
            AndOr::Or => "OR",
        }
    }

    /// Parse the canonical text back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AND" => Some(AndOr::And),
            "OR" => Some(AndOr::Or),
            _ => None,
        }
    }
}

/// Kind of input a requirement declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequirementKind {
    /// A file dropped under `inputs/`.
    File,
    /// A human confirmation id.
    Confirmation,
    /// Output of a skill run.
    SkillOutput,
}

impl RequirementKind {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::File => "FILE",
            RequirementKind::Confirmation => "CONFIRMATION",
            RequirementKind::SkillOutput => "SKILL_OUTPUT",
        }
    }

    /// Parse the canonical text back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FILE" => Some(RequirementKind::File),
            "CONFIRMATION" => Some(RequirementKind::Confirmation),
            "SKILL_OUTPUT" => Some(RequirementKind::SkillOutput),
            _ => None,
        }
    }
}

/// Who may satisfy a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequirementSource {
    /// Only user-provided evidence counts.
    User,
    /// Only agent-produced evidence counts.
    Agent,
    /// Either source is accepted.
    Any,
}

impl RequirementSource {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementSource::User => "USER",
            RequirementSource::Agent => "AGENT",
            RequirementSource::Any => "ANY",
        }
    }

    /// Parse the canonical text back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(RequirementSource::User),
            "AGENT" => Some(RequirementSource::Agent),
            "ANY" => Some(RequirementSource::Any),
            _ => None,
        }
    }
}

/// Allowed deliverable formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Markdown.
    Md,
    /// Plain text.
    Txt,
    /// JSON.
    Json,
    /// HTML.
    Html,
    /// CSS.
    Css,
    /// JavaScript.
    Js,
}

impl ArtifactFormat {
    /// Lowercase extension text.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactFormat::Md => "md",
            ArtifactFormat::Txt => "txt",
            ArtifactFormat::Json => "json",
            ArtifactFormat::Html => "html",
            ArtifactFormat::Css => "css",
            ArtifactFormat::Js => "js",
        }
    }

    /// Parse a lowercase extension.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "md" => Some(ArtifactFormat::Md),
            "txt" => Some(ArtifactFormat::Txt),
            "json" => Some(ArtifactFormat::Json),
            "html" => Some(ArtifactFormat::Html),
            "css" => Some(ArtifactFormat::Css),
            "js" => Some(ArtifactFormat::Js),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reviewer's verdict on a deliverable or a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionRequired {
    /// Accept the deliverable as-is.
    Approve,
    /// Send it back for rework with suggestions.
    Modify,
    /// Escalate to a human; the agents cannot resolve this.
    RequestExternalInput,
}

impl ActionRequired {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionRequired::Approve => "APPROVE",
            ActionRequired::Modify => "MODIFY",
            ActionRequired::RequestExternalInput => "REQUEST_EXTERNAL_INPUT",
        }
    }

    /// Parse the canonical text back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPROVE" => Some(ActionRequired::Approve),
            "MODIFY" => Some(ActionRequired::Modify),
            "REQUEST_EXTERNAL_INPUT" => Some(ActionRequired::RequestExternalInput),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionRequired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority attached to a reviewer suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionPriority {
    /// Must be addressed before re-review.
    High,
    /// Should be addressed.
    Med,
    /// Nice to have.
    Low,
}

impl SuggestionPriority {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionPriority::High => "HIGH",
            SuggestionPriority::Med => "MED",
            SuggestionPriority::Low => "LOW",
        }
    }

    /// Parse the canonical text back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HIGH" => Some(SuggestionPriority::High),
            "MED" => Some(SuggestionPriority::Med),
            "LOW" => Some(SuggestionPriority::Low),
            _ => None,
        }
    }
}

/// Which of the two agents made an LM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Decomposes tasks and produces deliverables.
    Executor,
    /// Scores deliverables and gates completion.
    Reviewer,
}

impl AgentKind {
    /// Lowercase text used in telemetry rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Executor => "executor",
            AgentKind::Reviewer => "reviewer",
        }
    }

    /// Parse the lowercase text back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "executor" => Some(AgentKind::Executor),
            "reviewer" => Some(AgentKind::Reviewer),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine operation an LM call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallScope {
    /// Plan generation by the executor.
    PlanGen,
    /// Plan review by the reviewer.
    PlanReview,
    /// Deliverable production on a task.
    TaskAction,
    /// Deliverable review on a task.
    TaskCheck,
}

impl CallScope {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallScope::PlanGen => "PLAN_GEN",
            CallScope::PlanReview => "PLAN_REVIEW",
            CallScope::TaskAction => "TASK_ACTION",
            CallScope::TaskCheck => "TASK_CHECK",
        }
    }

    /// Parse the canonical text back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PLAN_GEN" => Some(CallScope::PlanGen),
            "PLAN_REVIEW" => Some(CallScope::PlanReview),
            "TASK_ACTION" => Some(CallScope::TaskAction),
            "TASK_CHECK" => Some(CallScope::TaskCheck),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a skill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillRunStatus {
    /// Queued or running.
    Pending,
    /// Finished with outputs.
    Succeeded,
    /// Returned an error.
    Failed,
    /// Exceeded the skill timeout budget.
    TimedOut,
}

impl SkillRunStatus {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillRunStatus::Pending => "PENDING",
            SkillRunStatus::Succeeded => "SUCCEEDED",
            SkillRunStatus::Failed => "FAILED",
            SkillRunStatus::TimedOut => "TIMED_OUT",
        }
    }

    /// Parse the canonical text back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SkillRunStatus::Pending),
            "SUCCEEDED" => Some(SkillRunStatus::Succeeded),
            "FAILED" => Some(SkillRunStatus::Failed),
            "TIMED_OUT" => Some(SkillRunStatus::TimedOut),
            _ => None,
        }
    }
}

/// Machine-readable error codes persisted on events and telemetry rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The LM response did not normalize + validate into its contract.
    LlmUnparseable,
    /// The LM transport exceeded its timeout.
    LlmTimeout,
    /// The LM refused to answer.
    LlmRefusal,
    /// A skill returned an error.
    SkillFailed,
    /// A skill exceeded its time budget.
    SkillTimeout,
    /// A skill was invoked with missing inputs.
    SkillBadInput,
    /// Two conflicting versions satisfy one requirement.
    InputConflict,
    /// Required evidence is absent.
    InputMissing,
    /// The per-task attempt cap was reached.
    MaxAttemptsExceeded,
    /// A run-level fuse tripped.
    PlanTimeout,
    /// Plan import validation failed.
    PlanInvalid,
    /// Plan generation exhausted its attempts without approval.
    PlanNotApproved,
}

impl ErrorCode {
    /// Canonical uppercase text.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LlmUnparseable => "LLM_UNPARSEABLE",
            ErrorCode::LlmTimeout => "LLM_TIMEOUT",
            ErrorCode::LlmRefusal => "LLM_REFUSAL",
            ErrorCode::SkillFailed => "SKILL_FAILED",
            ErrorCode::SkillTimeout => "SKILL_TIMEOUT",
            ErrorCode::SkillBadInput => "SKILL_BAD_INPUT",
            ErrorCode::InputConflict => "INPUT_CONFLICT",
            ErrorCode::InputMissing => "INPUT_MISSING",
            ErrorCode::MaxAttemptsExceeded => "MAX_ATTEMPTS_EXCEEDED",
            ErrorCode::PlanTimeout => "PLAN_TIMEOUT",
            ErrorCode::PlanInvalid => "PLAN_INVALID",
            ErrorCode::PlanNotApproved => "PLAN_NOT_APPROVED",
        }
    }

    /// Parse the canonical text back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LLM_UNPARSEABLE" => Some(ErrorCode::LlmUnparseable),
            "LLM_TIMEOUT" => Some(ErrorCode::LlmTimeout),
            "LLM_REFUSAL" => Some(ErrorCode::LlmRefusal),
            "SKILL_FAILED" => Some(ErrorCode::SkillFailed),
            "SKILL_TIMEOUT" => Some(ErrorCode::SkillTimeout),
            "SKILL_BAD_INPUT" => Some(ErrorCode::SkillBadInput),
            "INPUT_CONFLICT" => Some(ErrorCode::InputConflict),
            "INPUT_MISSING" => Some(ErrorCode::InputMissing),
            "MAX_ATTEMPTS_EXCEEDED" => Some(ErrorCode::MaxAttemptsExceeded),
            "PLAN_TIMEOUT" => Some(ErrorCode::PlanTimeout),
            "PLAN_INVALID" => Some(ErrorCode::PlanInvalid),
            "PLAN_NOT_APPROVED" => Some(ErrorCode::PlanNotApproved),
            _ => None,
        }
    }

    /// A short human-readable hint naming the canonical next step.
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorCode::LlmUnparseable => "inspect the validator error with `planloom llm-calls`",
            ErrorCode::LlmTimeout => "raise llm.timeout_s or retry with `planloom run`",
            ErrorCode::LlmRefusal => "reword the task title or deliverable spec",
            ErrorCode::SkillFailed => "check the skill run outputs, then retry",
            ErrorCode::SkillTimeout => "raise the skill timeout and retry",
            ErrorCode::SkillBadInput => "provide the missing skill input file",
            ErrorCode::InputConflict => "remove one of the conflicting files under inputs/",
            ErrorCode::InputMissing => "place the requested file under inputs/<requirement>/",
            ErrorCode::MaxAttemptsExceeded => "run `planloom reset-failed` after fixing the cause",
            ErrorCode::PlanTimeout => "raise the runtime fuse and re-run",
            ErrorCode::PlanInvalid => "regenerate the plan with `planloom create-plan`",
            ErrorCode::PlanNotApproved => "retry `planloom create-plan` or adjust the top task",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Ready,
            TaskStatus::InProgress,
            TaskStatus::ReadyToCheck,
            TaskStatus::ToBeModify,
            TaskStatus::Blocked,
            TaskStatus::Done,
            TaskStatus::Failed,
            TaskStatus::Abandoned,
        ] {
            assert_eq!(TaskStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TaskStatus::parse("RUNNING"), None);
    }

    #[test]
    fn test_status_serde_matches_as_str() {
        let json = serde_json::to_string(&TaskStatus::ReadyToCheck).unwrap();
        assert_eq!(json, "\"READY_TO_CHECK\"");
        let parsed: TaskStatus = serde_json::from_str("\"TO_BE_MODIFY\"").unwrap();
        assert_eq!(parsed, TaskStatus::ToBeModify);
    }

    #[test]
    fn test_blocked_reason_round_trip() {
        for r in [
            BlockedReason::WaitingInput,
            BlockedReason::WaitingSkill,
            BlockedReason::WaitingExternal,
            BlockedReason::WaitingApproval,
        ] {
            assert_eq!(BlockedReason::parse(r.as_str()), Some(r));
        }
    }

    #[test]
    fn test_edge_and_node_types() {
        assert_eq!(EdgeType::parse("DEPENDS_ON"), Some(EdgeType::DependsOn));
        assert_eq!(NodeType::parse("GOAL"), Some(NodeType::Goal));
        assert_eq!(NodeType::parse("goal"), None);
    }

    #[test]
    fn test_artifact_format_is_lowercase() {
        assert_eq!(ArtifactFormat::Html.as_str(), "html");
        assert_eq!(ArtifactFormat::parse("js"), Some(ArtifactFormat::Js));
        assert_eq!(ArtifactFormat::parse("exe"), None);
    }

    #[test]
    fn test_error_code_hints_are_nonempty() {
        for code in [
            ErrorCode::LlmUnparseable,
            ErrorCode::InputMissing,
            ErrorCode::MaxAttemptsExceeded,
            ErrorCode::PlanNotApproved,
        ] {
            assert!(!code.hint().is_empty());
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
    }

    #[test]
    fn test_suggestion_priority_order() {
        assert!(SuggestionPriority::High < SuggestionPriority::Med);
        assert!(SuggestionPriority::Med < SuggestionPriority::Low);
    }
}
