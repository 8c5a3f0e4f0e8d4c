//! Store-level integration: persistence across reopen, the invariant-
//! critical composite writes, and the maintenance operations.

use chrono::Utc;
use planloom_core::{
    ActionRequired, AgentKind, Artifact, ArtifactFormat, BlockedReason, CallScope, ErrorCode,
    Evidence, InputRequirement, LlmCall, LlmCallMeta, NodeType, Plan, Review, ScoreBreakdown,
    SkillRun, SkillRunStatus, Suggestion, SuggestionPriority, TaskEdge, TaskNode, TaskStatus,
};
use planloom_store::Store;
use tempfile::TempDir;
use uuid::Uuid;

fn seeded_plan(store: &Store) -> (Plan, TaskNode, TaskNode) {
    let plan_id = Uuid::new_v4();
    let root = {
        let mut n = TaskNode::new(plan_id, NodeType::Goal, "root");
        n.plan_id = plan_id;
        n
    };
    let mut plan = Plan::new("demo plan", "xiaobo", root.task_id);
    plan.plan_id = plan_id;
    let mut action = TaskNode::new(plan_id, NodeType::Action, "build the thing");
    action.plan_id = plan_id;
    let edge = TaskEdge::new(
        plan_id,
        planloom_core::EdgeType::Decompose,
        root.task_id,
        action.task_id,
    );
    store
        .import_plan(&plan, &[root.clone(), action.clone()], &[edge], &[])
        .unwrap();
    (plan, root, action)
}

fn artifact_for(task_id: Uuid, version: u32) -> Artifact {
    Artifact {
        artifact_id: Uuid::new_v4(),
        task_id,
        name: "index.html".to_string(),
        path: format!("artifacts/{task_id}/v{version}/index.html"),
        format: ArtifactFormat::Html,
        version,
        content_hash: format!("hash-{version}"),
        created_at: Utc::now(),
    }
}

#[test]
fn state_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("planloom.db");
    let (plan_id, task_id) = {
        let store = Store::open(&db).unwrap();
        let (plan, _, action) = seeded_plan(&store);
        store
            .set_status(action.task_id, TaskStatus::Ready, None)
            .unwrap();
        (plan.plan_id, action.task_id)
    };

    let store = Store::open(&db).unwrap();
    let node = store.get_node(task_id).unwrap().unwrap();
    assert_eq!(node.status, TaskStatus::Ready);
    assert_eq!(store.list_nodes(plan_id).unwrap().len(), 2);
    // Reopening applies no migration twice.
    assert_eq!(
        store.applied_migrations().unwrap().len(),
        planloom_store::expected_migrations().len()
    );
}

#[test]
fn evidence_binding_is_idempotent_across_paths() {
    let store = Store::open_in_memory().unwrap();
    let (plan, _, action) = seeded_plan(&store);
    let req = InputRequirement::new(plan.plan_id, action.task_id, "product_spec");
    store
        .import_plan(&plan, &[], &[], std::slice::from_ref(&req))
        .unwrap();

    // Same (requirement, hash) bound under two different paths: one row.
    let a = Evidence::file(req.requirement_id, "h1", "product_spec/spec.md");
    let b = Evidence::file(req.requirement_id, "h1", "product_spec/copy-of-spec.md");
    assert!(store.insert_evidence(&a).unwrap());
    assert!(!store.insert_evidence(&b).unwrap());
    assert_eq!(store.evidence_count(req.requirement_id).unwrap(), 1);

    // A different hash is a second version.
    let c = Evidence::file(req.requirement_id, "h2", "product_spec/spec_FINAL.md");
    assert!(store.insert_evidence(&c).unwrap());
    assert_eq!(store.evidence_count(req.requirement_id).unwrap(), 2);
}

#[test]
fn complete_action_couples_done_with_approved_artifact() {
    let store = Store::open_in_memory().unwrap();
    let (_, _, action) = seeded_plan(&store);

    let artifact = artifact_for(action.task_id, 1);
    store.record_artifact(&artifact).unwrap();
    store
        .complete_action(action.task_id, artifact.artifact_id)
        .unwrap();

    let node = store.get_node(action.task_id).unwrap().unwrap();
    assert_eq!(node.status, TaskStatus::Done);
    assert_eq!(node.approved_artifact_id, Some(artifact.artifact_id));
    assert!(node.blocked_reason.is_none());
}

#[test]
fn review_round_trip_preserves_structure() {
    let store = Store::open_in_memory().unwrap();
    let (_, _, action) = seeded_plan(&store);

    let review = Review {
        review_id: Uuid::new_v4(),
        task_id: action.task_id,
        reviewer_agent: "xiaojing".to_string(),
        reviewed_artifact_id: Some(Uuid::new_v4()),
        total_score: 70,
        action_required: ActionRequired::Modify,
        breakdown: vec![ScoreBreakdown {
            dimension: "completeness".to_string(),
            score: 60,
        }],
        suggestions: vec![Suggestion {
            priority: SuggestionPriority::High,
            change: "add game-over screen".to_string(),
            steps: vec!["detect no-moves-left".to_string()],
            acceptance_criteria: Some("losing board shows the overlay".to_string()),
        }],
        summary: "close but not done".to_string(),
        created_at: Utc::now(),
    };
    store.insert_review(&review).unwrap();

    let loaded = store.latest_review(action.task_id).unwrap().unwrap();
    assert_eq!(loaded.total_score, 70);
    assert_eq!(loaded.action_required, ActionRequired::Modify);
    assert_eq!(loaded.suggestions.len(), 1);
    assert_eq!(loaded.suggestions[0].steps.len(), 1);
    assert_eq!(
        loaded.suggestions[0].acceptance_criteria.as_deref(),
        Some("losing board shows the overlay")
    );
}

#[test]
fn llm_call_backfill_and_listing() {
    let store = Store::open_in_memory().unwrap();
    let call = LlmCall {
        llm_call_id: Uuid::new_v4(),
        created_at: Utc::now(),
        plan_id: None,
        task_id: None,
        agent: AgentKind::Executor,
        scope: CallScope::PlanGen,
        prompt_text: "decompose this".to_string(),
        response_text: "{}".to_string(),
        parsed_json: Some(serde_json::json!({})),
        normalized_json: None,
        validator_error: None,
        error_code: None,
        error_message: None,
        meta: LlmCallMeta {
            attempt: Some(1),
            ..Default::default()
        },
    };
    store.insert_llm_call(&call).unwrap();

    let normalized = serde_json::json!({"schema_version": "plan_json_v1"});
    store
        .update_llm_call_result(
            call.llm_call_id,
            Some(&normalized),
            Some("at $.nodes: expected a non-empty array"),
            Some(ErrorCode::LlmUnparseable),
            Some("plan failed contract validation"),
        )
        .unwrap();
    let plan_id = Uuid::new_v4();
    store.set_llm_call_plan(call.llm_call_id, plan_id).unwrap();

    let rows = store.list_llm_calls(5).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].normalized_json, Some(normalized));
    assert_eq!(rows[0].error_code, Some(ErrorCode::LlmUnparseable));
    assert_eq!(rows[0].plan_id, Some(plan_id));
    assert_eq!(rows[0].meta.attempt, Some(1));
}

#[test]
fn skill_runs_are_idempotent_by_key() {
    let store = Store::open_in_memory().unwrap();
    let run = SkillRun {
        skill_run_id: Uuid::new_v4(),
        task_id: None,
        skill_name: "extract_text".to_string(),
        input_hashes: vec!["h1".to_string()],
        params: serde_json::json!({"max_chars": 100}),
        status: SkillRunStatus::Pending,
        outputs: serde_json::json!({}),
        idempotency_key: "key-1".to_string(),
        created_at: Utc::now(),
    };
    assert!(store.insert_skill_run(&run).unwrap());

    let mut dup = run.clone();
    dup.skill_run_id = Uuid::new_v4();
    assert!(!store.insert_skill_run(&dup).unwrap());

    store
        .finish_skill_run(
            run.skill_run_id,
            SkillRunStatus::Succeeded,
            &serde_json::json!({"chars": 42}),
        )
        .unwrap();
    let found = store.find_skill_run("key-1").unwrap().unwrap();
    assert_eq!(found.skill_run_id, run.skill_run_id);
    assert_eq!(found.status, SkillRunStatus::Succeeded);
    assert_eq!(found.outputs["chars"], 42);
}

#[test]
fn reset_failed_restores_pending_and_attempts() {
    let store = Store::open_in_memory().unwrap();
    let (plan, _, action) = seeded_plan(&store);

    store.increment_attempt(action.task_id).unwrap();
    store.increment_attempt(action.task_id).unwrap();
    store
        .set_status(action.task_id, TaskStatus::Failed, None)
        .unwrap();
    assert_eq!(store.reset_failed(plan.plan_id, false).unwrap(), 1);

    let node = store.get_node(action.task_id).unwrap().unwrap();
    assert_eq!(node.status, TaskStatus::Pending);
    assert_eq!(node.attempt_count, 0);

    // WAITING_EXTERNAL only moves with the flag.
    store
        .set_status(
            action.task_id,
            TaskStatus::Blocked,
            Some(BlockedReason::WaitingExternal),
        )
        .unwrap();
    assert_eq!(store.reset_failed(plan.plan_id, false).unwrap(), 0);
    assert_eq!(store.reset_failed(plan.plan_id, true).unwrap(), 1);
}

#[test]
fn dangling_artifact_pointers_are_cleared() {
    let store = Store::open_in_memory().unwrap();
    let (_, _, action) = seeded_plan(&store);

    let real = artifact_for(action.task_id, 1);
    store.record_artifact(&real).unwrap();
    // Point approval at an artifact that never existed.
    store
        .set_approved_artifact(action.task_id, Uuid::new_v4())
        .unwrap();

    assert_eq!(store.clear_dangling_artifact_pointers().unwrap(), 1);
    let node = store.get_node(action.task_id).unwrap().unwrap();
    assert_eq!(node.active_artifact_id, Some(real.artifact_id));
    assert!(node.approved_artifact_id.is_none());
}

#[test]
fn unapproved_stub_plans_can_be_deleted() {
    let store = Store::open_in_memory().unwrap();
    let stub = Plan::new("stub", "xiaobo", Uuid::new_v4());
    store.insert_plan(&stub).unwrap();
    assert!(store.latest_plan().unwrap().is_some());

    store.delete_plan(stub.plan_id).unwrap();
    assert!(store.latest_plan().unwrap().is_none());
}
