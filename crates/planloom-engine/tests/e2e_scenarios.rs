//! End-to-end scenarios driven through scripted LM backends against a
//! temporary workspace: the full tick loop, both phases, and the create-plan
//! sub-workflow.

use async_trait::async_trait;
use parking_lot::Mutex;
use planloom_agent::{Completion, LmBackend};
use planloom_core::{
    ActionRequired, BlockedReason, Config, NodeType, Plan, PlanloomError, PlanloomResult,
    TaskStatus,
};
use planloom_engine::{
    create_plan, executor, import_plan_value, reviewer, run_plan, EngineContext, Matcher,
    recompute_readiness, Workspace,
};
use planloom_store::Store;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;

/// Serves canned responses in order; errors when the script runs dry.
/// The optional hook fires on every call, which lets a test mutate the store
/// *during* an LM exchange (the approve-during-newer-version race).
struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
    hook: Option<Box<dyn Fn() + Send + Sync>>,
}

impl ScriptedBackend {
    fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            hook: None,
        })
    }

    fn with_hook(responses: Vec<String>, hook: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            hook: Some(Box::new(hook)),
        })
    }
}

#[async_trait]
impl LmBackend for ScriptedBackend {
    async fn complete(
        &self,
        _system_prompt: Option<&str>,
        _prompt: &str,
    ) -> PlanloomResult<Completion> {
        if let Some(hook) = &self.hook {
            hook();
        }
        let next = self.responses.lock().pop_front();
        match next {
            Some(text) => Ok(Completion {
                text,
                refused: false,
            }),
            None => Err(PlanloomError::Agent("script exhausted".to_string())),
        }
    }
}

fn test_config() -> Config {
    let mut config: Config = serde_json::from_str(
        r#"{
            "llm": {
                "executor": {"provider": "claude", "model_id": "m", "api_key": "k"},
                "reviewer": {"provider": "claude", "model_id": "m", "api_key": "k"}
            }
        }"#,
    )
    .unwrap();
    config.poll_interval_seconds = 0;
    config.guardrails.max_run_iterations = 25;
    config
}

fn make_ctx(
    tmp: &TempDir,
    config: Config,
    executor_responses: Vec<String>,
    reviewer_responses: Vec<String>,
) -> EngineContext {
    let workspace = Workspace::new(tmp.path());
    workspace.ensure_layout().unwrap();
    let store = Store::open(workspace.db_path()).unwrap();
    EngineContext::new(
        store,
        config,
        workspace,
        ScriptedBackend::new(executor_responses),
        ScriptedBackend::new(reviewer_responses),
    )
}

fn game_plan_value(with_requirement: bool) -> serde_json::Value {
    let requirements = if with_requirement {
        json!([{"task_id": "t1", "name": "product_spec", "kind": "FILE", "min_count": 1}])
    } else {
        json!([])
    };
    json!({
        "schema_version": "plan_json_v1",
        "plan": {"title": "create a 2048 game (single file index.html)"},
        "nodes": [
            {"task_id": "root", "node_type": "GOAL", "title": "deliver the game"},
            {"task_id": "t1", "node_type": "ACTION",
             "title": "create a 2048 game (single file index.html)"},
        ],
        "edges": [
            {"edge_type": "DECOMPOSE", "from_task_id": "root", "to_task_id": "t1"},
        ],
        "requirements": requirements,
    })
}

fn seed_plan(ctx: &EngineContext, with_requirement: bool) -> Plan {
    let imported = import_plan_value(&ctx.store, &game_plan_value(with_requirement)).unwrap();
    ctx.store.approve_plan(imported.plan.plan_id).unwrap();
    ctx.store.get_plan(imported.plan.plan_id).unwrap().unwrap()
}

fn artifact_response(content: &str) -> String {
    json!({
        "schema_version": "xiaobo_action_v1",
        "result_type": "ARTIFACT",
        "artifact": {"name": "index.html", "format": "html", "content": content},
    })
    .to_string()
}

fn review_response(score: u32, action: &str, change: Option<&str>) -> String {
    let suggestions = match change {
        Some(change) => json!([{"priority": "HIGH", "change": change}]),
        None => json!([]),
    };
    json!({
        "schema_version": "xiaojing_review_v1",
        "total_score": score,
        "action_required": action,
        "breakdown": [{"dimension": "completeness", "score": score}],
        "suggestions": suggestions,
        "summary": "scripted verdict",
    })
    .to_string()
}

fn action_node(ctx: &EngineContext, plan: &Plan) -> planloom_core::TaskNode {
    ctx.store
        .list_nodes(plan.plan_id)
        .unwrap()
        .into_iter()
        .find(|n| n.node_type == NodeType::Action)
        .unwrap()
}

#[tokio::test]
async fn happy_path_one_artifact_approved() {
    let tmp = TempDir::new().unwrap();
    let ctx = make_ctx(
        &tmp,
        test_config(),
        vec![artifact_response("<html>2048</html>")],
        vec![review_response(95, "APPROVE", None)],
    );
    let plan = seed_plan(&ctx, false);

    let report = run_plan(&ctx, &plan).await.unwrap();
    assert!(report.plan_done);
    assert!(report.tripped_fuse.is_none());
    assert_eq!(report.llm_calls, 2);

    let action = action_node(&ctx, &plan);
    assert_eq!(action.status, TaskStatus::Done);
    assert!(action.approved_artifact_id.is_some());
    assert_eq!(action.approved_artifact_id, action.active_artifact_id);

    let root = ctx.store.get_node(plan.root_task_id).unwrap().unwrap();
    assert_eq!(root.status, TaskStatus::Done);

    let reviews = ctx.store.list_reviews(action.task_id).unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].action_required, ActionRequired::Approve);

    let artifact = ctx
        .store
        .get_artifact(action.approved_artifact_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(artifact.name, "index.html");
    let on_disk = std::fs::read_to_string(&artifact.path).unwrap();
    assert_eq!(on_disk, "<html>2048</html>");
}

#[tokio::test]
async fn needs_input_blocks_until_file_arrives() {
    let tmp = TempDir::new().unwrap();
    let ctx = make_ctx(&tmp, test_config(), vec![], vec![]);
    let plan = seed_plan(&ctx, true);

    // First sweep: no evidence, the ACTION blocks and the note is written.
    let mut matcher = Matcher::new();
    matcher.scan(&ctx, &plan).unwrap();
    recompute_readiness(&ctx, &plan).unwrap();

    let action = action_node(&ctx, &plan);
    assert_eq!(action.status, TaskStatus::Blocked);
    assert_eq!(action.blocked_reason, Some(BlockedReason::WaitingInput));

    let note_path = ctx.workspace.required_docs_path(action.task_id);
    let note = std::fs::read_to_string(&note_path).unwrap();
    assert!(note.contains("product_spec"));
    assert!(ctx.store.list_artifacts(action.task_id).unwrap().is_empty());

    // Drop the file where the note says; the next tick goes READY.
    let dir = ctx.workspace.inputs_dir().join("product_spec");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("spec.md"), "# the product spec").unwrap();

    matcher.scan(&ctx, &plan).unwrap();
    recompute_readiness(&ctx, &plan).unwrap();
    let action = action_node(&ctx, &plan);
    assert_eq!(action.status, TaskStatus::Ready);
}

#[tokio::test]
async fn executor_needs_input_writes_required_docs() {
    let tmp = TempDir::new().unwrap();
    let needs_input = json!({
        "result_type": "NEEDS_INPUT",
        "required_docs": [{
            "name": "product_spec",
            "reason": "cannot build without the rules",
            "suggested_path": "inputs/product_spec/spec.md",
        }],
    })
    .to_string();
    let ctx = make_ctx(&tmp, test_config(), vec![needs_input], vec![]);
    let plan = seed_plan(&ctx, false);

    let mut action = action_node(&ctx, &plan);
    ctx.store
        .set_status(action.task_id, TaskStatus::Ready, None)
        .unwrap();
    action.status = TaskStatus::Ready;

    executor::run_executor_phase(&ctx, &plan, &action)
        .await
        .unwrap();

    let action = action_node(&ctx, &plan);
    assert_eq!(action.status, TaskStatus::Blocked);
    assert_eq!(action.blocked_reason, Some(BlockedReason::WaitingInput));
    // NEEDS_INPUT burns no attempt.
    assert_eq!(action.attempt_count, 0);

    let note = std::fs::read_to_string(ctx.workspace.required_docs_path(action.task_id)).unwrap();
    assert!(note.contains("product_spec"));
    assert!(note.contains("inputs/product_spec/spec.md"));
}

#[tokio::test]
async fn reject_then_approve_keeps_both_artifacts() {
    let tmp = TempDir::new().unwrap();
    let ctx = make_ctx(
        &tmp,
        test_config(),
        vec![
            artifact_response("<html>v1</html>"),
            artifact_response("<html>v2 with game-over screen</html>"),
        ],
        vec![
            review_response(70, "MODIFY", Some("add game-over screen")),
            review_response(98, "APPROVE", None),
        ],
    );
    let plan = seed_plan(&ctx, false);

    let report = run_plan(&ctx, &plan).await.unwrap();
    assert!(report.plan_done);

    let action = action_node(&ctx, &plan);
    assert_eq!(action.status, TaskStatus::Done);
    assert_eq!(action.attempt_count, 1);

    let artifacts = ctx.store.list_artifacts(action.task_id).unwrap();
    assert_eq!(artifacts.len(), 2, "both versions retained");
    assert_eq!(
        action.approved_artifact_id,
        Some(artifacts[1].artifact_id),
        "the second version is the approved one"
    );
    assert_eq!(ctx.store.list_reviews(action.task_id).unwrap().len(), 2);
}

#[tokio::test]
async fn approval_of_superseded_version_does_not_finish_the_task() {
    let tmp = TempDir::new().unwrap();
    let workspace = Workspace::new(tmp.path());
    workspace.ensure_layout().unwrap();
    let store = Store::open(workspace.db_path()).unwrap();

    // The reviewer backend's hook plays the executor sneaking in a v2 while
    // the review of v1 is in flight.
    let store_for_hook = store.clone();
    let tmp_path = tmp.path().to_path_buf();
    let reviewer_backend = ScriptedBackend::with_hook(
        vec![review_response(95, "APPROVE", None)],
        move || {
            let nodes_plan = store_for_hook.latest_plan().unwrap().unwrap();
            let action = store_for_hook
                .list_nodes(nodes_plan.plan_id)
                .unwrap()
                .into_iter()
                .find(|n| n.node_type == NodeType::Action)
                .unwrap();
            let dir = tmp_path.join("artifacts").join("race");
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join("index.html");
            std::fs::write(&path, "<html>v2</html>").unwrap();
            let artifact = planloom_core::Artifact {
                artifact_id: uuid::Uuid::new_v4(),
                task_id: action.task_id,
                name: "index.html".to_string(),
                path: path.to_string_lossy().to_string(),
                format: planloom_core::ArtifactFormat::Html,
                version: store_for_hook.next_artifact_version(action.task_id).unwrap(),
                content_hash: "v2hash".to_string(),
                created_at: chrono::Utc::now(),
            };
            store_for_hook.record_artifact(&artifact).unwrap();
        },
    );

    let ctx = EngineContext::new(
        store,
        test_config(),
        workspace,
        ScriptedBackend::new(vec![artifact_response("<html>v1</html>")]),
        reviewer_backend,
    );
    let plan = seed_plan(&ctx, false);

    // Produce v1, then review it while v2 lands.
    let mut action = action_node(&ctx, &plan);
    ctx.store
        .set_status(action.task_id, TaskStatus::Ready, None)
        .unwrap();
    action.status = TaskStatus::Ready;
    executor::run_executor_phase(&ctx, &plan, &action)
        .await
        .unwrap();

    let action = action_node(&ctx, &plan);
    let v1 = action.active_artifact_id.unwrap();
    assert_eq!(action.status, TaskStatus::ReadyToCheck);

    reviewer::run_reviewer_phase(&ctx, &plan, &action)
        .await
        .unwrap();

    let action = action_node(&ctx, &plan);
    assert_eq!(action.approved_artifact_id, Some(v1));
    assert_ne!(action.active_artifact_id, Some(v1), "v2 is now active");
    assert_eq!(
        action.status,
        TaskStatus::ReadyToCheck,
        "v2 still needs its own review"
    );
}

#[tokio::test]
async fn attempt_exhaustion_freezes_behind_external() {
    let tmp = TempDir::new().unwrap();
    let ctx = make_ctx(
        &tmp,
        test_config(),
        vec![
            artifact_response("<html>v1</html>"),
            artifact_response("<html>v2</html>"),
            artifact_response("<html>v3</html>"),
        ],
        vec![
            review_response(60, "MODIFY", Some("wrong tile colors")),
            review_response(62, "MODIFY", Some("still wrong")),
            review_response(61, "MODIFY", Some("use the standard 2048 palette")),
        ],
    );
    let plan = seed_plan(&ctx, false);

    let report = run_plan(&ctx, &plan).await.unwrap();
    assert!(!report.plan_done);

    let action = action_node(&ctx, &plan);
    assert_eq!(action.status, TaskStatus::Blocked);
    assert_eq!(action.blocked_reason, Some(BlockedReason::WaitingExternal));
    assert_eq!(action.attempt_count, 3, "attempts frozen at the cap");

    let note = std::fs::read_to_string(
        ctx.workspace
            .review_task_dir(action.task_id)
            .join("FINAL_SUGGESTIONS.md"),
    )
    .unwrap();
    assert!(note.contains("use the standard 2048 palette"));

    let errors = ctx
        .store
        .list_events_of_type(plan.plan_id, "ERROR")
        .unwrap();
    assert!(errors
        .iter()
        .any(|e| e.payload["code"] == "MAX_ATTEMPTS_EXCEEDED"));
}

#[tokio::test]
async fn exactly_pass_score_with_modify_rejects() {
    // The verdict is authoritative; 90/MODIFY is a rejection.
    let tmp = TempDir::new().unwrap();
    let ctx = make_ctx(
        &tmp,
        test_config(),
        vec![artifact_response("<html>v1</html>")],
        vec![review_response(90, "MODIFY", Some("tighten the CSS"))],
    );
    let plan = seed_plan(&ctx, false);

    let mut action = action_node(&ctx, &plan);
    ctx.store
        .set_status(action.task_id, TaskStatus::Ready, None)
        .unwrap();
    action.status = TaskStatus::Ready;
    executor::run_executor_phase(&ctx, &plan, &action)
        .await
        .unwrap();
    let action = action_node(&ctx, &plan);
    reviewer::run_reviewer_phase(&ctx, &plan, &action)
        .await
        .unwrap();

    let action = action_node(&ctx, &plan);
    assert_eq!(action.status, TaskStatus::ToBeModify);
    assert!(action.approved_artifact_id.is_none());
}

#[tokio::test]
async fn unparseable_executor_fails_task_and_counts_attempt() {
    let tmp = TempDir::new().unwrap();
    let ctx = make_ctx(
        &tmp,
        test_config(),
        vec!["I made the game, hope you like it!".to_string()],
        vec![],
    );
    let plan = seed_plan(&ctx, false);

    let mut action = action_node(&ctx, &plan);
    ctx.store
        .set_status(action.task_id, TaskStatus::Ready, None)
        .unwrap();
    action.status = TaskStatus::Ready;
    executor::run_executor_phase(&ctx, &plan, &action)
        .await
        .unwrap();

    let action = action_node(&ctx, &plan);
    assert_eq!(action.status, TaskStatus::Failed);
    assert_eq!(action.attempt_count, 1);

    let calls = ctx.store.list_llm_calls(10).unwrap();
    assert_eq!(
        calls[0].error_code,
        Some(planloom_core::ErrorCode::LlmUnparseable)
    );
}

#[tokio::test]
async fn llm_call_fuse_stops_the_loop_cleanly() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config();
    config.guardrails.max_llm_calls_per_run = 1;
    let ctx = make_ctx(
        &tmp,
        config,
        vec![artifact_response("<html>v1</html>")],
        vec![review_response(95, "APPROVE", None)],
    );
    let plan = seed_plan(&ctx, false);

    let report = run_plan(&ctx, &plan).await.unwrap();
    assert_eq!(report.tripped_fuse.as_deref(), Some("LLM_CALLS"));
    assert!(!report.plan_done);
    assert_eq!(report.llm_calls, 1);

    // The trip is journalled; the candidate artifact stays unreviewed.
    let timeouts = ctx
        .store
        .list_events_of_type(plan.plan_id, "TIMEOUT")
        .unwrap();
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].payload["scope"], "LLM_CALLS");
    let action = action_node(&ctx, &plan);
    assert_eq!(action.status, TaskStatus::ReadyToCheck);
}

// --- create-plan ---

fn plan_gen_response(with_edges: bool, with_goal: bool) -> String {
    let mut nodes = vec![json!({
        "task_id": "t1", "node_type": "ACTION",
        "title": "create a 2048 game (single file index.html)",
    })];
    if with_goal {
        nodes.insert(
            0,
            json!({"task_id": "root", "node_type": "GOAL", "title": "deliver the game"}),
        );
    }
    let edges = if with_edges {
        json!([{"edge_type": "DECOMPOSE", "from_task_id": "root", "to_task_id": "t1"}])
    } else {
        json!([])
    };
    json!({
        "schema_version": "plan_json_v1",
        "plan": {"title": "create a 2048 game"},
        "nodes": nodes,
        "edges": edges,
        "requirements": [],
    })
    .to_string()
}

#[tokio::test]
async fn plan_gen_synthesizes_missing_root_edges() {
    let tmp = TempDir::new().unwrap();
    let ctx = make_ctx(
        &tmp,
        test_config(),
        vec![plan_gen_response(false, true)],
        vec![review_response(95, "APPROVE", None)],
    );

    let plan = create_plan(&ctx, "create a 2048 game (single file index.html)")
        .await
        .unwrap();
    assert!(plan.approved_at.is_some());

    let edges = ctx.store.list_edges(plan.plan_id).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].edge_type, planloom_core::EdgeType::Decompose);

    let rewrites = ctx
        .store
        .list_events_of_type(plan.plan_id, "REWRITE_ROOT_EDGES")
        .unwrap();
    assert_eq!(rewrites.len(), 1);

    assert!(ctx.workspace.plan_file(plan.plan_id).exists());
}

#[tokio::test]
async fn plan_gen_retries_with_concise_notes_on_invalid_plan() {
    let tmp = TempDir::new().unwrap();
    let ctx = make_ctx(
        &tmp,
        test_config(),
        vec![
            plan_gen_response(false, false), // no GOAL: rejected at import
            plan_gen_response(true, true),
        ],
        vec![review_response(95, "APPROVE", None)],
    );

    let plan = create_plan(&ctx, "create a 2048 game").await.unwrap();
    assert!(plan.approved_at.is_some());

    let gens: Vec<_> = ctx
        .store
        .list_all_llm_calls()
        .unwrap()
        .into_iter()
        .filter(|c| c.scope == planloom_core::CallScope::PlanGen)
        .collect();
    assert_eq!(gens.len(), 2);
    assert!(gens[1].prompt_text.contains("no GOAL root"));
    assert_eq!(gens[1].meta.attempt, Some(2));
}

#[tokio::test]
async fn plan_review_rejection_feeds_distilled_notes_not_raw_json() {
    let tmp = TempDir::new().unwrap();
    let ctx = make_ctx(
        &tmp,
        test_config(),
        vec![
            plan_gen_response(true, true),
            plan_gen_response(true, true),
        ],
        vec![
            review_response(60, "MODIFY", Some("add a testing task")),
            review_response(95, "APPROVE", None),
        ],
    );

    let plan = create_plan(&ctx, "create a 2048 game").await.unwrap();
    assert!(plan.approved_at.is_some());

    let gens: Vec<_> = ctx
        .store
        .list_all_llm_calls()
        .unwrap()
        .into_iter()
        .filter(|c| c.scope == planloom_core::CallScope::PlanGen)
        .collect();
    assert_eq!(gens.len(), 2);
    assert!(gens[1].prompt_text.contains("add a testing task"));
    assert!(
        !gens[1].prompt_text.contains("action_required"),
        "raw reviewer JSON must never reach the generator"
    );
}

#[tokio::test]
async fn plan_not_approved_leaves_no_committed_plan() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config();
    config.max_plan_attempts = 2;
    let ctx = make_ctx(
        &tmp,
        config,
        vec![
            plan_gen_response(true, true),
            plan_gen_response(true, true),
        ],
        vec![
            review_response(50, "MODIFY", Some("too shallow")),
            review_response(55, "MODIFY", Some("still too shallow")),
        ],
    );

    let err = create_plan(&ctx, "create a 2048 game").await.unwrap_err();
    assert!(err.to_string().contains("PLAN_NOT_APPROVED"));
    assert!(ctx.store.latest_plan().unwrap().is_none(), "stubs cleaned up");
}

#[tokio::test]
async fn reviewer_parse_failures_leave_task_ready_to_check() {
    let tmp = TempDir::new().unwrap();
    let ctx = make_ctx(
        &tmp,
        test_config(),
        vec![artifact_response("<html>v1</html>")],
        vec![
            "utter nonsense".to_string(),
            "{\"score\": \"not a number\"}".to_string(),
            "more nonsense".to_string(),
        ],
    );
    let plan = seed_plan(&ctx, false);

    let mut action = action_node(&ctx, &plan);
    ctx.store
        .set_status(action.task_id, TaskStatus::Ready, None)
        .unwrap();
    action.status = TaskStatus::Ready;
    executor::run_executor_phase(&ctx, &plan, &action)
        .await
        .unwrap();
    let action = action_node(&ctx, &plan);
    let calls = reviewer::run_reviewer_phase(&ctx, &plan, &action)
        .await
        .unwrap();
    assert_eq!(calls, 3, "reviewer retried to its own cap");

    let action = action_node(&ctx, &plan);
    assert_eq!(
        action.status,
        TaskStatus::ReadyToCheck,
        "reviewer failures must not fail the executor task"
    );
    assert_eq!(action.attempt_count, 0);
}
