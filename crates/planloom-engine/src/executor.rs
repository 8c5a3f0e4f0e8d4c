//! The executor phase: one scheduled task in, one artifact (or a
//! missing-input note, or an error transition) out.

use crate::context::EngineContext;
use crate::matcher::choose_context_file;
use crate::prompts;
use crate::skills::skill_idempotency_key;
use crate::workspace::sha256_bytes;
use chrono::Utc;
use planloom_agent::{CallOutcome, CallRequest};
use planloom_contracts::{normalize_action, validate_action, ActionArtifact, ResultType};
use planloom_core::{
    AgentKind, Artifact, BlockedReason, CallScope, EdgeType, ErrorCode, EventType, LlmCallMeta,
    Plan, PlanloomResult, SkillRun, SkillRunStatus, TaskEvent, TaskNode, TaskStatus,
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-evidence-file char cap inside the prompt.
const EVIDENCE_CHAR_CAP: usize = 16_000;
/// Per-upstream-artifact char cap inside the prompt.
const UPSTREAM_CHAR_CAP: usize = 8_000;

/// Run the executor on one scheduled task. Returns how many LM calls were
/// spent (0 when a guardrail refused the call).
pub async fn run_executor_phase(
    ctx: &EngineContext,
    plan: &Plan,
    task: &TaskNode,
) -> PlanloomResult<u32> {
    let calls_so_far = ctx.store.llm_call_count_for_task(task.task_id)?;
    if calls_so_far >= ctx.config.guardrails.max_llm_calls_per_task {
        warn!(task_id = %task.task_id, calls = calls_so_far, "per-task LM call guardrail hit");
        ctx.emit(&TaskEvent::timeout(
            plan.plan_id,
            "TASK",
            format!("task {} exhausted its LM call budget", task.task_id),
        ))?;
        ctx.transition(task, TaskStatus::Blocked, Some(BlockedReason::WaitingExternal))?;
        return Ok(0);
    }

    let rework = task.status == TaskStatus::ToBeModify;
    ctx.transition(task, TaskStatus::InProgress, None)?;
    let task = ctx
        .store
        .get_node(task.task_id)?
        .ok_or_else(|| planloom_core::PlanloomError::Engine("task vanished mid-tick".into()))?;

    let runtime_context = build_runtime_context(ctx, plan, &task, rework)?;
    let outcome = ctx
        .executor
        .call(CallRequest {
            agent: AgentKind::Executor,
            scope: CallScope::TaskAction,
            plan_id: Some(plan.plan_id),
            task_id: Some(task.task_id),
            system_prompt: Some(format!(
                "{}\n{}",
                prompts::SHARED_PREAMBLE,
                prompts::EXECUTOR_TASK_PROMPT
            )),
            prompt: prompts::task_action_prompt(&task.title, &runtime_context),
            meta: LlmCallMeta {
                attempt: Some(task.attempt_count + 1),
                retry_reason: rework.then(|| "review rejection".to_string()),
                ..Default::default()
            },
        })
        .await?;

    handle_outcome(ctx, plan, &task, rework, outcome).await?;
    Ok(1)
}

async fn handle_outcome(
    ctx: &EngineContext,
    plan: &Plan,
    task: &TaskNode,
    rework: bool,
    outcome: CallOutcome,
) -> PlanloomResult<()> {
    if let Some(code) = outcome.error_code {
        let message = outcome
            .error_message
            .unwrap_or_else(|| "LM call failed".to_string());
        return apply_error_code(ctx, plan, task, code, &message, Some(outcome.llm_call_id));
    }

    let parsed = outcome
        .parsed
        .unwrap_or(serde_json::Value::Null);
    let normalized = normalize_action(&parsed);
    match validate_action(&normalized) {
        Err(validator_error) => {
            let text = validator_error.to_string();
            ctx.executor.finish(
                outcome.llm_call_id,
                Some(&normalized),
                Some(&text),
                Some(ErrorCode::LlmUnparseable),
                Some("executor response failed contract validation"),
            )?;
            apply_error_code(
                ctx,
                plan,
                task,
                ErrorCode::LlmUnparseable,
                &text,
                Some(outcome.llm_call_id),
            )
        }
        Ok(action) => {
            ctx.executor
                .finish(outcome.llm_call_id, Some(&normalized), None, None, None)?;
            match action.result_type {
                ResultType::Artifact => {
                    let artifact = action
                        .artifact
                        .as_ref()
                        .ok_or_else(|| planloom_core::PlanloomError::Contract(
                            "validated ARTIFACT without payload".into(),
                        ))?;
                    write_artifact(ctx, plan, task, artifact)
                }
                ResultType::NeedsInput => {
                    write_required_docs(ctx, plan, task, &action.required_docs)?;
                    apply_error_code(
                        ctx,
                        plan,
                        task,
                        ErrorCode::InputMissing,
                        "the executor asked for missing input documents",
                        Some(outcome.llm_call_id),
                    )
                }
                ResultType::Noop => {
                    // No state change: put the task back where the scheduler
                    // found it.
                    let restore = if rework {
                        TaskStatus::ToBeModify
                    } else {
                        TaskStatus::Ready
                    };
                    ctx.transition(task, restore, None)
                }
                ResultType::Error => {
                    let err = action.error.as_ref().ok_or_else(|| {
                        planloom_core::PlanloomError::Contract(
                            "validated ERROR without payload".into(),
                        )
                    })?;
                    let code = err
                        .code
                        .as_deref()
                        .and_then(ErrorCode::parse)
                        .unwrap_or(ErrorCode::LlmRefusal);
                    apply_error_code(ctx, plan, task, code, &err.message, Some(outcome.llm_call_id))
                }
            }
        }
    }
}

/// Persist an artifact version under `artifacts/<task>/<artifact>/` and move
/// the task to READY_TO_CHECK.
fn write_artifact(
    ctx: &EngineContext,
    plan: &Plan,
    task: &TaskNode,
    payload: &ActionArtifact,
) -> PlanloomResult<()> {
    let artifact_id = Uuid::new_v4();
    let dir = ctx.workspace.artifact_dir(task.task_id, artifact_id);
    std::fs::create_dir_all(&dir)?;
    let filename = std::path::Path::new(&payload.name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("artifact.{}", payload.format));
    let path = dir.join(&filename);
    std::fs::write(&path, payload.content.as_bytes())?;

    let artifact = Artifact {
        artifact_id,
        task_id: task.task_id,
        name: filename,
        path: path.to_string_lossy().to_string(),
        format: payload.format,
        version: ctx.store.next_artifact_version(task.task_id)?,
        content_hash: sha256_bytes(payload.content.as_bytes()),
        created_at: Utc::now(),
    };
    ctx.store.record_artifact(&artifact)?;
    ctx.emit(&TaskEvent::new(
        plan.plan_id,
        Some(task.task_id),
        EventType::ArtifactCreated,
        json!({
            "artifact_id": artifact.artifact_id,
            "name": artifact.name,
            "version": artifact.version,
            "hash": artifact.content_hash,
        }),
    ))?;

    let versions = ctx.store.list_artifacts(task.task_id)?.len() as u32;
    if versions > ctx.config.guardrails.max_artifact_versions_per_task {
        warn!(task_id = %task.task_id, versions, "artifact version guardrail exceeded");
    }

    info!(task_id = %task.task_id, version = artifact.version, "artifact written");
    ctx.transition(task, TaskStatus::ReadyToCheck, None)
}

/// Write the human-readable `required_docs/<task>.md` note.
fn write_required_docs(
    ctx: &EngineContext,
    _plan: &Plan,
    task: &TaskNode,
    docs: &[planloom_contracts::RequiredDoc],
) -> PlanloomResult<()> {
    let mut note = format!("# Missing inputs for: {}\n\n", task.title);
    note.push_str("The executor cannot proceed until these documents exist:\n\n");
    for doc in docs {
        note.push_str(&format!("- **{}**", doc.name));
        if let Some(reason) = &doc.reason {
            note.push_str(&format!(" — {reason}"));
        }
        note.push('\n');
        let suggested = doc
            .suggested_path
            .clone()
            .unwrap_or_else(|| format!("inputs/{}/", doc.name));
        note.push_str(&format!("  - place it at: `{suggested}`\n"));
    }
    let path = ctx.workspace.required_docs_path(task.task_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, note)?;
    Ok(())
}

/// Assemble the runtime context: the goal, extracted evidence, the previous
/// review's suggestions on rework, and approved upstream artifacts.
fn build_runtime_context(
    ctx: &EngineContext,
    plan: &Plan,
    task: &TaskNode,
    rework: bool,
) -> PlanloomResult<String> {
    let mut sections = Vec::new();

    if let Some(spec) = &task.deliverable_spec {
        sections.push(format!("Deliverable spec:\n{spec}"));
    }
    if let Some(criteria) = &task.acceptance_criteria {
        sections.push(format!("Acceptance criteria:\n{criteria}"));
    }

    for req in ctx.store.requirements_for_task(task.task_id)? {
        let evidence = ctx.store.list_evidence(req.requirement_id)?;
        let Some(path) = choose_context_file(&evidence, ctx.workspace.root()) else {
            continue;
        };
        let hash = evidence
            .iter()
            .find(|e| {
                e.path
                    .as_deref()
                    .map(|p| path.ends_with(p))
                    .unwrap_or(false)
            })
            .map(|e| e.ref_id.clone())
            .unwrap_or_default();

        let run = SkillRun {
            skill_run_id: Uuid::new_v4(),
            task_id: Some(task.task_id),
            skill_name: "extract_text".to_string(),
            input_hashes: vec![hash.clone()],
            params: json!({"max_chars": EVIDENCE_CHAR_CAP}),
            status: SkillRunStatus::Pending,
            outputs: json!({}),
            idempotency_key: skill_idempotency_key(
                "extract_text",
                &[hash],
                &json!({"max_chars": EVIDENCE_CHAR_CAP}),
            ),
            created_at: Utc::now(),
        };
        let fresh = ctx.store.insert_skill_run(&run)?;

        match ctx.extractor.extract(&path, EVIDENCE_CHAR_CAP) {
            Ok(text) => {
                if fresh {
                    ctx.store.finish_skill_run(
                        run.skill_run_id,
                        SkillRunStatus::Succeeded,
                        &json!({"chars": text.len()}),
                    )?;
                }
                sections.push(format!(
                    "Input `{}` (from {}):\n---\n{}\n---",
                    req.name,
                    path.display(),
                    text
                ));
            }
            Err(e) => {
                if fresh {
                    ctx.store.finish_skill_run(
                        run.skill_run_id,
                        SkillRunStatus::Failed,
                        &json!({"error": e.to_string()}),
                    )?;
                }
                ctx.emit(&TaskEvent::error(
                    plan.plan_id,
                    Some(task.task_id),
                    ErrorCode::SkillFailed,
                    e.to_string(),
                    None,
                ))?;
                sections.push(format!(
                    "Input `{}`: present at {} but not extractable as text.",
                    req.name,
                    path.display()
                ));
            }
        }
    }

    if rework {
        if let Some(review) = ctx.store.latest_review(task.task_id)? {
            let mut lines = vec![format!(
                "The previous version scored {}. Address these review suggestions:",
                review.total_score
            )];
            for s in &review.suggestions {
                lines.push(format!("- [{}] {}", s.priority.as_str(), s.change));
                for step in &s.steps {
                    lines.push(format!("  - {step}"));
                }
            }
            sections.push(lines.join("\n"));
        }
    }

    let edges = ctx.store.list_edges(plan.plan_id)?;
    for edge in edges
        .iter()
        .filter(|e| e.edge_type == EdgeType::DependsOn && e.from_task_id == task.task_id)
    {
        let Some(upstream) = ctx.store.get_node(edge.to_task_id)? else {
            continue;
        };
        let Some(approved_id) = upstream.approved_artifact_id else {
            continue;
        };
        if let Some(artifact) = ctx.store.get_artifact(approved_id)? {
            if let Ok(content) = std::fs::read_to_string(&artifact.path) {
                let content: String = content.chars().take(UPSTREAM_CHAR_CAP).collect();
                sections.push(format!(
                    "Approved upstream deliverable from `{}` ({}):\n---\n{}\n---",
                    upstream.title, artifact.name, content
                ));
            }
        }
    }

    Ok(sections.join("\n\n"))
}

/// The error-mapping table: one place that knows what each code does to a
/// task. Also journals the ERROR event with its hint.
pub fn apply_error_code(
    ctx: &EngineContext,
    plan: &Plan,
    task: &TaskNode,
    code: ErrorCode,
    message: &str,
    llm_call_id: Option<Uuid>,
) -> PlanloomResult<()> {
    ctx.emit(&TaskEvent::error(
        plan.plan_id,
        Some(task.task_id),
        code,
        message,
        llm_call_id,
    ))?;

    match code {
        ErrorCode::LlmUnparseable | ErrorCode::LlmTimeout | ErrorCode::LlmRefusal => {
            let attempts = ctx.store.increment_attempt(task.task_id)?;
            let task = refreshed(ctx, task.task_id)?;
            if attempts >= ctx.config.max_task_attempts {
                block_for_attempts(ctx, plan, &task)
            } else {
                ctx.transition(&task, TaskStatus::Failed, None)
            }
        }
        ErrorCode::SkillFailed | ErrorCode::SkillTimeout => {
            ctx.transition(task, TaskStatus::Blocked, Some(BlockedReason::WaitingSkill))
        }
        ErrorCode::SkillBadInput | ErrorCode::InputMissing => {
            ctx.transition(task, TaskStatus::Blocked, Some(BlockedReason::WaitingInput))
        }
        ErrorCode::InputConflict | ErrorCode::MaxAttemptsExceeded => {
            ctx.transition(task, TaskStatus::Blocked, Some(BlockedReason::WaitingExternal))
        }
        // Run-level codes never move a task.
        ErrorCode::PlanTimeout | ErrorCode::PlanInvalid | ErrorCode::PlanNotApproved => Ok(()),
    }
}

/// The attempt cap was reached: freeze the task behind WAITING_EXTERNAL.
pub fn block_for_attempts(ctx: &EngineContext, plan: &Plan, task: &TaskNode) -> PlanloomResult<()> {
    ctx.emit(&TaskEvent::error(
        plan.plan_id,
        Some(task.task_id),
        ErrorCode::MaxAttemptsExceeded,
        format!(
            "task reached {} attempts; reset attempts to retry",
            task.attempt_count
        ),
        None,
    ))?;
    ctx.transition(task, TaskStatus::Blocked, Some(BlockedReason::WaitingExternal))
}

fn refreshed(ctx: &EngineContext, task_id: Uuid) -> PlanloomResult<TaskNode> {
    ctx.store
        .get_node(task_id)?
        .ok_or_else(|| planloom_core::PlanloomError::Engine("task vanished mid-tick".into()))
}
