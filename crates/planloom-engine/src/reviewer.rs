//! The reviewer phase: score a READY_TO_CHECK task's candidate artifact and
//! gate it to DONE, rework, or external escalation.

use crate::context::EngineContext;
use crate::executor::block_for_attempts;
use crate::prompts;
use chrono::Utc;
use planloom_agent::CallRequest;
use planloom_contracts::{normalize_review, validate_review, ReviewResponse};
use planloom_core::{
    ActionRequired, AgentKind, BlockedReason, CallScope, ErrorCode, EventType, LlmCallMeta,
    NodeType, Plan, PlanloomResult, Review, TaskEvent, TaskNode, TaskStatus,
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

/// Review char cap for the artifact body inside the prompt.
const ARTIFACT_CHAR_CAP: usize = 60_000;

/// Run the reviewer on one READY_TO_CHECK task. Returns how many LM calls
/// were spent (the reviewer retries parse failures internally).
pub async fn run_reviewer_phase(
    ctx: &EngineContext,
    plan: &Plan,
    task: &TaskNode,
) -> PlanloomResult<u32> {
    // Version lock: whatever is active right now is what this review judges.
    let Some(reviewed_artifact_id) = task.active_artifact_id else {
        warn!(task_id = %task.task_id, "READY_TO_CHECK without an active artifact");
        ctx.transition(task, TaskStatus::Ready, None)?;
        return Ok(0);
    };
    let artifact = ctx
        .store
        .get_artifact(reviewed_artifact_id)?
        .ok_or_else(|| {
            planloom_core::PlanloomError::Engine(format!(
                "active artifact {reviewed_artifact_id} has no row"
            ))
        })?;
    let content = std::fs::read_to_string(&artifact.path)?;
    let content: String = content.chars().take(ARTIFACT_CHAR_CAP).collect();

    // In strong-workflow mode the paired CHECK node names the criteria and
    // owns the review directory; otherwise the ACTION does both.
    let check = paired_check(ctx, plan, task)?;
    let check_task_id = check.as_ref().map(|c| c.task_id).unwrap_or(task.task_id);
    let acceptance = check
        .as_ref()
        .and_then(|c| c.acceptance_criteria.clone())
        .or_else(|| task.acceptance_criteria.clone());

    let prompt = prompts::task_review_prompt(
        &task.title,
        acceptance.as_deref(),
        &artifact.name,
        &content,
    );

    let mut calls = 0;
    for review_attempt in 1..=ctx.config.max_review_attempts {
        calls += 1;
        let outcome = ctx
            .reviewer
            .call(CallRequest {
                agent: AgentKind::Reviewer,
                scope: CallScope::TaskCheck,
                plan_id: Some(plan.plan_id),
                task_id: Some(task.task_id),
                system_prompt: Some(format!(
                    "{}\n{}",
                    prompts::SHARED_PREAMBLE,
                    prompts::REVIEWER_PROMPT
                )),
                prompt: prompt.clone(),
                meta: LlmCallMeta {
                    review_attempt: Some(review_attempt),
                    ..Default::default()
                },
            })
            .await?;

        // Reviewer failures never mark the executor task FAILED: retry the
        // reviewer within its own cap, leaving the task READY_TO_CHECK.
        if outcome.error_code.is_some() {
            continue;
        }
        let parsed = outcome.parsed.unwrap_or(serde_json::Value::Null);
        let normalized = normalize_review(&parsed);
        let response = match validate_review(&normalized) {
            Ok(response) => {
                ctx.reviewer
                    .finish(outcome.llm_call_id, Some(&normalized), None, None, None)?;
                response
            }
            Err(validator_error) => {
                let text = validator_error.to_string();
                ctx.reviewer.finish(
                    outcome.llm_call_id,
                    Some(&normalized),
                    Some(&text),
                    Some(ErrorCode::LlmUnparseable),
                    Some("reviewer response failed contract validation"),
                )?;
                continue;
            }
        };

        apply_verdict(ctx, plan, task, check_task_id, reviewed_artifact_id, &response)?;
        return Ok(calls);
    }

    ctx.emit(&TaskEvent::error(
        plan.plan_id,
        Some(task.task_id),
        ErrorCode::LlmUnparseable,
        format!(
            "reviewer produced no valid verdict in {} attempts; task stays READY_TO_CHECK",
            ctx.config.max_review_attempts
        ),
        None,
    ))?;
    Ok(calls)
}

/// The v2 CHECK node paired with this ACTION, if the plan has one.
fn paired_check(
    ctx: &EngineContext,
    plan: &Plan,
    task: &TaskNode,
) -> PlanloomResult<Option<TaskNode>> {
    let nodes = ctx.store.list_nodes(plan.plan_id)?;
    Ok(nodes
        .into_iter()
        .find(|n| n.node_type == NodeType::Check && n.review_target_task_id == Some(task.task_id)))
}

/// Persist the review row and apply the gate decision.
fn apply_verdict(
    ctx: &EngineContext,
    plan: &Plan,
    task: &TaskNode,
    check_task_id: Uuid,
    reviewed_artifact_id: Uuid,
    response: &ReviewResponse,
) -> PlanloomResult<()> {
    let review = Review {
        review_id: Uuid::new_v4(),
        task_id: task.task_id,
        reviewer_agent: "xiaojing".to_string(),
        reviewed_artifact_id: Some(reviewed_artifact_id),
        total_score: response.total_score,
        action_required: response.action_required,
        breakdown: response.breakdown.clone(),
        suggestions: response.suggestions.clone(),
        summary: response.summary.clone(),
        created_at: Utc::now(),
    };
    ctx.store.insert_review(&review)?;
    ctx.emit(&TaskEvent::new(
        plan.plan_id,
        Some(task.task_id),
        EventType::ReviewCreated,
        json!({
            "review_id": review.review_id,
            "total_score": review.total_score,
            "action_required": review.action_required.as_str(),
            "reviewed_artifact_id": reviewed_artifact_id,
        }),
    ))?;

    let reviews = ctx.store.list_reviews(task.task_id)?.len() as u32;
    if reviews > ctx.config.guardrails.max_review_versions_per_check {
        warn!(task_id = %task.task_id, reviews, "review version guardrail exceeded");
    }

    // The verdict is authoritative; the score is advisory at the boundary.
    let passed = response.action_required == ActionRequired::Approve
        && response.total_score >= ctx.config.plan_review_pass_score;

    write_verdict_file(ctx, check_task_id, &review, passed)?;

    if passed {
        ctx.store
            .set_approved_artifact(task.task_id, reviewed_artifact_id)?;
        let current = ctx
            .store
            .get_node(task.task_id)?
            .ok_or_else(|| planloom_core::PlanloomError::Engine("task vanished mid-review".into()))?;
        if current.active_artifact_id == Some(reviewed_artifact_id) {
            ctx.store.complete_action(task.task_id, reviewed_artifact_id)?;
            ctx.emit(&TaskEvent::status_changed(
                plan.plan_id,
                task.task_id,
                TaskStatus::ReadyToCheck,
                TaskStatus::Done,
                None,
            ))?;
            info!(task_id = %task.task_id, score = response.total_score, "task approved and done");
        } else {
            // The executor produced a newer version during review: the
            // approval stands for the old version, the new one still needs
            // its own review.
            info!(
                task_id = %task.task_id,
                "approved artifact superseded mid-review; staying READY_TO_CHECK"
            );
        }
        return Ok(());
    }

    if response.action_required == ActionRequired::RequestExternalInput {
        ctx.transition(task, TaskStatus::Blocked, Some(BlockedReason::WaitingExternal))?;
        return Ok(());
    }

    // MODIFY (or an approval under the pass score): one attempt burned.
    let attempts = ctx.store.increment_attempt(task.task_id)?;
    let current = ctx
        .store
        .get_node(task.task_id)?
        .ok_or_else(|| planloom_core::PlanloomError::Engine("task vanished mid-review".into()))?;
    if attempts >= ctx.config.max_task_attempts {
        write_final_suggestions(ctx, task, &review)?;
        block_for_attempts(ctx, plan, &current)
    } else {
        ctx.transition(&current, TaskStatus::ToBeModify, None)
    }
}

/// `reviews/<check>/<review>/APPROVED.md` or `REJECTED.md`.
fn write_verdict_file(
    ctx: &EngineContext,
    check_task_id: Uuid,
    review: &Review,
    passed: bool,
) -> PlanloomResult<()> {
    let dir = ctx.workspace.review_dir(check_task_id, review.review_id);
    std::fs::create_dir_all(&dir)?;
    let filename = if passed { "APPROVED.md" } else { "REJECTED.md" };

    let mut body = format!(
        "# Review {}\n\nScore: {}/100\nVerdict: {}\n\n{}\n",
        review.review_id,
        review.total_score,
        review.action_required.as_str(),
        review.summary
    );
    if !review.breakdown.is_empty() {
        body.push_str("\n## Breakdown\n");
        for b in &review.breakdown {
            body.push_str(&format!("- {}: {}\n", b.dimension, b.score));
        }
    }
    if !review.suggestions.is_empty() {
        body.push_str("\n## Suggestions\n");
        for s in &review.suggestions {
            body.push_str(&format!("- [{}] {}\n", s.priority.as_str(), s.change));
        }
    }
    std::fs::write(dir.join(filename), body)?;
    Ok(())
}

/// On attempt exhaustion, leave the final suggestions where a human will
/// look: `reviews/<task>/FINAL_SUGGESTIONS.md`.
fn write_final_suggestions(
    ctx: &EngineContext,
    task: &TaskNode,
    review: &Review,
) -> PlanloomResult<()> {
    let dir = ctx.workspace.review_task_dir(task.task_id);
    std::fs::create_dir_all(&dir)?;
    let mut body = format!(
        "# Attempts exhausted: {}\n\nFinal score: {}/100. The task is blocked \
         on external help; run `planloom reset-failed` after addressing the \
         suggestions below.\n\n",
        task.title, review.total_score
    );
    for s in &review.suggestions {
        body.push_str(&format!("- [{}] {}\n", s.priority.as_str(), s.change));
        for step in &s.steps {
            body.push_str(&format!("  - {step}\n"));
        }
    }
    std::fs::write(dir.join("FINAL_SUGGESTIONS.md"), body)?;
    Ok(())
}
