//! The create-plan sub-workflow: generate → review → retry, before the main
//! loop ever runs.

use crate::context::EngineContext;
use crate::import::{materialize_plan, ImportedPlan};
use crate::prompts;
use chrono::Utc;
use planloom_agent::CallRequest;
use planloom_contracts::{
    normalize_plan, normalize_review, validate_plan, validate_review, Rewrite, ReviewResponse,
};
use planloom_core::{
    ActionRequired, AgentKind, CallScope, ErrorCode, EventType, LlmCallMeta, Plan, PlanloomError,
    PlanloomResult, Review, TaskEvent,
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

/// Retry notes carried into the next PLAN_GEN attempt are bounded.
const RETRY_NOTES_CAP: usize = 500;

/// Run the two-phase create-plan state machine.
///
/// Each attempt: PLAN_GEN (executor) produces a candidate; PLAN_REVIEW
/// (reviewer, with its own inner retry on structurally invalid output)
/// gates it. Approval writes the plan file, commits the whole plan to the
/// store, and journals PLAN_APPROVED. Rejection distills the suggestions
/// into a short remediation note for the next attempt — never the raw
/// reviewer JSON. Exhaustion fails with PLAN_NOT_APPROVED and leaves no
/// committed plan.
pub async fn create_plan(ctx: &EngineContext, top_task: &str) -> PlanloomResult<Plan> {
    let mut retry_notes: Option<String> = None;

    for attempt in 1..=ctx.config.max_plan_attempts {
        info!(attempt, "PLAN_GEN");
        let outcome = ctx
            .executor
            .call(CallRequest {
                agent: AgentKind::Executor,
                scope: CallScope::PlanGen,
                plan_id: None,
                task_id: None,
                system_prompt: Some(format!(
                    "{}\n{}",
                    prompts::SHARED_PREAMBLE,
                    prompts::EXECUTOR_PLAN_PROMPT
                )),
                prompt: prompts::plan_gen_prompt(top_task, retry_notes.as_deref()),
                meta: LlmCallMeta {
                    attempt: Some(attempt),
                    retry_reason: retry_notes.clone(),
                    ..Default::default()
                },
            })
            .await?;

        if let Some(code) = outcome.error_code {
            retry_notes = Some(bounded(format!(
                "the previous attempt failed ({}): reply with the plan JSON only",
                code.as_str()
            )));
            continue;
        }
        let parsed = outcome.parsed.unwrap_or(serde_json::Value::Null);
        let (normalized, rewrites) = normalize_plan(&parsed);

        let plan_json = match validate_plan(&normalized) {
            Ok(plan_json) => {
                ctx.executor
                    .finish(outcome.llm_call_id, Some(&normalized), None, None, None)?;
                plan_json
            }
            Err(validator_error) => {
                let text = validator_error.to_string();
                ctx.executor.finish(
                    outcome.llm_call_id,
                    Some(&normalized),
                    Some(&text),
                    Some(ErrorCode::LlmUnparseable),
                    Some("plan failed contract validation"),
                )?;
                retry_notes = Some(bounded(format!("the previous plan was invalid: {text}")));
                continue;
            }
        };

        let imported = match materialize_plan(&plan_json) {
            Ok(imported) => imported,
            Err(e) => {
                ctx.executor.finish(
                    outcome.llm_call_id,
                    Some(&normalized),
                    None,
                    Some(ErrorCode::PlanInvalid),
                    Some(&e.to_string()),
                )?;
                retry_notes = Some(bounded(format!("the previous plan was rejected: {e}")));
                continue;
            }
        };

        // Stub plan row first, so telemetry and events get their plan scope.
        ctx.store.insert_plan(&imported.plan)?;
        ctx.store
            .set_llm_call_plan(outcome.llm_call_id, imported.plan.plan_id)?;
        journal_rewrites(ctx, imported.plan.plan_id, &rewrites)?;

        match review_plan(ctx, top_task, &imported, &normalized).await? {
            PlanReviewOutcome::Approved(plan) => return Ok(plan),
            PlanReviewOutcome::Rejected(notes) => {
                ctx.store.delete_plan(imported.plan.plan_id)?;
                retry_notes = Some(notes);
            }
        }
    }

    warn!(
        attempts = ctx.config.max_plan_attempts,
        "plan generation exhausted without approval"
    );
    Err(PlanloomError::Engine(format!(
        "PLAN_NOT_APPROVED: no plan approved in {} attempts",
        ctx.config.max_plan_attempts
    )))
}

enum PlanReviewOutcome {
    Approved(Plan),
    Rejected(String),
}

/// PLAN_REVIEW with the reviewer's own inner retry loop: structurally
/// invalid reviewer output retries the reviewer only.
async fn review_plan(
    ctx: &EngineContext,
    top_task: &str,
    imported: &ImportedPlan,
    normalized_plan: &serde_json::Value,
) -> PlanloomResult<PlanReviewOutcome> {
    let plan_text = serde_json::to_string_pretty(normalized_plan)?;

    for review_attempt in 1..=ctx.config.max_review_attempts {
        let outcome = ctx
            .reviewer
            .call(CallRequest {
                agent: AgentKind::Reviewer,
                scope: CallScope::PlanReview,
                plan_id: Some(imported.plan.plan_id),
                task_id: None,
                system_prompt: Some(format!(
                    "{}\n{}",
                    prompts::SHARED_PREAMBLE,
                    prompts::REVIEWER_PROMPT
                )),
                prompt: prompts::plan_review_prompt(top_task, &plan_text),
                meta: LlmCallMeta {
                    review_attempt: Some(review_attempt),
                    ..Default::default()
                },
            })
            .await?;

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
                    Some("plan review failed contract validation"),
                )?;
                continue;
            }
        };

        let passed = response.action_required == ActionRequired::Approve
            && response.total_score >= ctx.config.plan_review_pass_score;
        if passed {
            return commit_plan(ctx, imported, normalized_plan, &response).map(PlanReviewOutcome::Approved);
        }

        ctx.emit(&TaskEvent::new(
            imported.plan.plan_id,
            None,
            EventType::PlanReviewed,
            json!({
                "total_score": response.total_score,
                "action_required": response.action_required.as_str(),
                "suggestion_count": response.suggestions.len(),
            }),
        ))?;
        return Ok(PlanReviewOutcome::Rejected(distill_suggestions(&response)));
    }

    Ok(PlanReviewOutcome::Rejected(bounded(
        "the reviewer could not produce a structured verdict; simplify the plan".to_string(),
    )))
}

/// Approval: plan file to disk, all four tables in one transaction, review
/// row on the root, PLAN_APPROVED in the journal.
fn commit_plan(
    ctx: &EngineContext,
    imported: &ImportedPlan,
    normalized_plan: &serde_json::Value,
    response: &ReviewResponse,
) -> PlanloomResult<Plan> {
    let path = ctx.workspace.plan_file(imported.plan.plan_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(normalized_plan)?)?;

    ctx.store.import_plan(
        &imported.plan,
        &imported.nodes,
        &imported.edges,
        &imported.requirements,
    )?;
    ctx.store.approve_plan(imported.plan.plan_id)?;
    ctx.store.insert_review(&Review {
        review_id: Uuid::new_v4(),
        task_id: imported.plan.root_task_id,
        reviewer_agent: "xiaojing".to_string(),
        reviewed_artifact_id: None,
        total_score: response.total_score,
        action_required: response.action_required,
        breakdown: response.breakdown.clone(),
        suggestions: response.suggestions.clone(),
        summary: response.summary.clone(),
        created_at: Utc::now(),
    })?;
    ctx.emit(&TaskEvent::new(
        imported.plan.plan_id,
        None,
        EventType::PlanApproved,
        json!({
            "total_score": response.total_score,
            "plan_file": path.to_string_lossy(),
            "nodes": imported.nodes.len(),
        }),
    ))?;

    info!(
        plan_id = %imported.plan.plan_id,
        score = response.total_score,
        "plan approved"
    );
    let mut plan = imported.plan.clone();
    plan.approved_at = Some(Utc::now());
    Ok(plan)
}

fn journal_rewrites(
    ctx: &EngineContext,
    plan_id: Uuid,
    rewrites: &[Rewrite],
) -> PlanloomResult<()> {
    for rewrite in rewrites {
        let event = match rewrite {
            Rewrite::ChainRewrite { dropped_nodes } => TaskEvent::new(
                plan_id,
                None,
                EventType::RewriteChain,
                json!({"dropped_nodes": dropped_nodes}),
            ),
            Rewrite::RootEdgesSynthesized { added_edges } => TaskEvent::new(
                plan_id,
                None,
                EventType::RewriteRootEdges,
                json!({"added_edges": added_edges}),
            ),
        };
        ctx.emit(&event)?;
    }
    Ok(())
}

/// A short remediation note for the next PLAN_GEN attempt: highest-priority
/// suggestion texts, never the raw reviewer JSON, capped at 500 chars.
fn distill_suggestions(response: &ReviewResponse) -> String {
    let mut suggestions = response.suggestions.clone();
    suggestions.sort_by_key(|s| s.priority);
    let mut note = format!("the reviewer scored the plan {}", response.total_score);
    if suggestions.is_empty() {
        if !response.summary.is_empty() {
            note.push_str(&format!("; {}", response.summary));
        }
    } else {
        note.push_str(": ");
        note.push_str(
            &suggestions
                .iter()
                .map(|s| s.change.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        );
    }
    bounded(note)
}

fn bounded(text: String) -> String {
    if text.chars().count() <= RETRY_NOTES_CAP {
        text
    } else {
        text.chars().take(RETRY_NOTES_CAP).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planloom_core::{ScoreBreakdown, Suggestion, SuggestionPriority};

    fn response(suggestions: Vec<Suggestion>) -> ReviewResponse {
        ReviewResponse {
            schema_version: planloom_contracts::REVIEW_SCHEMA_VERSION.to_string(),
            total_score: 60,
            action_required: ActionRequired::Modify,
            breakdown: vec![ScoreBreakdown {
                dimension: "coverage".to_string(),
                score: 60,
            }],
            suggestions,
            summary: "needs work".to_string(),
        }
    }

    #[test]
    fn test_distill_orders_by_priority_and_bounds() {
        let r = response(vec![
            Suggestion {
                priority: SuggestionPriority::Low,
                change: "polish wording".to_string(),
                steps: vec![],
                acceptance_criteria: None,
            },
            Suggestion {
                priority: SuggestionPriority::High,
                change: "add a testing task".to_string(),
                steps: vec![],
                acceptance_criteria: None,
            },
        ]);
        let note = distill_suggestions(&r);
        let high = note.find("add a testing task").unwrap();
        let low = note.find("polish wording").unwrap();
        assert!(high < low);
        assert!(!note.contains('{'), "must not embed raw JSON");
    }

    #[test]
    fn test_distill_is_bounded() {
        let r = response(vec![Suggestion {
            priority: SuggestionPriority::High,
            change: "x".repeat(2000),
            steps: vec![],
            acceptance_criteria: None,
        }]);
        assert!(distill_suggestions(&r).chars().count() <= RETRY_NOTES_CAP);
    }

    #[test]
    fn test_distill_uses_summary_when_no_suggestions() {
        let r = response(vec![]);
        let note = distill_suggestions(&r);
        assert!(note.contains("needs work"));
    }
}
