//! The single-writer main loop: scan → recompute → pick → executor xor
//! reviewer → persist → events, under three outer fuses.

use crate::context::EngineContext;
use crate::doctor::run_doctor;
use crate::executor::run_executor_phase;
use crate::matcher::Matcher;
use crate::readiness::recompute_readiness;
use crate::reviewer::run_reviewer_phase;
use crate::scheduler::pick_next;
use planloom_core::{
    BlockedReason, NodeType, Plan, PlanloomError, PlanloomResult, TaskEvent, TaskStatus,
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Ticks executed.
    pub iterations: u32,
    /// LM calls spent.
    pub llm_calls: u32,
    /// The fuse that stopped the loop, if one did (`PLAN` or `LLM_CALLS`).
    pub tripped_fuse: Option<String>,
    /// The root GOAL reached DONE.
    pub plan_done: bool,
}

/// Drive one plan until it completes, stalls, or a fuse trips.
///
/// Preflight runs the doctor first and refuses to start on FAIL. Each tick
/// is strictly ordered; the only suspension points are the LM call timeout
/// and the empty-queue poll sleep.
pub async fn run_plan(ctx: &EngineContext, plan: &Plan) -> PlanloomResult<RunReport> {
    let report = run_doctor(&ctx.store, &ctx.config, Some(plan))?;
    if !report.passed() {
        return Err(PlanloomError::Engine(format!(
            "doctor failed preflight:\n{report}"
        )));
    }
    ctx.workspace.ensure_layout()?;

    let started = Instant::now();
    let runtime_fuse = Duration::from_secs(ctx.config.max_plan_runtime_seconds);
    let mut matcher = Matcher::new();
    let mut iterations: u32 = 0;
    let mut llm_calls: u32 = 0;
    let mut tripped_fuse = None;
    let mut plan_done = false;

    loop {
        if started.elapsed() >= runtime_fuse {
            warn!(elapsed_s = started.elapsed().as_secs(), "runtime fuse tripped");
            ctx.emit(&TaskEvent::timeout(
                plan.plan_id,
                "PLAN",
                format!("wall clock exceeded {}s", runtime_fuse.as_secs()),
            ))?;
            tripped_fuse = Some("PLAN".to_string());
            break;
        }
        if iterations >= ctx.config.guardrails.max_run_iterations {
            ctx.emit(&TaskEvent::timeout(
                plan.plan_id,
                "PLAN",
                format!("iteration cap {} reached", iterations),
            ))?;
            tripped_fuse = Some("PLAN".to_string());
            break;
        }
        if llm_calls >= ctx.config.guardrails.max_llm_calls_per_run {
            ctx.emit(&TaskEvent::timeout(
                plan.plan_id,
                "LLM_CALLS",
                format!("LM call cap {} reached", llm_calls),
            ))?;
            tripped_fuse = Some("LLM_CALLS".to_string());
            break;
        }
        iterations += 1;

        matcher.scan(ctx, plan)?;
        recompute_readiness(ctx, plan)?;

        let nodes = ctx.store.list_nodes(plan.plan_id)?;
        if nodes
            .iter()
            .any(|n| n.task_id == plan.root_task_id && n.status == TaskStatus::Done)
        {
            info!(plan_id = %plan.plan_id, iterations, "root GOAL done; plan complete");
            plan_done = true;
            break;
        }

        // Executor xor reviewer per tick: rework and fresh work first, then
        // the review backlog, oldest candidate first.
        if let Some(task) = pick_next(&nodes).cloned() {
            llm_calls += run_executor_phase(ctx, plan, &task).await?;
            continue;
        }
        let review_candidate = nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Action && n.status == TaskStatus::ReadyToCheck)
            .min_by_key(|n| (n.created_at, n.task_id))
            .cloned();
        if let Some(task) = review_candidate {
            llm_calls += run_reviewer_phase(ctx, plan, &task).await?;
            continue;
        }

        // Nothing runnable. Wait for inputs if any task can still unblock;
        // otherwise the plan is stalled and the loop ends.
        let waitable = nodes.iter().any(|n| {
            n.status == TaskStatus::Blocked
                && matches!(
                    n.blocked_reason,
                    Some(BlockedReason::WaitingInput) | Some(BlockedReason::WaitingSkill)
                )
                && n.attempt_count < ctx.config.max_task_attempts
        });
        if waitable {
            tokio::time::sleep(Duration::from_secs(ctx.config.poll_interval_seconds)).await;
        } else {
            info!(plan_id = %plan.plan_id, iterations, "no runnable or waitable task; stopping");
            break;
        }
    }

    Ok(RunReport {
        iterations,
        llm_calls,
        tripped_fuse,
        plan_done,
    })
}
