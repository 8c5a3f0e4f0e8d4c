use crate::context::EngineContext;
use planloom_core::{
    AndOr, BlockedReason, EdgeType, InputRequirement, NodeType, Plan, PlanloomResult,
    RequirementKind, TaskNode, TaskStatus,
};
use std::collections::HashMap;
use uuid::Uuid;

/// One readiness sweep over the whole plan.
///
/// For every ACTION whose status the sweep owns (PENDING, READY, FAILED when
/// auto-reset is on, and BLOCKED waiting on input or a skill):
///
/// - prerequisites met (every DEPENDS_ON prerequisite DONE) and inputs met
///   (every required requirement at `min_count` evidence) → READY;
/// - prerequisites met but inputs missing → BLOCKED with the derived reason
///   (WAITING_INPUT for files/confirmations, WAITING_SKILL for skill
///   outputs, WAITING_EXTERNAL otherwise);
/// - prerequisites unmet → PENDING.
///
/// Tasks at the attempt cap and tasks BLOCKED on WAITING_EXTERNAL or
/// WAITING_APPROVAL stay frozen until a human intervenes. GOAL nodes
/// aggregate to DONE from their DECOMPOSE children (all AND children, any OR
/// child); a CHECK node completes with the ACTION it reviews.
pub fn recompute_readiness(ctx: &EngineContext, plan: &Plan) -> PlanloomResult<()> {
    let nodes = ctx.store.list_nodes(plan.plan_id)?;
    let edges = ctx.store.list_edges(plan.plan_id)?;
    let requirements = ctx.store.list_requirements(plan.plan_id)?;

    let status_of: HashMap<Uuid, TaskStatus> =
        nodes.iter().map(|n| (n.task_id, n.status)).collect();

    // task -> its DEPENDS_ON prerequisites (the edge points dependent → prerequisite).
    let mut prerequisites: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    // goal -> (child, and_or) along DECOMPOSE.
    let mut children: HashMap<Uuid, Vec<(Uuid, AndOr)>> = HashMap::new();
    for edge in &edges {
        match edge.edge_type {
            EdgeType::DependsOn => prerequisites
                .entry(edge.from_task_id)
                .or_default()
                .push(edge.to_task_id),
            EdgeType::Decompose => children
                .entry(edge.from_task_id)
                .or_default()
                .push((edge.to_task_id, edge.and_or.unwrap_or(AndOr::And))),
            EdgeType::Alternative => {}
        }
    }

    let mut evidence_counts: HashMap<Uuid, u32> = HashMap::new();
    for req in &requirements {
        evidence_counts.insert(
            req.requirement_id,
            ctx.store.evidence_count(req.requirement_id)?,
        );
    }

    for node in &nodes {
        match node.node_type {
            NodeType::Goal => {
                if node.status == TaskStatus::Done || node.status == TaskStatus::Abandoned {
                    continue;
                }
                let kids = children.get(&node.task_id).cloned().unwrap_or_default();
                if kids.is_empty() {
                    continue;
                }
                let done = |id: &Uuid| status_of.get(id) == Some(&TaskStatus::Done);
                let and_done = kids
                    .iter()
                    .filter(|(_, ao)| *ao == AndOr::And)
                    .all(|(id, _)| done(id));
                let or_kids: Vec<&Uuid> = kids
                    .iter()
                    .filter(|(_, ao)| *ao == AndOr::Or)
                    .map(|(id, _)| id)
                    .collect();
                let or_done = or_kids.is_empty() || or_kids.into_iter().any(done);
                if and_done && or_done {
                    ctx.transition(node, TaskStatus::Done, None)?;
                }
            }
            NodeType::Check => {
                // A CHECK completes with the ACTION it reviews, so GOAL
                // aggregation can close over it in strong-workflow mode.
                if node.status != TaskStatus::Done && node.status != TaskStatus::Abandoned {
                    let target_done = node
                        .review_target_task_id
                        .map(|t| status_of.get(&t) == Some(&TaskStatus::Done))
                        .unwrap_or(false);
                    if target_done {
                        ctx.transition(node, TaskStatus::Done, None)?;
                    }
                }
            }
            NodeType::Action => {
                let sweepable = match node.status {
                    TaskStatus::Pending | TaskStatus::Ready => true,
                    TaskStatus::Failed => ctx.config.failed_auto_reset_ready,
                    TaskStatus::Blocked => matches!(
                        node.blocked_reason,
                        Some(BlockedReason::WaitingInput) | Some(BlockedReason::WaitingSkill)
                    ),
                    _ => false,
                };
                if !sweepable || node.attempt_count >= ctx.config.max_task_attempts {
                    continue;
                }

                let prereqs_done = prerequisites
                    .get(&node.task_id)
                    .into_iter()
                    .flatten()
                    .all(|dep| status_of.get(dep) == Some(&TaskStatus::Done));

                let missing: Vec<&InputRequirement> = requirements
                    .iter()
                    .filter(|r| r.task_id == node.task_id && r.required)
                    .filter(|r| {
                        evidence_counts.get(&r.requirement_id).copied().unwrap_or(0)
                            < r.min_count
                    })
                    .collect();

                if prereqs_done && missing.is_empty() {
                    ctx.transition(node, TaskStatus::Ready, None)?;
                } else if prereqs_done {
                    // Only skill outputs missing → the skill is the blocker;
                    // any missing file or confirmation → the user is.
                    let reason = if missing
                        .iter()
                        .any(|r| r.kind != RequirementKind::SkillOutput)
                    {
                        BlockedReason::WaitingInput
                    } else {
                        BlockedReason::WaitingSkill
                    };
                    if reason == BlockedReason::WaitingInput
                        && node.status != TaskStatus::Blocked
                    {
                        write_missing_inputs_note(ctx, node, &missing)?;
                    }
                    ctx.transition(node, TaskStatus::Blocked, Some(reason))?;
                } else {
                    ctx.transition(node, TaskStatus::Pending, None)?;
                }
            }
        }
    }
    Ok(())
}

/// Tell the user what to drop where, the first time a task blocks on input.
fn write_missing_inputs_note(
    ctx: &EngineContext,
    node: &TaskNode,
    missing: &[&InputRequirement],
) -> PlanloomResult<()> {
    let mut note = format!("# Missing inputs for: {}\n\n", node.title);
    note.push_str("This task cannot start until these inputs exist:\n\n");
    for req in missing {
        note.push_str(&format!(
            "- **{}** ({}, at least {} file(s))\n  - place it under: `inputs/{}/`\n",
            req.name,
            req.kind.as_str(),
            req.min_count,
            req.name
        ));
    }
    let path = ctx.workspace.required_docs_path(node.task_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, note)?;
    Ok(())
}
