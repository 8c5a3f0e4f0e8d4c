//! Prompt assembly: `[Shared] + [Agent-specific] + [RuntimeContext]`.
//!
//! The shared and agent-specific parts become the system prompt; the runtime
//! context is the user prompt. Contract shapes are spelled out verbatim so
//! the models have the exact keys in front of them.

/// Preamble both agents receive.
pub const SHARED_PREAMBLE: &str = "\
You are part of a two-agent planning system. One agent (the executor) \
decomposes work and produces deliverables; the other (the reviewer) scores \
deliverables and gates completion. Always answer with a single JSON object \
and nothing else — no prose before or after it.";

/// Executor instructions for plan generation.
pub const EXECUTOR_PLAN_PROMPT: &str = r#"
Decompose the given top-level task into a plan. Reply with this JSON shape:

{
  "schema_version": "plan_json_v1",
  "plan": {"title": "..."},
  "nodes": [
    {"task_id": "root", "node_type": "GOAL", "title": "..."},
    {"task_id": "t1", "node_type": "ACTION", "title": "...", "priority": 0,
     "estimated_person_days": 1.0, "deliverable_spec": "...",
     "acceptance_criteria": "..."}
  ],
  "edges": [
    {"edge_type": "DECOMPOSE", "from_task_id": "root", "to_task_id": "t1", "and_or": "AND"},
    {"edge_type": "DEPENDS_ON", "from_task_id": "t2", "to_task_id": "t1"}
  ],
  "requirements": [
    {"task_id": "t1", "name": "product_spec", "kind": "FILE", "min_count": 1}
  ]
}

Exactly one GOAL node is the root. A DEPENDS_ON edge means from_task_id
cannot start until to_task_id is done. Declare a requirement for every
input document a task genuinely needs from the user."#;

/// Executor instructions for working one task.
pub const EXECUTOR_TASK_PROMPT: &str = r#"
Produce the deliverable for the given task. Reply with this JSON shape:

{
  "schema_version": "xiaobo_action_v1",
  "result_type": "ARTIFACT" | "NEEDS_INPUT" | "NOOP" | "ERROR",
  "artifact": {"name": "index.html", "format": "html", "content": "..."},
  "required_docs": [{"name": "product_spec", "reason": "...",
                     "suggested_path": "inputs/product_spec/spec.md"}],
  "error": {"code": "...", "message": "..."}
}

Include only the sub-object matching your result_type. Allowed artifact
formats: md, txt, json, html, css, js. Use NEEDS_INPUT when a required
document is missing rather than inventing its contents."#;

/// Reviewer instructions, shared by plan review and task check.
pub const REVIEWER_PROMPT: &str = r#"
Review the given work strictly against its acceptance criteria. Reply with
this JSON shape:

{
  "schema_version": "xiaojing_review_v1",
  "total_score": 0-100,
  "action_required": "APPROVE" | "MODIFY" | "REQUEST_EXTERNAL_INPUT",
  "breakdown": [{"dimension": "completeness", "score": 0-100}],
  "suggestions": [{"priority": "HIGH" | "MED" | "LOW", "change": "...",
                   "steps": ["..."], "acceptance_criteria": "..."}],
  "summary": "..."
}

APPROVE only work you would ship. Use MODIFY with concrete suggestions when
rework can fix it, and REQUEST_EXTERNAL_INPUT only when no amount of rework
by the executor could."#;

/// User prompt for a PLAN_GEN call.
pub fn plan_gen_prompt(top_task: &str, retry_notes: Option<&str>) -> String {
    match retry_notes {
        Some(notes) => format!(
            "Top-level task:\n{top_task}\n\nYour previous plan was rejected. \
             Address this feedback in the new plan:\n{notes}"
        ),
        None => format!("Top-level task:\n{top_task}"),
    }
}

/// User prompt for a PLAN_REVIEW call.
pub fn plan_review_prompt(top_task: &str, plan_json: &str) -> String {
    format!(
        "Top-level task:\n{top_task}\n\nProposed plan (JSON):\n{plan_json}\n\n\
         Judge whether executing this plan would deliver the task: coverage, \
         decomposition depth, dependency ordering, and deliverable specs."
    )
}

/// User prompt for a TASK_ACTION call.
pub fn task_action_prompt(title: &str, runtime_context: &str) -> String {
    format!("Task: {title}\n{runtime_context}")
}

/// User prompt for a TASK_CHECK call.
pub fn task_review_prompt(
    title: &str,
    acceptance_criteria: Option<&str>,
    artifact_name: &str,
    artifact_content: &str,
) -> String {
    let criteria = acceptance_criteria.unwrap_or("none stated; use your judgment");
    format!(
        "Task under review: {title}\nAcceptance criteria: {criteria}\n\n\
         Deliverable `{artifact_name}`:\n---\n{artifact_content}\n---"
    )
}
