//! The `plan_json_v1` contract: generated plans.

use crate::error::ValidatorError;
use crate::fields::{
    as_object, check_schema_version, opt_enum, opt_f64, opt_int, opt_str, opt_str_array,
    req_array, req_enum, req_object, req_str,
};
use crate::normalize::{
    apply_aliases, coerce_integral, ensure_array, ensure_schema_version, filter_objects,
    peel_wrappers, uppercase_field, Rewrite,
};
use crate::PLAN_SCHEMA_VERSION;
use planloom_core::{AndOr, EdgeType, NodeType, RequirementKind, RequirementSource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Plan-level header fields of the contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanHeader {
    /// Plan title.
    pub title: String,
    /// Generating agent, when the model names one.
    pub owner_agent: Option<String>,
    /// Plan priority constraint.
    pub priority: i32,
    /// Deadline constraint, as the model stated it.
    pub deadline: Option<String>,
}

/// One node of the generated plan; ids are contract-local strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Contract-local node id (e.g. `"t1"`); import remaps to a real id.
    pub task_id: String,
    /// GOAL, ACTION, or CHECK.
    pub node_type: NodeType,
    /// Node title.
    pub title: String,
    /// Scheduling priority.
    pub priority: i32,
    /// Owning agent, when named.
    pub owner_agent: Option<String>,
    /// Effort estimate (strong-workflow mode).
    pub estimated_person_days: Option<f64>,
    /// Deliverable description (strong-workflow mode).
    pub deliverable_spec: Option<String>,
    /// Reviewer checklist (strong-workflow mode).
    pub acceptance_criteria: Option<String>,
    /// For CHECK nodes: the reviewed ACTION's contract-local id.
    pub review_target_task_id: Option<String>,
}

/// One edge of the generated plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// DECOMPOSE, DEPENDS_ON, or ALTERNATIVE.
    pub edge_type: EdgeType,
    /// Source node's contract-local id.
    pub from_task_id: String,
    /// Target node's contract-local id.
    pub to_task_id: String,
    /// AND/OR metadata on DECOMPOSE edges.
    pub and_or: Option<AndOr>,
    /// Group id on ALTERNATIVE edges.
    pub group_id: Option<String>,
}

/// One declared input requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementSpec {
    /// Contract-local id of the task declaring the requirement.
    pub task_id: String,
    /// Requirement name; also the expected `inputs/<name>/` directory.
    pub name: String,
    /// FILE, CONFIRMATION, or SKILL_OUTPUT.
    pub kind: RequirementKind,
    /// Whether readiness waits for it.
    pub required: bool,
    /// Minimum evidence count.
    pub min_count: u32,
    /// Accepted extensions.
    pub allowed_types: Vec<String>,
    /// Who may provide the evidence.
    pub source: RequirementSource,
    /// Matcher filename keywords.
    pub filename_keywords: Vec<String>,
}

/// The validated `plan_json_v1` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanJson {
    /// Always [`PLAN_SCHEMA_VERSION`].
    pub schema_version: String,
    /// Plan header.
    pub plan: PlanHeader,
    /// Nodes; validated non-empty with unique ids.
    pub nodes: Vec<NodeSpec>,
    /// Edges.
    pub edges: Vec<EdgeSpec>,
    /// Requirements.
    pub requirements: Vec<RequirementSpec>,
}

const NODE_ALIASES: &[(&str, &str)] = &[
    ("id", "task_id"),
    ("type", "node_type"),
    ("name", "title"),
    ("person_days", "estimated_person_days"),
    ("check_target", "review_target_task_id"),
];

const EDGE_ALIASES: &[(&str, &str)] = &[
    ("from", "from_task_id"),
    ("to", "to_task_id"),
    ("source", "from_task_id"),
    ("target", "to_task_id"),
    ("type", "edge_type"),
];

const REQUIREMENT_ALIASES: &[(&str, &str)] = &[
    ("task", "task_id"),
    ("types", "allowed_types"),
    ("keywords", "filename_keywords"),
];

/// Normalize an arbitrary model response toward the `plan_json_v1` shape.
///
/// Returns the canonical value plus any structural rewrites performed, so the
/// caller can journal them. Running the function on its own output is the
/// identity.
pub fn normalize_plan(raw: &Value) -> (Value, Vec<Rewrite>) {
    let mut rewrites = Vec::new();
    let mut obj = match peel_wrappers(raw.clone(), &["plan", "nodes", "tasks"]) {
        Value::Object(obj) => obj,
        other => return (other, rewrites),
    };

    // Container aliases, then make sure the three arrays exist and hold
    // objects only.
    apply_aliases(
        &mut obj,
        &[
            ("tasks", "nodes"),
            ("links", "edges"),
            ("inputs", "requirements"),
        ],
    );
    ensure_array(&mut obj, "nodes");
    ensure_array(&mut obj, "edges");
    ensure_array(&mut obj, "requirements");
    filter_objects(&mut obj, "nodes");
    filter_objects(&mut obj, "edges");
    filter_objects(&mut obj, "requirements");

    // Models sometimes flatten the plan header into the top level.
    if !obj.contains_key("plan") {
        let mut header = Map::new();
        for key in ["title", "name", "owner_agent", "priority", "deadline"] {
            if let Some(v) = obj.remove(key) {
                header.insert(key.to_string(), v);
            }
        }
        obj.insert("plan".to_string(), Value::Object(header));
    }
    if let Some(Value::Object(plan)) = obj.get_mut("plan") {
        apply_aliases(plan, &[("name", "title")]);
        coerce_integral(plan, "priority");
    }

    if let Some(Value::Array(nodes)) = obj.get_mut("nodes") {
        for node in nodes.iter_mut() {
            if let Value::Object(n) = node {
                apply_aliases(n, NODE_ALIASES);
                uppercase_field(n, "node_type");
                coerce_integral(n, "priority");
            }
        }
    }
    if let Some(Value::Array(edges)) = obj.get_mut("edges") {
        for edge in edges.iter_mut() {
            if let Value::Object(e) = edge {
                apply_aliases(e, EDGE_ALIASES);
                uppercase_field(e, "edge_type");
                uppercase_field(e, "and_or");
            }
        }
    }
    if let Some(Value::Array(reqs)) = obj.get_mut("requirements") {
        for req in reqs.iter_mut() {
            if let Value::Object(r) = req {
                apply_aliases(r, REQUIREMENT_ALIASES);
                uppercase_field(r, "kind");
                uppercase_field(r, "source");
                coerce_integral(r, "min_count");
                if let Some(Value::Array(types)) = r.get_mut("allowed_types") {
                    for t in types.iter_mut() {
                        if let Value::String(s) = t {
                            *s = s.to_lowercase();
                        }
                    }
                }
            }
        }
    }

    if let Some(rewrite) = drop_sentinel_chain(&mut obj) {
        rewrites.push(rewrite);
    }
    if let Some(rewrite) = synthesize_root_edges(&mut obj) {
        rewrites.push(rewrite);
    }

    ensure_schema_version(&mut obj, PLAN_SCHEMA_VERSION);
    (Value::Object(obj), rewrites)
}

/// Drop START/END sentinel nodes (and every edge touching them) so a linear
/// chain becomes plain nodes the root can fan out to.
fn drop_sentinel_chain(obj: &mut Map<String, Value>) -> Option<Rewrite> {
    let sentinel_ids: HashSet<String> = match obj.get("nodes").and_then(Value::as_array) {
        Some(nodes) => nodes
            .iter()
            .filter_map(Value::as_object)
            .filter(|n| {
                let id = n.get("task_id").and_then(Value::as_str).unwrap_or("");
                let title = n.get("title").and_then(Value::as_str).unwrap_or("");
                let id = id.trim().to_uppercase();
                let title = title.trim().to_uppercase();
                id == "START" || id == "END" || title == "START" || title == "END"
            })
            .filter_map(|n| n.get("task_id").and_then(Value::as_str).map(str::to_string))
            .collect(),
        None => return None,
    };
    if sentinel_ids.is_empty() {
        return None;
    }

    if let Some(Value::Array(nodes)) = obj.get_mut("nodes") {
        nodes.retain(|n| {
            n.get("task_id")
                .and_then(Value::as_str)
                .map(|id| !sentinel_ids.contains(id))
                .unwrap_or(true)
        });
    }
    if let Some(Value::Array(edges)) = obj.get_mut("edges") {
        edges.retain(|e| {
            let from = e.get("from_task_id").and_then(Value::as_str).unwrap_or("");
            let to = e.get("to_task_id").and_then(Value::as_str).unwrap_or("");
            !sentinel_ids.contains(from) && !sentinel_ids.contains(to)
        });
    }
    Some(Rewrite::ChainRewrite {
        dropped_nodes: sentinel_ids.len(),
    })
}

/// Add DECOMPOSE edges from the single GOAL root to every node nothing
/// decomposes into, so the root can aggregate to DONE.
fn synthesize_root_edges(obj: &mut Map<String, Value>) -> Option<Rewrite> {
    let nodes = obj.get("nodes").and_then(Value::as_array)?;
    let edges = obj.get("edges").and_then(Value::as_array)?;

    let decompose_targets: HashSet<String> = edges
        .iter()
        .filter(|e| e.get("edge_type").and_then(Value::as_str) == Some("DECOMPOSE"))
        .filter_map(|e| e.get("to_task_id").and_then(Value::as_str).map(str::to_string))
        .collect();

    let goals: Vec<String> = nodes
        .iter()
        .filter(|n| n.get("node_type").and_then(Value::as_str) == Some("GOAL"))
        .filter_map(|n| n.get("task_id").and_then(Value::as_str).map(str::to_string))
        .filter(|id| !decompose_targets.contains(id))
        .collect();
    // Zero or several root candidates: leave it for the validator / importer.
    let [root] = goals.as_slice() else { return None };
    let root = root.clone();

    let orphans: Vec<String> = nodes
        .iter()
        .filter_map(|n| n.get("task_id").and_then(Value::as_str))
        .filter(|id| *id != root && !decompose_targets.contains(*id))
        .map(str::to_string)
        .collect();
    if orphans.is_empty() {
        return None;
    }

    let added = orphans.len();
    if let Some(Value::Array(edges)) = obj.get_mut("edges") {
        for orphan in orphans {
            edges.push(json!({
                "edge_type": "DECOMPOSE",
                "from_task_id": root,
                "to_task_id": orphan,
                "and_or": "AND",
            }));
        }
    }
    Some(Rewrite::RootEdgesSynthesized { added_edges: added })
}

/// Strictly validate a normalized value against `plan_json_v1`.
pub fn validate_plan(value: &Value) -> Result<PlanJson, ValidatorError> {
    let obj = as_object(value, "$")?;
    check_schema_version(obj, PLAN_SCHEMA_VERSION)?;

    let plan_obj = req_object(obj, "$", "plan")?;
    let plan = PlanHeader {
        title: req_str(plan_obj, "$.plan", "title")?,
        owner_agent: opt_str(plan_obj, "$.plan", "owner_agent")?,
        priority: opt_int(plan_obj, "$.plan", "priority")?.unwrap_or(0) as i32,
        deadline: opt_str(plan_obj, "$.plan", "deadline")?,
    };

    let raw_nodes = req_array(obj, "$", "nodes")?;
    if raw_nodes.is_empty() {
        return Err(ValidatorError::new(
            "$.nodes",
            "a non-empty array of nodes",
            r#"{"nodes": [{"task_id": "t1", "node_type": "GOAL", "title": "..."}]}"#,
        ));
    }
    let mut seen_ids = HashSet::new();
    let mut nodes = Vec::with_capacity(raw_nodes.len());
    for (i, raw) in raw_nodes.iter().enumerate() {
        let path = format!("$.nodes[{i}]");
        let n = as_object(raw, &path)?;
        let task_id = req_str(n, &path, "task_id")?;
        if !seen_ids.insert(task_id.clone()) {
            return Err(ValidatorError::new(
                format!("{path}.task_id"),
                "a task id unique within the plan",
                r#"{"task_id": "t2"}"#,
            ));
        }
        nodes.push(NodeSpec {
            task_id,
            node_type: req_enum(n, &path, "node_type", NodeType::parse, "GOAL | ACTION | CHECK")?,
            title: req_str(n, &path, "title")?,
            priority: opt_int(n, &path, "priority")?.unwrap_or(0) as i32,
            owner_agent: opt_str(n, &path, "owner_agent")?,
            estimated_person_days: opt_f64(n, &path, "estimated_person_days")?,
            deliverable_spec: opt_str(n, &path, "deliverable_spec")?,
            acceptance_criteria: opt_str(n, &path, "acceptance_criteria")?,
            review_target_task_id: opt_str(n, &path, "review_target_task_id")?,
        });
    }

    let raw_edges = req_array(obj, "$", "edges")?;
    let mut edges = Vec::with_capacity(raw_edges.len());
    for (i, raw) in raw_edges.iter().enumerate() {
        let path = format!("$.edges[{i}]");
        let e = as_object(raw, &path)?;
        let edge_type = req_enum(
            e,
            &path,
            "edge_type",
            EdgeType::parse,
            "DECOMPOSE | DEPENDS_ON | ALTERNATIVE",
        )?;
        edges.push(EdgeSpec {
            edge_type,
            from_task_id: req_str(e, &path, "from_task_id")?,
            to_task_id: req_str(e, &path, "to_task_id")?,
            and_or: opt_enum(e, &path, "and_or", AndOr::parse, "AND | OR")?,
            group_id: opt_str(e, &path, "group_id")?,
        });
    }

    let raw_reqs = req_array(obj, "$", "requirements")?;
    let mut requirements = Vec::with_capacity(raw_reqs.len());
    for (i, raw) in raw_reqs.iter().enumerate() {
        let path = format!("$.requirements[{i}]");
        let r = as_object(raw, &path)?;
        requirements.push(RequirementSpec {
            task_id: req_str(r, &path, "task_id")?,
            name: req_str(r, &path, "name")?,
            kind: opt_enum(
                r,
                &path,
                "kind",
                RequirementKind::parse,
                "FILE | CONFIRMATION | SKILL_OUTPUT",
            )?
            .unwrap_or(RequirementKind::File),
            required: crate::fields::opt_bool(r, "required", true),
            min_count: opt_int(r, &path, "min_count")?.unwrap_or(1).max(0) as u32,
            allowed_types: opt_str_array(r, &path, "allowed_types")?,
            source: opt_enum(
                r,
                &path,
                "source",
                RequirementSource::parse,
                "USER | AGENT | ANY",
            )?
            .unwrap_or(RequirementSource::Any),
            filename_keywords: opt_str_array(r, &path, "filename_keywords")?,
        });
    }

    Ok(PlanJson {
        schema_version: PLAN_SCHEMA_VERSION.to_string(),
        plan,
        nodes,
        edges,
        requirements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_plan() -> Value {
        json!({
            "plan": {"title": "2048 game"},
            "nodes": [
                {"task_id": "root", "node_type": "GOAL", "title": "deliver the game"},
                {"task_id": "t1", "node_type": "ACTION", "title": "write index.html"},
            ],
            "edges": [
                {"edge_type": "DECOMPOSE", "from_task_id": "root", "to_task_id": "t1"},
            ],
            "requirements": [],
        })
    }

    #[test]
    fn test_minimal_plan_validates() {
        let (normalized, rewrites) = normalize_plan(&minimal_plan());
        assert!(rewrites.is_empty());
        let plan = validate_plan(&normalized).unwrap();
        assert_eq!(plan.plan.title, "2048 game");
        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.edges.len(), 1);
    }

    #[test]
    fn test_aliases_and_wrappers() {
        let raw = json!({
            "plan_json": {
                "plan": {"name": "aliased"},
                "tasks": [
                    {"id": "root", "type": "goal", "name": "root goal"},
                    {"id": "a", "type": "action", "name": "do the thing"},
                ],
                "links": [
                    {"from": "root", "to": "a", "type": "decompose"},
                ],
            }
        });
        let (normalized, _) = normalize_plan(&raw);
        let plan = validate_plan(&normalized).unwrap();
        assert_eq!(plan.plan.title, "aliased");
        assert_eq!(plan.nodes[0].node_type, NodeType::Goal);
        assert_eq!(plan.edges[0].edge_type, EdgeType::Decompose);
        assert_eq!(plan.edges[0].from_task_id, "root");
    }

    #[test]
    fn test_root_edges_synthesized_for_orphans() {
        let raw = json!({
            "plan": {"title": "p"},
            "nodes": [
                {"task_id": "root", "node_type": "GOAL", "title": "g"},
                {"task_id": "a", "node_type": "ACTION", "title": "a"},
                {"task_id": "b", "node_type": "ACTION", "title": "b"},
            ],
            "edges": [],
            "requirements": [],
        });
        let (normalized, rewrites) = normalize_plan(&raw);
        assert!(matches!(
            rewrites.as_slice(),
            [Rewrite::RootEdgesSynthesized { added_edges: 2 }]
        ));
        let plan = validate_plan(&normalized).unwrap();
        assert_eq!(plan.edges.len(), 2);
        assert!(plan.edges.iter().all(|e| e.edge_type == EdgeType::Decompose
            && e.from_task_id == "root"
            && e.and_or == Some(AndOr::And)));
    }

    #[test]
    fn test_start_end_chain_rewritten() {
        let raw = json!({
            "plan": {"title": "p"},
            "nodes": [
                {"task_id": "START", "node_type": "ACTION", "title": "START"},
                {"task_id": "root", "node_type": "GOAL", "title": "g"},
                {"task_id": "a", "node_type": "ACTION", "title": "a"},
                {"task_id": "END", "node_type": "ACTION", "title": "END"},
            ],
            "edges": [
                {"edge_type": "DEPENDS_ON", "from_task_id": "START", "to_task_id": "a"},
                {"edge_type": "DEPENDS_ON", "from_task_id": "a", "to_task_id": "END"},
            ],
            "requirements": [],
        });
        let (normalized, rewrites) = normalize_plan(&raw);
        assert!(rewrites
            .iter()
            .any(|r| matches!(r, Rewrite::ChainRewrite { dropped_nodes: 2 })));
        let plan = validate_plan(&normalized).unwrap();
        assert_eq!(plan.nodes.len(), 2);
        // The surviving ACTION hangs off the root via a synthesized edge.
        assert!(plan
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::Decompose && e.to_task_id == "a"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in [
            minimal_plan(),
            json!({"tasks": [{"id": "root", "type": "GOAL", "title": "g"},
                             {"id": "x", "type": "ACTION", "title": "x"}],
                   "plan": {"title": "p"}}),
        ] {
            let (once, _) = normalize_plan(&raw);
            let (twice, rewrites) = normalize_plan(&once);
            assert_eq!(once, twice);
            assert!(rewrites.is_empty());
        }
    }

    #[test]
    fn test_duplicate_node_ids_rejected() {
        let raw = json!({
            "plan": {"title": "p"},
            "nodes": [
                {"task_id": "root", "node_type": "GOAL", "title": "g"},
                {"task_id": "root", "node_type": "ACTION", "title": "dup"},
            ],
            "edges": [], "requirements": [],
        });
        let (normalized, _) = normalize_plan(&raw);
        let err = validate_plan(&normalized).unwrap_err();
        assert_eq!(err.path, "$.nodes[1].task_id");
    }

    #[test]
    fn test_bad_node_type_names_path_and_set() {
        let raw = json!({
            "plan": {"title": "p"},
            "nodes": [{"task_id": "root", "node_type": "WIDGET", "title": "g"}],
            "edges": [], "requirements": [],
        });
        let (normalized, _) = normalize_plan(&raw);
        let err = validate_plan(&normalized).unwrap_err();
        assert_eq!(err.path, "$.nodes[0].node_type");
        assert!(err.expected.contains("GOAL"));
        assert!(err.example.contains("node_type"));
    }

    #[test]
    fn test_non_object_array_items_filtered() {
        let raw = json!({
            "plan": {"title": "p"},
            "nodes": [
                "noise",
                {"task_id": "root", "node_type": "GOAL", "title": "g"},
                42,
            ],
            "edges": ["junk"], "requirements": [null],
        });
        let (normalized, _) = normalize_plan(&raw);
        let plan = validate_plan(&normalized).unwrap();
        assert_eq!(plan.nodes.len(), 1);
        assert!(plan.edges.is_empty());
        assert!(plan.requirements.is_empty());
    }

    #[test]
    fn test_requirement_defaults_applied() {
        let raw = json!({
            "plan": {"title": "p"},
            "nodes": [{"task_id": "root", "node_type": "GOAL", "title": "g"},
                      {"task_id": "t", "node_type": "ACTION", "title": "t"}],
            "edges": [],
            "requirements": [{"task_id": "t", "name": "product_spec"}],
        });
        let (normalized, _) = normalize_plan(&raw);
        let plan = validate_plan(&normalized).unwrap();
        let r = &plan.requirements[0];
        assert_eq!(r.kind, RequirementKind::File);
        assert!(r.required);
        assert_eq!(r.min_count, 1);
        assert_eq!(r.source, RequirementSource::Any);
    }

    #[test]
    fn test_missing_schema_version_inserted_wrong_one_rejected() {
        let (normalized, _) = normalize_plan(&minimal_plan());
        assert_eq!(normalized["schema_version"], PLAN_SCHEMA_VERSION);

        let mut wrong = normalized.clone();
        wrong["schema_version"] = json!("plan_json_v2");
        let err = validate_plan(&wrong).unwrap_err();
        assert_eq!(err.path, "$.schema_version");
    }
}
