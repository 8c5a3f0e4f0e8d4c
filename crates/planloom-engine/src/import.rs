use planloom_contracts::{normalize_plan, validate_plan, PlanJson};
use planloom_core::{
    EdgeType, InputRequirement, NodeType, Plan, PlanloomError, PlanloomResult, TaskEdge, TaskNode,
};
use planloom_store::Store;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A validated plan materialized into persistent entities, ready for one
/// atomic store write.
#[derive(Debug, Clone)]
pub struct ImportedPlan {
    /// The plan row.
    pub plan: Plan,
    /// All nodes, PENDING.
    pub nodes: Vec<TaskNode>,
    /// All edges.
    pub edges: Vec<TaskEdge>,
    /// All requirements.
    pub requirements: Vec<InputRequirement>,
}

fn invalid(detail: impl std::fmt::Display) -> PlanloomError {
    PlanloomError::Engine(format!("PLAN_INVALID: {detail}"))
}

/// Turn a validated `plan_json_v1` into entities, remapping the contract's
/// local string ids onto fresh ids and enforcing the graph invariants:
/// single GOAL root, every node reachable from it along DECOMPOSE, no
/// DEPENDS_ON cycle, no orphan edge, CHECK targets resolve.
pub fn materialize_plan(plan_json: &PlanJson) -> PlanloomResult<ImportedPlan> {
    let mut id_map: HashMap<&str, Uuid> = HashMap::new();
    for node in &plan_json.nodes {
        id_map.insert(node.task_id.as_str(), Uuid::new_v4());
    }

    // The root is the unique GOAL nothing decomposes into.
    let decompose_targets: HashSet<&str> = plan_json
        .edges
        .iter()
        .filter(|e| e.edge_type == EdgeType::Decompose)
        .map(|e| e.to_task_id.as_str())
        .collect();
    let roots: Vec<&str> = plan_json
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Goal && !decompose_targets.contains(n.task_id.as_str()))
        .map(|n| n.task_id.as_str())
        .collect();
    let root_local = match roots.as_slice() {
        [root] => *root,
        [] => return Err(invalid("no GOAL root node")),
        _ => return Err(invalid(format!("{} competing GOAL roots", roots.len()))),
    };
    let root_task_id = id_map[root_local];

    let mut plan = Plan::new(
        plan_json.plan.title.clone(),
        plan_json
            .plan
            .owner_agent
            .clone()
            .unwrap_or_else(|| "xiaobo".to_string()),
        root_task_id,
    );
    plan.priority = plan_json.plan.priority;

    let mut nodes = Vec::with_capacity(plan_json.nodes.len());
    for spec in &plan_json.nodes {
        let review_target = spec
            .review_target_task_id
            .as_deref()
            .map(|local| {
                id_map
                    .get(local)
                    .copied()
                    .ok_or_else(|| invalid(format!("CHECK targets unknown task '{local}'")))
            })
            .transpose()?;
        if review_target.is_some() && spec.node_type != NodeType::Check {
            return Err(invalid(format!(
                "review_target_task_id on non-CHECK node '{}'",
                spec.task_id
            )));
        }
        let mut node = TaskNode::new(plan.plan_id, spec.node_type, spec.title.clone())
            .with_priority(spec.priority);
        node.task_id = id_map[spec.task_id.as_str()];
        node.owner_agent = spec.owner_agent.clone().unwrap_or_default();
        node.estimated_person_days = spec.estimated_person_days;
        node.deliverable_spec = spec.deliverable_spec.clone();
        node.acceptance_criteria = spec.acceptance_criteria.clone();
        node.review_target_task_id = review_target;
        nodes.push(node);
    }

    let mut edges = Vec::with_capacity(plan_json.edges.len());
    for spec in &plan_json.edges {
        let from = id_map
            .get(spec.from_task_id.as_str())
            .copied()
            .ok_or_else(|| invalid(format!("edge from unknown task '{}'", spec.from_task_id)))?;
        let to = id_map
            .get(spec.to_task_id.as_str())
            .copied()
            .ok_or_else(|| invalid(format!("edge to unknown task '{}'", spec.to_task_id)))?;
        let mut edge = TaskEdge::new(plan.plan_id, spec.edge_type, from, to);
        if spec.edge_type == EdgeType::Decompose {
            edge.and_or = Some(spec.and_or.unwrap_or(planloom_core::AndOr::And));
        } else {
            edge.and_or = None;
        }
        edge.group_id = spec.group_id.clone();
        edges.push(edge);
    }

    let mut requirements = Vec::with_capacity(plan_json.requirements.len());
    for spec in &plan_json.requirements {
        let task_id = id_map
            .get(spec.task_id.as_str())
            .copied()
            .ok_or_else(|| {
                invalid(format!("requirement on unknown task '{}'", spec.task_id))
            })?;
        let mut req = InputRequirement::new(plan.plan_id, task_id, spec.name.clone());
        req.kind = spec.kind;
        req.required = spec.required;
        req.min_count = spec.min_count;
        req.allowed_types = spec.allowed_types.clone();
        req.source = spec.source;
        req.filename_keywords = spec.filename_keywords.clone();
        requirements.push(req);
    }

    check_decompose_reachability(root_task_id, &nodes, &edges)?;
    check_depends_acyclic(&edges)?;

    Ok(ImportedPlan {
        plan,
        nodes,
        edges,
        requirements,
    })
}

/// Every non-root node must hang off the root along DECOMPOSE edges.
fn check_decompose_reachability(
    root: Uuid,
    nodes: &[TaskNode],
    edges: &[TaskEdge],
) -> PlanloomResult<()> {
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in edges.iter().filter(|e| e.edge_type == EdgeType::Decompose) {
        children.entry(edge.from_task_id).or_default().push(edge.to_task_id);
    }
    let mut reachable = HashSet::from([root]);
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        for child in children.get(&id).into_iter().flatten() {
            if reachable.insert(*child) {
                stack.push(*child);
            }
        }
    }
    let orphans = nodes
        .iter()
        .filter(|n| !reachable.contains(&n.task_id))
        .count();
    if orphans > 0 {
        return Err(invalid(format!(
            "{orphans} node(s) unreachable from the root along DECOMPOSE"
        )));
    }
    Ok(())
}

/// The graph restricted to DEPENDS_ON must be acyclic.
fn check_depends_acyclic(edges: &[TaskEdge]) -> PlanloomResult<()> {
    let mut next: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in edges.iter().filter(|e| e.edge_type == EdgeType::DependsOn) {
        next.entry(edge.from_task_id).or_default().push(edge.to_task_id);
    }

    // 0 = unvisited, 1 = on the stack, 2 = done.
    fn dfs(id: Uuid, next: &HashMap<Uuid, Vec<Uuid>>, state: &mut HashMap<Uuid, u8>) -> bool {
        match state.get(&id) {
            Some(1) => return true,
            Some(2) => return false,
            _ => {}
        }
        state.insert(id, 1);
        for dep in next.get(&id).into_iter().flatten() {
            if dfs(*dep, next, state) {
                return true;
            }
        }
        state.insert(id, 2);
        false
    }

    let mut state = HashMap::new();
    for id in next.keys() {
        if dfs(*id, &next, &mut state) {
            return Err(invalid("cycle in DEPENDS_ON edges"));
        }
    }
    Ok(())
}

/// Normalize, validate, materialize, and atomically store a raw plan value
/// (a plan file read from disk, or generator output).
pub fn import_plan_value(store: &Store, raw: &serde_json::Value) -> PlanloomResult<ImportedPlan> {
    let (normalized, _rewrites) = normalize_plan(raw);
    let plan_json =
        validate_plan(&normalized).map_err(|e| invalid(format!("contract violation {e}")))?;
    let imported = materialize_plan(&plan_json)?;
    store.import_plan(
        &imported.plan,
        &imported.nodes,
        &imported.edges,
        &imported.requirements,
    )?;
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan_value() -> serde_json::Value {
        json!({
            "plan": {"title": "2048 game"},
            "nodes": [
                {"task_id": "root", "node_type": "GOAL", "title": "deliver"},
                {"task_id": "a", "node_type": "ACTION", "title": "build", "priority": 5},
                {"task_id": "b", "node_type": "ACTION", "title": "document"},
            ],
            "edges": [
                {"edge_type": "DECOMPOSE", "from_task_id": "root", "to_task_id": "a"},
                {"edge_type": "DECOMPOSE", "from_task_id": "root", "to_task_id": "b"},
                {"edge_type": "DEPENDS_ON", "from_task_id": "b", "to_task_id": "a"},
            ],
            "requirements": [
                {"task_id": "a", "name": "product_spec"},
            ],
        })
    }

    fn materialized() -> ImportedPlan {
        let (normalized, _) = normalize_plan(&plan_value());
        materialize_plan(&validate_plan(&normalized).unwrap()).unwrap()
    }

    #[test]
    fn test_ids_are_remapped_consistently() {
        let imported = materialized();
        assert_eq!(imported.nodes.len(), 3);
        let root = imported
            .nodes
            .iter()
            .find(|n| n.node_type == NodeType::Goal)
            .unwrap();
        assert_eq!(imported.plan.root_task_id, root.task_id);
        // The DEPENDS_ON edge points between the two remapped ACTION ids.
        let dep = imported
            .edges
            .iter()
            .find(|e| e.edge_type == EdgeType::DependsOn)
            .unwrap();
        let action_ids: HashSet<Uuid> = imported
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Action)
            .map(|n| n.task_id)
            .collect();
        assert!(action_ids.contains(&dep.from_task_id));
        assert!(action_ids.contains(&dep.to_task_id));
        // The requirement followed its task.
        let build = imported.nodes.iter().find(|n| n.title == "build").unwrap();
        assert_eq!(imported.requirements[0].task_id, build.task_id);
    }

    #[test]
    fn test_missing_root_rejected() {
        let mut v = plan_value();
        v["nodes"][0]["node_type"] = json!("ACTION");
        let (normalized, _) = normalize_plan(&v);
        let plan_json = validate_plan(&normalized).unwrap();
        let err = materialize_plan(&plan_json).unwrap_err();
        assert!(err.to_string().contains("PLAN_INVALID"));
    }

    #[test]
    fn test_depends_cycle_rejected() {
        let mut v = plan_value();
        v["edges"]
            .as_array_mut()
            .unwrap()
            .push(json!({"edge_type": "DEPENDS_ON", "from_task_id": "a", "to_task_id": "b"}));
        let (normalized, _) = normalize_plan(&v);
        let plan_json = validate_plan(&normalized).unwrap();
        let err = materialize_plan(&plan_json).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_orphan_edge_rejected() {
        let mut v = plan_value();
        v["edges"]
            .as_array_mut()
            .unwrap()
            .push(json!({"edge_type": "DEPENDS_ON", "from_task_id": "a", "to_task_id": "ghost"}));
        let (normalized, _) = normalize_plan(&v);
        let plan_json = validate_plan(&normalized).unwrap();
        let err = materialize_plan(&plan_json).unwrap_err();
        assert!(err.to_string().contains("unknown task"));
    }

    #[test]
    fn test_import_into_store() {
        let store = planloom_store::Store::open_in_memory().unwrap();
        let imported = import_plan_value(&store, &plan_value()).unwrap();
        let nodes = store.list_nodes(imported.plan.plan_id).unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(nodes
            .iter()
            .all(|n| n.status == planloom_core::TaskStatus::Pending));
        assert_eq!(store.list_requirements(imported.plan.plan_id).unwrap().len(), 1);
    }
}
