//! Preflight invariants and structural self-check. Reports, never mutates.

use planloom_core::{
    Config, EdgeType, NodeType, Plan, PlanloomResult, TaskStatus, WorkflowMode,
};
use planloom_store::{expected_migrations, Store};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// One named check with a machine-readable code.
#[derive(Debug, Clone)]
pub struct DoctorCheck {
    /// Stable code, e.g. `DB_MIGRATIONS_CURRENT`.
    pub code: String,
    /// Whether the check passed.
    pub ok: bool,
    /// What was found (and, on failure, what to do about it).
    pub detail: String,
}

/// The full doctor report.
#[derive(Debug, Clone)]
pub struct DoctorReport {
    /// All checks, in execution order.
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    /// PASS iff every check passed.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    /// The failing checks only.
    pub fn failures(&self) -> Vec<&DoctorCheck> {
        self.checks.iter().filter(|c| !c.ok).collect()
    }
}

impl std::fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", if self.passed() { "PASS" } else { "FAIL" })?;
        for check in &self.checks {
            writeln!(
                f,
                "  [{}] {} — {}",
                if check.ok { "ok" } else { "FAIL" },
                check.code,
                check.detail
            )?;
        }
        Ok(())
    }
}

const REQUIRED_TABLES: &[&str] = &[
    "plans",
    "task_nodes",
    "task_edges",
    "input_requirements",
    "evidence",
    "artifacts",
    "reviews",
    "skill_runs",
    "task_events",
    "llm_calls",
];

const V2_NODE_COLUMNS: &[&str] = &[
    "estimated_person_days",
    "deliverable_spec",
    "acceptance_criteria",
    "review_target_task_id",
];

/// Run the database checks, plus the plan structure checks when a plan is
/// given. Strong-workflow mode adds the ACTION↔CHECK pairing and sizing
/// checks.
pub fn run_doctor(
    store: &Store,
    config: &Config,
    plan: Option<&Plan>,
) -> PlanloomResult<DoctorReport> {
    let mut checks = Vec::new();

    let applied = store.applied_migrations()?;
    let expected: Vec<String> = expected_migrations().iter().map(|s| s.to_string()).collect();
    checks.push(DoctorCheck {
        code: "DB_MIGRATIONS_CURRENT".to_string(),
        ok: applied == expected,
        detail: if applied == expected {
            format!("{} migrations applied", applied.len())
        } else {
            format!("applied {applied:?}, expected {expected:?}; run `planloom repair-db`")
        },
    });

    let fk = store.foreign_keys_enabled()?;
    checks.push(DoctorCheck {
        code: "DB_FOREIGN_KEYS_ON".to_string(),
        ok: fk,
        detail: if fk {
            "pragma foreign_keys = 1".to_string()
        } else {
            "foreign keys are off; reopen the store".to_string()
        },
    });

    for table in REQUIRED_TABLES {
        let exists = store.table_exists(table)?;
        checks.push(DoctorCheck {
            code: format!("DB_TABLE_{}", table.to_uppercase()),
            ok: exists,
            detail: if exists {
                "present".to_string()
            } else {
                format!("table {table} missing; run `planloom repair-db`")
            },
        });
    }

    let node_columns = store.table_columns("task_nodes")?;
    let missing: Vec<&&str> = V2_NODE_COLUMNS
        .iter()
        .filter(|c| !node_columns.iter().any(|have| have == *c))
        .collect();
    checks.push(DoctorCheck {
        code: "DB_NODE_COLUMNS_V2".to_string(),
        ok: missing.is_empty(),
        detail: if missing.is_empty() {
            "v2 columns present".to_string()
        } else {
            format!("missing columns {missing:?}; run `planloom repair-db`")
        },
    });

    if let Some(plan) = plan {
        plan_checks(store, config, plan, &mut checks)?;
    }

    Ok(DoctorReport { checks })
}

fn plan_checks(
    store: &Store,
    config: &Config,
    plan: &Plan,
    checks: &mut Vec<DoctorCheck>,
) -> PlanloomResult<()> {
    let nodes = store.list_nodes(plan.plan_id)?;
    let edges = store.list_edges(plan.plan_id)?;

    let root = nodes.iter().find(|n| n.task_id == plan.root_task_id);
    checks.push(DoctorCheck {
        code: "PLAN_ROOT_IS_GOAL".to_string(),
        ok: root.map(|n| n.node_type == NodeType::Goal).unwrap_or(false),
        detail: match root {
            Some(n) if n.node_type == NodeType::Goal => format!("root {}", n.task_id),
            Some(n) => format!("root {} is {}, not GOAL", n.task_id, n.node_type),
            None => "root task missing; regenerate the plan".to_string(),
        },
    });

    let actions = nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Action)
        .count();
    checks.push(DoctorCheck {
        code: "PLAN_HAS_ACTION".to_string(),
        ok: actions >= 1,
        detail: format!("{actions} ACTION node(s)"),
    });

    let decompose = edges
        .iter()
        .filter(|e| e.edge_type == EdgeType::Decompose)
        .count();
    checks.push(DoctorCheck {
        code: "PLAN_DECOMPOSE_EDGES".to_string(),
        ok: nodes.len() <= 1 || decompose >= 1,
        detail: format!("{decompose} DECOMPOSE edge(s) for {} node(s)", nodes.len()),
    });

    // Reachability from the root along DECOMPOSE.
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for e in edges.iter().filter(|e| e.edge_type == EdgeType::Decompose) {
        children.entry(e.from_task_id).or_default().push(e.to_task_id);
    }
    let mut reachable: HashSet<Uuid> = HashSet::from([plan.root_task_id]);
    let mut stack = vec![plan.root_task_id];
    while let Some(id) = stack.pop() {
        for child in children.get(&id).into_iter().flatten() {
            if reachable.insert(*child) {
                stack.push(*child);
            }
        }
    }
    let orphans: Vec<String> = nodes
        .iter()
        .filter(|n| !reachable.contains(&n.task_id))
        .map(|n| n.title.clone())
        .collect();
    checks.push(DoctorCheck {
        code: "PLAN_NO_ORPHANS".to_string(),
        ok: orphans.is_empty(),
        detail: if orphans.is_empty() {
            "all nodes reachable from the root".to_string()
        } else {
            format!("unreachable: {orphans:?}")
        },
    });

    // Status × node type legality.
    let illegal: Vec<String> = nodes
        .iter()
        .filter(|n| {
            (n.status == TaskStatus::ReadyToCheck && n.node_type != NodeType::Action)
                || (n.status == TaskStatus::Done
                    && n.node_type == NodeType::Action
                    && n.approved_artifact_id.is_none())
        })
        .map(|n| format!("{} ({} {})", n.title, n.node_type, n.status))
        .collect();
    checks.push(DoctorCheck {
        code: "PLAN_STATUS_LEGAL".to_string(),
        ok: illegal.is_empty(),
        detail: if illegal.is_empty() {
            "status × node_type legal everywhere".to_string()
        } else {
            format!("illegal: {illegal:?}")
        },
    });

    if config.workflow_mode == WorkflowMode::V2 {
        v2_checks(config, &nodes, checks);
    }
    Ok(())
}

fn v2_checks(
    config: &Config,
    nodes: &[planloom_core::TaskNode],
    checks: &mut Vec<DoctorCheck>,
) {
    let action_ids: HashSet<Uuid> = nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Action)
        .map(|n| n.task_id)
        .collect();
    let mut checked_actions: HashMap<Uuid, u32> = HashMap::new();
    let mut bad_checks = 0usize;
    for check in nodes.iter().filter(|n| n.node_type == NodeType::Check) {
        match check.review_target_task_id {
            Some(target) if action_ids.contains(&target) => {
                *checked_actions.entry(target).or_insert(0) += 1;
            }
            _ => bad_checks += 1,
        }
    }
    let pairing_ok = bad_checks == 0
        && action_ids
            .iter()
            .all(|a| checked_actions.get(a) == Some(&1));
    checks.push(DoctorCheck {
        code: "PLAN_CHECK_PAIRING".to_string(),
        ok: pairing_ok,
        detail: if pairing_ok {
            "every ACTION has exactly one CHECK".to_string()
        } else {
            format!(
                "{bad_checks} dangling CHECK(s); {} of {} ACTION(s) correctly paired",
                checked_actions.values().filter(|c| **c == 1).count(),
                action_ids.len()
            )
        },
    });

    let unspecified: Vec<String> = nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Action)
        .filter(|n| {
            n.deliverable_spec.is_none()
                || n.acceptance_criteria.is_none()
                || n.estimated_person_days.is_none()
        })
        .map(|n| n.title.clone())
        .collect();
    checks.push(DoctorCheck {
        code: "PLAN_DELIVERABLE_SPECS".to_string(),
        ok: unspecified.is_empty(),
        detail: if unspecified.is_empty() {
            "all ACTIONs carry spec, criteria, and estimate".to_string()
        } else {
            format!("missing spec/criteria/estimate: {unspecified:?}")
        },
    });

    let oversized: Vec<String> = nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Action)
        .filter(|n| {
            n.estimated_person_days
                .map(|d| d > config.one_shot_threshold_person_days)
                .unwrap_or(false)
        })
        .map(|n| n.title.clone())
        .collect();
    checks.push(DoctorCheck {
        code: "PLAN_ONE_SHOT_SIZE".to_string(),
        ok: oversized.is_empty(),
        detail: if oversized.is_empty() {
            format!(
                "all leaf ACTIONs within {} person-days",
                config.one_shot_threshold_person_days
            )
        } else {
            format!(
                "over the {}-day one-shot threshold: {oversized:?}; decompose further or raise one_shot_threshold_person_days",
                config.one_shot_threshold_person_days
            )
        },
    });
}
