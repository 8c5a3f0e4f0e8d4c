//! Deliverable export: copy approved artifact versions into a reviewable
//! bundle with a manifest, a single-entrypoint descriptor, and plan metadata.

use crate::context::EngineContext;
use crate::workspace::{sha256_file, short_id, task_slug};
use chrono::Utc;
use planloom_core::{ActionRequired, NodeType, Plan, PlanloomResult};
use serde_json::json;
use tracing::info;

/// What the export produced.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    /// Tasks with an exported deliverable.
    pub exported_tasks: usize,
    /// Tasks skipped for lack of an approved artifact.
    pub skipped_tasks: usize,
    /// Where the bundle landed.
    pub bundle_dir: String,
}

/// Export one plan's deliverables under `deliverables/<plan_id>/`.
///
/// Approved versions only by default; `include_unapproved` falls back to the
/// active artifact for tasks that never passed review.
pub fn export_deliverables(
    ctx: &EngineContext,
    plan: &Plan,
    include_unapproved: bool,
) -> PlanloomResult<ExportSummary> {
    let root = ctx.workspace.deliverables_dir(plan.plan_id);
    let bundle = root.join("bundle");
    std::fs::create_dir_all(&bundle)?;

    let nodes = ctx.store.list_nodes(plan.plan_id)?;
    let mut items = Vec::new();
    let mut exported = 0usize;
    let mut skipped = 0usize;
    let mut entry: Option<serde_json::Value> = None;

    for node in nodes.iter().filter(|n| n.node_type == NodeType::Action) {
        let artifact_id = match (node.approved_artifact_id, include_unapproved) {
            (Some(id), _) => id,
            (None, true) => match node.active_artifact_id {
                Some(id) => id,
                None => {
                    skipped += 1;
                    continue;
                }
            },
            (None, false) => {
                skipped += 1;
                continue;
            }
        };
        let Some(artifact) = ctx.store.get_artifact(artifact_id)? else {
            skipped += 1;
            continue;
        };

        let task_dir_name = format!("{}_{}", task_slug(&node.title), short_id(node.task_id));
        let task_dir = bundle.join(&task_dir_name);
        std::fs::create_dir_all(&task_dir)?;
        let dest = task_dir.join(&artifact.name);
        std::fs::copy(&artifact.path, &dest)?;
        let sha256 = sha256_file(&dest)?;

        // The approving review for the exported version, if one exists.
        let review = ctx
            .store
            .list_reviews(node.task_id)?
            .into_iter()
            .rev()
            .find(|r| {
                r.reviewed_artifact_id == Some(artifact_id)
                    && r.action_required == ActionRequired::Approve
            });
        let check_task_id = ctx
            .store
            .list_nodes(plan.plan_id)?
            .into_iter()
            .find(|n| {
                n.node_type == NodeType::Check && n.review_target_task_id == Some(node.task_id)
            })
            .map(|n| n.task_id)
            .unwrap_or(node.task_id);

        // The entrypoint descriptor prefers an HTML deliverable, else the
        // first exported item.
        let dest_rel = format!("bundle/{}/{}", task_dir_name, artifact.name);
        if entry.is_none() || artifact.format == planloom_core::ArtifactFormat::Html {
            entry = Some(json!({"task_id": node.task_id, "path": dest_rel}));
        }

        items.push(json!({
            "task_id": node.task_id,
            "task_title": node.title,
            "deliverable": {
                "format": artifact.format.as_str(),
                "filename": artifact.name,
                "single_file": true,
                "bundle_mode": "per_task_dir",
            },
            "approved_artifact_id": node.approved_artifact_id,
            "files": [{
                "dest_path": dest_rel,
                "source_path": artifact.path,
                "sha256": sha256,
            }],
            "review": review.map(|r| json!({
                "check_task_id": check_task_id,
                "review_id": r.review_id,
                "verdict": r.action_required.as_str(),
                "score": r.total_score,
            })),
        }));
        exported += 1;
    }

    let manifest = json!({
        "plan_id": plan.plan_id,
        "title": plan.title,
        "generated_at": Utc::now().to_rfc3339(),
        "approved_only": !include_unapproved,
        "items": items,
    });
    std::fs::write(
        root.join("manifest.json"),
        serde_json::to_string_pretty(&manifest)?,
    )?;
    std::fs::write(
        root.join("final.json"),
        serde_json::to_string_pretty(&json!({
            "plan_id": plan.plan_id,
            "entry": entry,
        }))?,
    )?;
    std::fs::write(
        root.join("plan_meta.json"),
        serde_json::to_string_pretty(&json!({
            "plan_id": plan.plan_id,
            "title": plan.title,
            "root_task_id": plan.root_task_id,
            "created_at": plan.created_at.to_rfc3339(),
            "approved_at": plan.approved_at.map(|t| t.to_rfc3339()),
            "tasks": nodes.iter().map(|n| json!({
                "task_id": n.task_id,
                "title": n.title,
                "node_type": n.node_type.as_str(),
                "status": n.status.as_str(),
            })).collect::<Vec<_>>(),
        }))?,
    )?;

    info!(
        plan_id = %plan.plan_id,
        exported,
        skipped,
        "deliverables exported"
    );
    Ok(ExportSummary {
        exported_tasks: exported,
        skipped_tasks: skipped,
        bundle_dir: bundle.to_string_lossy().to_string(),
    })
}
