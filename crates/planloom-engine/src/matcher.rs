use crate::context::EngineContext;
use crate::workspace::sha256_file;
use planloom_core::{
    EventType, Evidence, InputRequirement, Plan, PlanloomResult, RequirementSource, TaskEvent,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Minimum score a file must reach against a requirement to bind.
const BIND_THRESHOLD: i32 = 60;
/// A file binds to at most this many requirements.
const MAX_BINDINGS_PER_FILE: usize = 2;

/// Scans the `inputs/` tree each tick and binds files to requirements.
///
/// Holds the set of files seen this run so FILE_OBSERVED and FILE_REMOVED
/// fire once per change rather than every tick. Evidence itself is
/// idempotent in the store, so re-scanning is always safe.
pub struct Matcher {
    seen: HashMap<PathBuf, String>,
}

impl Matcher {
    /// A matcher with no files seen yet.
    pub fn new() -> Self {
        Self {
            seen: HashMap::new(),
        }
    }

    /// One sweep: observe files, score them, bind evidence.
    pub fn scan(&mut self, ctx: &EngineContext, plan: &Plan) -> PlanloomResult<()> {
        let inputs_root = ctx.workspace.inputs_dir();
        if !inputs_root.exists() {
            return Ok(());
        }
        let requirements = ctx.store.list_requirements(plan.plan_id)?;

        let mut present: HashMap<PathBuf, String> = HashMap::new();
        for entry in WalkDir::new(&inputs_root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path().to_path_buf();
            let hash = sha256_file(&path)?;
            let changed = self.seen.get(&path) != Some(&hash);
            present.insert(path.clone(), hash.clone());

            if changed {
                let rel = relative_to(&path, &inputs_root);
                ctx.emit(&TaskEvent::new(
                    plan.plan_id,
                    None,
                    EventType::FileObserved,
                    json!({
                        "path": rel,
                        "hash": hash,
                        "ext": extension(&path),
                    }),
                ))?;
                self.bind_file(ctx, plan, &requirements, &path, &inputs_root, &hash)?;
            }
        }

        // Deletions are not propagated to evidence; history is preserved.
        for (path, _) in self.seen.iter().filter(|(p, _)| !present.contains_key(*p)) {
            ctx.emit(&TaskEvent::new(
                plan.plan_id,
                None,
                EventType::FileRemoved,
                json!({"path": relative_to(path, &inputs_root)}),
            ))?;
        }
        self.seen = present;
        Ok(())
    }

    fn bind_file(
        &self,
        ctx: &EngineContext,
        plan: &Plan,
        requirements: &[InputRequirement],
        path: &Path,
        inputs_root: &Path,
        hash: &str,
    ) -> PlanloomResult<()> {
        let rel = relative_to(path, inputs_root);
        let mut scored: Vec<(i32, &InputRequirement)> = requirements
            .iter()
            .map(|req| (match_score(req, path, inputs_root), req))
            .filter(|(score, _)| *score >= BIND_THRESHOLD)
            .collect();
        // Highest score first; requirement id settles equal scores so the
        // order is deterministic for a given snapshot.
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.requirement_id.cmp(&b.1.requirement_id))
        });

        if scored.len() >= 2 && scored[0].0 == scored[1].0 {
            ctx.emit(&TaskEvent::new(
                plan.plan_id,
                None,
                EventType::InputConflict,
                json!({
                    "path": rel,
                    "score": scored[0].0,
                    "requirements": [scored[0].1.name, scored[1].1.name],
                    "hint": "rename the file or move it into the matching inputs/<requirement>/ directory",
                }),
            ))?;
            return Ok(());
        }

        for (score, req) in scored.into_iter().take(MAX_BINDINGS_PER_FILE) {
            let evidence = Evidence::file(req.requirement_id, hash, rel.clone());
            if ctx.store.insert_evidence(&evidence)? {
                debug!(requirement = %req.name, path = %rel, score, "evidence bound");
                ctx.emit(&TaskEvent::new(
                    plan.plan_id,
                    Some(req.task_id),
                    EventType::EvidenceAdded,
                    json!({
                        "requirement": req.name,
                        "path": rel,
                        "hash": hash,
                        "score": score,
                    }),
                ))?;
            }
        }
        Ok(())
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic directory + filename heuristics: directory equality
/// dominates, keyword hits are capped, extension and source membership
/// nudge.
pub fn match_score(req: &InputRequirement, path: &Path, inputs_root: &Path) -> i32 {
    let mut score = 0;

    let dir_name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if dir_name == req.name {
        score += 100;
    }

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let mut keyword_points = 0;
    for keyword in &req.filename_keywords {
        if !keyword.is_empty() && filename.contains(&keyword.to_lowercase()) {
            keyword_points += 40;
        }
    }
    score += keyword_points.min(80);

    if !req.allowed_types.is_empty() && req.allowed_types.contains(&extension(path)) {
        score += 10;
    }

    if req.source == RequirementSource::User && path.starts_with(inputs_root) {
        score += 10;
    }

    score
}

/// Among a requirement's evidence files, the one the prompt should carry:
/// names containing `FINAL` win, then the most recently modified.
pub fn choose_context_file(evidence: &[Evidence], workspace_root: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<(bool, std::time::SystemTime, PathBuf)> = evidence
        .iter()
        .filter_map(|e| e.path.as_deref())
        .map(|rel| workspace_root.join("inputs").join(rel))
        .filter(|p| p.exists())
        .map(|p| {
            let is_final = p
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.contains("FINAL"))
                .unwrap_or(false);
            let mtime = p
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            (is_final, mtime, p)
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    candidates.into_iter().next().map(|(_, _, p)| p)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

fn relative_to(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}
