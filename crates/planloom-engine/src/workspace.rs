use planloom_core::PlanloomResult;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The on-disk workspace the engine works in.
///
/// Layout: `inputs/<requirement>/…` for user evidence,
/// `artifacts/<task>/<artifact>/…` for versioned outputs,
/// `reviews/<check>/<review>/…` for verdicts, `required_docs/<task>.md` for
/// missing-input notes, `deliverables/<plan>/…` for exports, and
/// `plans/<plan>.json` for approved plan files. The filesystem is partitioned
/// by task id; no two tasks write into each other's directories.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// A workspace rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default database location inside the workspace.
    pub fn db_path(&self) -> PathBuf {
        self.root.join("planloom.db")
    }

    /// Where users drop evidence files.
    pub fn inputs_dir(&self) -> PathBuf {
        self.root.join("inputs")
    }

    /// Directory of one artifact version.
    pub fn artifact_dir(&self, task_id: Uuid, artifact_id: Uuid) -> PathBuf {
        self.root
            .join("artifacts")
            .join(task_id.to_string())
            .join(artifact_id.to_string())
    }

    /// The human-readable missing-input note for a task.
    pub fn required_docs_path(&self, task_id: Uuid) -> PathBuf {
        self.root
            .join("required_docs")
            .join(format!("{task_id}.md"))
    }

    /// Directory holding one review's verdict files.
    pub fn review_dir(&self, check_task_id: Uuid, review_id: Uuid) -> PathBuf {
        self.root
            .join("reviews")
            .join(check_task_id.to_string())
            .join(review_id.to_string())
    }

    /// Directory for a task's review-level notes (attempt exhaustion).
    pub fn review_task_dir(&self, task_id: Uuid) -> PathBuf {
        self.root.join("reviews").join(task_id.to_string())
    }

    /// Where an approved plan file is written.
    pub fn plan_file(&self, plan_id: Uuid) -> PathBuf {
        self.root.join("plans").join(format!("{plan_id}.json"))
    }

    /// Export root for one plan.
    pub fn deliverables_dir(&self, plan_id: Uuid) -> PathBuf {
        self.root.join("deliverables").join(plan_id.to_string())
    }

    /// Create the fixed directories the engine expects.
    pub fn ensure_layout(&self) -> PlanloomResult<()> {
        for dir in [
            self.root.clone(),
            self.inputs_dir(),
            self.root.join("artifacts"),
            self.root.join("reviews"),
            self.root.join("required_docs"),
            self.root.join("deliverables"),
            self.root.join("plans"),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// sha256 of a byte slice, hex-encoded.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// sha256 of a file's contents, hex-encoded.
pub fn sha256_file(path: &Path) -> PlanloomResult<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_bytes(&bytes))
}

/// Filesystem-safe slug of a task title: lowercase alphanumerics and dashes.
pub fn task_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug.chars().take(40).collect()
    }
}

/// First eight hex chars of an id, for directory names.
pub fn short_id(id: Uuid) -> String {
    id.simple().to_string().chars().take(8).collect()
}
