use crate::migrations;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use planloom_core::{
    ActionRequired, AgentKind, AndOr, Artifact, ArtifactFormat, BlockedReason, CallScope,
    EdgeType, ErrorCode, Evidence, InputRequirement, LlmCall, LlmCallMeta, NodeType, Plan,
    PlanloomError, PlanloomResult, RequirementKind, RequirementSource, Review, SkillRun,
    SkillRunStatus, TaskEdge, TaskEvent, TaskNode, TaskStatus,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Handle to the embedded database.
///
/// Cheap to clone; all clones share one connection behind a mutex. The engine
/// run loop is the only writer, so lock contention is not a concern.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

fn db_err(e: rusqlite::Error) -> PlanloomError {
    PlanloomError::Store(e.to_string())
}

fn conv_err(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
}

fn bad_enum(what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        format!("unknown {what}: {value}").into(),
    )
}

fn parse_uuid(s: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&s).map_err(conv_err)
}

fn parse_opt_uuid(s: Option<String>) -> rusqlite::Result<Option<Uuid>> {
    s.map(parse_uuid).transpose()
}

fn parse_ts(s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(conv_err)
}

fn parse_json(s: String) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(&s).map_err(conv_err)
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

// Structural upserts. Plain INSERT OR REPLACE would delete-then-insert and
// trip the enabled foreign keys on re-import, so these spell the update out.
const PLAN_UPSERT: &str = "INSERT INTO plans
     (plan_id, title, owner_agent, root_task_id, created_at, deadline, priority, approved_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(plan_id) DO UPDATE SET
       title = excluded.title, owner_agent = excluded.owner_agent,
       root_task_id = excluded.root_task_id, created_at = excluded.created_at,
       deadline = excluded.deadline, priority = excluded.priority,
       approved_at = excluded.approved_at";

const NODE_UPSERT: &str = "INSERT INTO task_nodes
     (task_id, plan_id, node_type, title, owner_agent, priority, status,
      blocked_reason, attempt_count, active_artifact_id, approved_artifact_id,
      created_at, estimated_person_days, deliverable_spec, acceptance_criteria,
      review_target_task_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
     ON CONFLICT(task_id) DO UPDATE SET
       plan_id = excluded.plan_id, node_type = excluded.node_type,
       title = excluded.title, owner_agent = excluded.owner_agent,
       priority = excluded.priority, status = excluded.status,
       blocked_reason = excluded.blocked_reason,
       attempt_count = excluded.attempt_count,
       active_artifact_id = excluded.active_artifact_id,
       approved_artifact_id = excluded.approved_artifact_id,
       created_at = excluded.created_at,
       estimated_person_days = excluded.estimated_person_days,
       deliverable_spec = excluded.deliverable_spec,
       acceptance_criteria = excluded.acceptance_criteria,
       review_target_task_id = excluded.review_target_task_id";

const EDGE_UPSERT: &str = "INSERT INTO task_edges
     (edge_id, plan_id, edge_type, from_task_id, to_task_id, and_or, group_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT(edge_id) DO UPDATE SET
       plan_id = excluded.plan_id, edge_type = excluded.edge_type,
       from_task_id = excluded.from_task_id, to_task_id = excluded.to_task_id,
       and_or = excluded.and_or, group_id = excluded.group_id";

const REQUIREMENT_UPSERT: &str = "INSERT INTO input_requirements
     (requirement_id, plan_id, task_id, name, kind, required, min_count,
      allowed_types, source, filename_keywords)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
     ON CONFLICT(requirement_id) DO UPDATE SET
       plan_id = excluded.plan_id, task_id = excluded.task_id,
       name = excluded.name, kind = excluded.kind,
       required = excluded.required, min_count = excluded.min_count,
       allowed_types = excluded.allowed_types, source = excluded.source,
       filename_keywords = excluded.filename_keywords";

impl Store {
    /// Open (or create) the database at `path` and apply missing migrations.
    ///
    /// Refuses to return a handle if any migration fails, naming the file.
    pub fn open(path: impl AsRef<Path>) -> PlanloomResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path).map_err(db_err)?;
        Self::init(conn, path)
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> PlanloomResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(mut conn: Connection, path: PathBuf) -> PlanloomResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(db_err)?;
        migrations::apply_all(&mut conn)
            .map_err(|e| PlanloomError::Store(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Where the database lives on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> PlanloomResult<T> {
        let conn = self.conn.lock();
        f(&conn).map_err(db_err)
    }

    fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T>,
    ) -> PlanloomResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let out = f(&tx).map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(out)
    }

    // --- Plans ---

    /// Upsert a plan row (stub or final).
    pub fn insert_plan(&self, plan: &Plan) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                PLAN_UPSERT,
                params![
                    plan.plan_id.to_string(),
                    plan.title,
                    plan.owner_agent,
                    plan.root_task_id.to_string(),
                    ts(plan.created_at),
                    plan.deadline.map(ts),
                    plan.priority,
                    plan.approved_at.map(ts),
                ],
            )?;
            Ok(())
        })
    }

    /// Remove an unapproved stub plan row. Refuses (via foreign keys) once
    /// nodes reference it.
    pub fn delete_plan(&self, plan_id: Uuid) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM plans WHERE plan_id = ?1 AND approved_at IS NULL",
                params![plan_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Stamp a plan as approved now.
    pub fn approve_plan(&self, plan_id: Uuid) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE plans SET approved_at = ?1 WHERE plan_id = ?2",
                params![ts(Utc::now()), plan_id.to_string()],
            )?;
            Ok(())
        })
    }

    fn plan_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Plan> {
        Ok(Plan {
            plan_id: parse_uuid(row.get(0)?)?,
            title: row.get(1)?,
            owner_agent: row.get(2)?,
            root_task_id: parse_uuid(row.get(3)?)?,
            created_at: parse_ts(row.get(4)?)?,
            deadline: row.get::<_, Option<String>>(5)?.map(parse_ts).transpose()?,
            priority: row.get(6)?,
            approved_at: row.get::<_, Option<String>>(7)?.map(parse_ts).transpose()?,
        })
    }

    const PLAN_COLS: &'static str =
        "plan_id, title, owner_agent, root_task_id, created_at, deadline, priority, approved_at";

    /// Fetch a plan by id.
    pub fn get_plan(&self, plan_id: Uuid) -> PlanloomResult<Option<Plan>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM plans WHERE plan_id = ?1", Self::PLAN_COLS),
                params![plan_id.to_string()],
                Self::plan_from_row,
            )
            .optional()
        })
    }

    /// The most recently created plan, if any.
    pub fn latest_plan(&self) -> PlanloomResult<Option<Plan>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM plans ORDER BY created_at DESC, plan_id DESC LIMIT 1",
                    Self::PLAN_COLS
                ),
                [],
                Self::plan_from_row,
            )
            .optional()
        })
    }

    /// Write a whole validated plan (plan, nodes, edges, requirements) in one
    /// transaction. Any constraint violation aborts the lot.
    pub fn import_plan(
        &self,
        plan: &Plan,
        nodes: &[TaskNode],
        edges: &[TaskEdge],
        requirements: &[InputRequirement],
    ) -> PlanloomResult<()> {
        self.with_tx(|tx| {
            tx.execute(
                PLAN_UPSERT,
                params![
                    plan.plan_id.to_string(),
                    plan.title,
                    plan.owner_agent,
                    plan.root_task_id.to_string(),
                    ts(plan.created_at),
                    plan.deadline.map(ts),
                    plan.priority,
                    plan.approved_at.map(ts),
                ],
            )?;
            for node in nodes {
                tx.execute(
                    NODE_UPSERT,
                    params![
                        node.task_id.to_string(),
                        node.plan_id.to_string(),
                        node.node_type.as_str(),
                        node.title,
                        node.owner_agent,
                        node.priority,
                        node.status.as_str(),
                        node.blocked_reason.map(|r| r.as_str()),
                        node.attempt_count,
                        node.active_artifact_id.map(|u| u.to_string()),
                        node.approved_artifact_id.map(|u| u.to_string()),
                        ts(node.created_at),
                        node.estimated_person_days,
                        node.deliverable_spec,
                        node.acceptance_criteria,
                        node.review_target_task_id.map(|u| u.to_string()),
                    ],
                )?;
            }
            for edge in edges {
                tx.execute(
                    EDGE_UPSERT,
                    params![
                        edge.edge_id.to_string(),
                        edge.plan_id.to_string(),
                        edge.edge_type.as_str(),
                        edge.from_task_id.to_string(),
                        edge.to_task_id.to_string(),
                        edge.and_or.map(|a| a.as_str()),
                        edge.group_id,
                    ],
                )?;
            }
            for req in requirements {
                tx.execute(
                    REQUIREMENT_UPSERT,
                    params![
                        req.requirement_id.to_string(),
                        req.plan_id.to_string(),
                        req.task_id.to_string(),
                        req.name,
                        req.kind.as_str(),
                        req.required,
                        req.min_count,
                        serde_json::to_string(&req.allowed_types).map_err(conv_err)?,
                        req.source.as_str(),
                        serde_json::to_string(&req.filename_keywords).map_err(conv_err)?,
                    ],
                )?;
            }
            Ok(())
        })
    }

    // --- Task nodes ---

    const NODE_COLS: &'static str = "task_id, plan_id, node_type, title, owner_agent, priority, \
         status, blocked_reason, attempt_count, active_artifact_id, approved_artifact_id, \
         created_at, estimated_person_days, deliverable_spec, acceptance_criteria, \
         review_target_task_id";

    fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskNode> {
        let node_type: String = row.get(2)?;
        let status: String = row.get(6)?;
        let blocked: Option<String> = row.get(7)?;
        Ok(TaskNode {
            task_id: parse_uuid(row.get(0)?)?,
            plan_id: parse_uuid(row.get(1)?)?,
            node_type: NodeType::parse(&node_type)
                .ok_or_else(|| bad_enum("node_type", &node_type))?,
            title: row.get(3)?,
            owner_agent: row.get(4)?,
            priority: row.get(5)?,
            status: TaskStatus::parse(&status).ok_or_else(|| bad_enum("status", &status))?,
            blocked_reason: blocked
                .map(|b| BlockedReason::parse(&b).ok_or_else(|| bad_enum("blocked_reason", &b)))
                .transpose()?,
            attempt_count: row.get(8)?,
            active_artifact_id: parse_opt_uuid(row.get(9)?)?,
            approved_artifact_id: parse_opt_uuid(row.get(10)?)?,
            created_at: parse_ts(row.get(11)?)?,
            estimated_person_days: row.get(12)?,
            deliverable_spec: row.get(13)?,
            acceptance_criteria: row.get(14)?,
            review_target_task_id: parse_opt_uuid(row.get(15)?)?,
        })
    }

    /// Fetch a task node by id.
    pub fn get_node(&self, task_id: Uuid) -> PlanloomResult<Option<TaskNode>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM task_nodes WHERE task_id = ?1",
                    Self::NODE_COLS
                ),
                params![task_id.to_string()],
                Self::node_from_row,
            )
            .optional()
        })
    }

    /// All nodes of a plan, in creation order.
    pub fn list_nodes(&self, plan_id: Uuid) -> PlanloomResult<Vec<TaskNode>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM task_nodes WHERE plan_id = ?1 ORDER BY created_at, task_id",
                Self::NODE_COLS
            ))?;
            let rows = stmt.query_map(params![plan_id.to_string()], Self::node_from_row)?;
            rows.collect()
        })
    }

    /// Write a status (and blocked reason) for a task.
    pub fn set_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        blocked_reason: Option<BlockedReason>,
    ) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE task_nodes SET status = ?1, blocked_reason = ?2 WHERE task_id = ?3",
                params![
                    status.as_str(),
                    blocked_reason.map(|r| r.as_str()),
                    task_id.to_string()
                ],
            )?;
            Ok(())
        })
    }

    /// Increment a task's attempt counter and return the new value.
    pub fn increment_attempt(&self, task_id: Uuid) -> PlanloomResult<u32> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE task_nodes SET attempt_count = attempt_count + 1 WHERE task_id = ?1",
                params![task_id.to_string()],
            )?;
            conn.query_row(
                "SELECT attempt_count FROM task_nodes WHERE task_id = ?1",
                params![task_id.to_string()],
                |row| row.get(0),
            )
        })
    }

    /// Reset attempt counters to zero.
    pub fn reset_attempts(&self, task_id: Uuid) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE task_nodes SET attempt_count = 0 WHERE task_id = ?1",
                params![task_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Point a task at its newest artifact version.
    pub fn set_active_artifact(&self, task_id: Uuid, artifact_id: Uuid) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE task_nodes SET active_artifact_id = ?1 WHERE task_id = ?2",
                params![artifact_id.to_string(), task_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Record which artifact version passed review.
    pub fn set_approved_artifact(&self, task_id: Uuid, artifact_id: Uuid) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE task_nodes SET approved_artifact_id = ?1 WHERE task_id = ?2",
                params![artifact_id.to_string(), task_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Approve an artifact and mark the ACTION done in one transaction.
    pub fn complete_action(&self, task_id: Uuid, artifact_id: Uuid) -> PlanloomResult<()> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE task_nodes
                 SET approved_artifact_id = ?1, status = 'DONE', blocked_reason = NULL
                 WHERE task_id = ?2",
                params![artifact_id.to_string(), task_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Return FAILED (optionally WAITING_EXTERNAL) tasks to PENDING with a
    /// fresh attempt counter. Returns how many rows changed.
    pub fn reset_failed(&self, plan_id: Uuid, include_external: bool) -> PlanloomResult<usize> {
        self.with_conn(|conn| {
            let mut n = conn.execute(
                "UPDATE task_nodes
                 SET status = 'PENDING', blocked_reason = NULL, attempt_count = 0
                 WHERE plan_id = ?1 AND status = 'FAILED'",
                params![plan_id.to_string()],
            )?;
            if include_external {
                n += conn.execute(
                    "UPDATE task_nodes
                     SET status = 'PENDING', blocked_reason = NULL, attempt_count = 0
                     WHERE plan_id = ?1 AND status = 'BLOCKED'
                       AND blocked_reason = 'WAITING_EXTERNAL'",
                    params![plan_id.to_string()],
                )?;
            }
            Ok(n)
        })
    }

    // --- Edges and requirements ---

    /// All edges of a plan.
    pub fn list_edges(&self, plan_id: Uuid) -> PlanloomResult<Vec<TaskEdge>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT edge_id, plan_id, edge_type, from_task_id, to_task_id, and_or, group_id
                 FROM task_edges WHERE plan_id = ?1 ORDER BY edge_id",
            )?;
            let rows = stmt.query_map(params![plan_id.to_string()], |row| {
                let edge_type: String = row.get(2)?;
                let and_or: Option<String> = row.get(5)?;
                Ok(TaskEdge {
                    edge_id: parse_uuid(row.get(0)?)?,
                    plan_id: parse_uuid(row.get(1)?)?,
                    edge_type: EdgeType::parse(&edge_type)
                        .ok_or_else(|| bad_enum("edge_type", &edge_type))?,
                    from_task_id: parse_uuid(row.get(3)?)?,
                    to_task_id: parse_uuid(row.get(4)?)?,
                    and_or: and_or
                        .map(|a| AndOr::parse(&a).ok_or_else(|| bad_enum("and_or", &a)))
                        .transpose()?,
                    group_id: row.get(6)?,
                })
            })?;
            rows.collect()
        })
    }

    fn requirement_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InputRequirement> {
        let kind: String = row.get(4)?;
        let source: String = row.get(8)?;
        let allowed_types: String = row.get(7)?;
        let keywords: String = row.get(9)?;
        Ok(InputRequirement {
            requirement_id: parse_uuid(row.get(0)?)?,
            plan_id: parse_uuid(row.get(1)?)?,
            task_id: parse_uuid(row.get(2)?)?,
            name: row.get(3)?,
            kind: RequirementKind::parse(&kind).ok_or_else(|| bad_enum("kind", &kind))?,
            required: row.get(5)?,
            min_count: row.get(6)?,
            allowed_types: serde_json::from_str(&allowed_types).map_err(conv_err)?,
            source: RequirementSource::parse(&source)
                .ok_or_else(|| bad_enum("source", &source))?,
            filename_keywords: serde_json::from_str(&keywords).map_err(conv_err)?,
        })
    }

    const REQUIREMENT_COLS: &'static str = "requirement_id, plan_id, task_id, name, kind, \
         required, min_count, allowed_types, source, filename_keywords";

    /// All requirements of a plan.
    pub fn list_requirements(&self, plan_id: Uuid) -> PlanloomResult<Vec<InputRequirement>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM input_requirements WHERE plan_id = ?1 ORDER BY requirement_id",
                Self::REQUIREMENT_COLS
            ))?;
            let rows = stmt.query_map(params![plan_id.to_string()], Self::requirement_from_row)?;
            rows.collect()
        })
    }

    /// The requirements declared on one task.
    pub fn requirements_for_task(&self, task_id: Uuid) -> PlanloomResult<Vec<InputRequirement>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM input_requirements WHERE task_id = ?1 ORDER BY requirement_id",
                Self::REQUIREMENT_COLS
            ))?;
            let rows = stmt.query_map(params![task_id.to_string()], Self::requirement_from_row)?;
            rows.collect()
        })
    }

    // --- Evidence ---

    /// Bind evidence; returns `false` when `(requirement_id, ref_id)` already
    /// exists, so repeated binds are idempotent.
    pub fn insert_evidence(&self, evidence: &Evidence) -> PlanloomResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO evidence
                 (evidence_id, requirement_id, ref_id, kind, path, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    evidence.evidence_id.to_string(),
                    evidence.requirement_id.to_string(),
                    evidence.ref_id,
                    evidence.kind.as_str(),
                    evidence.path,
                    ts(evidence.created_at),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Evidence rows bound to a requirement, oldest first.
    pub fn list_evidence(&self, requirement_id: Uuid) -> PlanloomResult<Vec<Evidence>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT evidence_id, requirement_id, ref_id, kind, path, created_at
                 FROM evidence WHERE requirement_id = ?1 ORDER BY created_at, evidence_id",
            )?;
            let rows = stmt.query_map(params![requirement_id.to_string()], |row| {
                let kind: String = row.get(3)?;
                Ok(Evidence {
                    evidence_id: parse_uuid(row.get(0)?)?,
                    requirement_id: parse_uuid(row.get(1)?)?,
                    ref_id: row.get(2)?,
                    kind: RequirementKind::parse(&kind).ok_or_else(|| bad_enum("kind", &kind))?,
                    path: row.get(4)?,
                    created_at: parse_ts(row.get(5)?)?,
                })
            })?;
            rows.collect()
        })
    }

    /// How many evidence rows a requirement has.
    pub fn evidence_count(&self, requirement_id: Uuid) -> PlanloomResult<u32> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM evidence WHERE requirement_id = ?1",
                params![requirement_id.to_string()],
                |row| row.get(0),
            )
        })
    }

    // --- Artifacts ---

    /// Insert an artifact row and repoint `active_artifact_id`, atomically.
    pub fn record_artifact(&self, artifact: &Artifact) -> PlanloomResult<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO artifacts
                 (artifact_id, task_id, name, path, format, version, content_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    artifact.artifact_id.to_string(),
                    artifact.task_id.to_string(),
                    artifact.name,
                    artifact.path,
                    artifact.format.as_str(),
                    artifact.version,
                    artifact.content_hash,
                    ts(artifact.created_at),
                ],
            )?;
            tx.execute(
                "UPDATE task_nodes SET active_artifact_id = ?1 WHERE task_id = ?2",
                params![artifact.artifact_id.to_string(), artifact.task_id.to_string()],
            )?;
            Ok(())
        })
    }

    fn artifact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Artifact> {
        let format: String = row.get(4)?;
        Ok(Artifact {
            artifact_id: parse_uuid(row.get(0)?)?,
            task_id: parse_uuid(row.get(1)?)?,
            name: row.get(2)?,
            path: row.get(3)?,
            format: ArtifactFormat::parse(&format).ok_or_else(|| bad_enum("format", &format))?,
            version: row.get(5)?,
            content_hash: row.get(6)?,
            created_at: parse_ts(row.get(7)?)?,
        })
    }

    const ARTIFACT_COLS: &'static str =
        "artifact_id, task_id, name, path, format, version, content_hash, created_at";

    /// Fetch an artifact by id.
    pub fn get_artifact(&self, artifact_id: Uuid) -> PlanloomResult<Option<Artifact>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM artifacts WHERE artifact_id = ?1",
                    Self::ARTIFACT_COLS
                ),
                params![artifact_id.to_string()],
                Self::artifact_from_row,
            )
            .optional()
        })
    }

    /// All artifact versions of a task, oldest first.
    pub fn list_artifacts(&self, task_id: Uuid) -> PlanloomResult<Vec<Artifact>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM artifacts WHERE task_id = ?1 ORDER BY version",
                Self::ARTIFACT_COLS
            ))?;
            let rows = stmt.query_map(params![task_id.to_string()], Self::artifact_from_row)?;
            rows.collect()
        })
    }

    /// The next version number for a task's artifact.
    pub fn next_artifact_version(&self, task_id: Uuid) -> PlanloomResult<u32> {
        self.with_conn(|conn| {
            let max: Option<u32> = conn.query_row(
                "SELECT MAX(version) FROM artifacts WHERE task_id = ?1",
                params![task_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(max.unwrap_or(0) + 1)
        })
    }

    // --- Reviews ---

    /// Append a review verdict.
    pub fn insert_review(&self, review: &Review) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reviews
                 (review_id, task_id, reviewer_agent, reviewed_artifact_id, total_score,
                  action_required, breakdown_json, suggestions_json, summary, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    review.review_id.to_string(),
                    review.task_id.to_string(),
                    review.reviewer_agent,
                    review.reviewed_artifact_id.map(|u| u.to_string()),
                    review.total_score,
                    review.action_required.as_str(),
                    serde_json::to_string(&review.breakdown).map_err(conv_err)?,
                    serde_json::to_string(&review.suggestions).map_err(conv_err)?,
                    review.summary,
                    ts(review.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn review_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Review> {
        let action: String = row.get(5)?;
        let breakdown: String = row.get(6)?;
        let suggestions: String = row.get(7)?;
        Ok(Review {
            review_id: parse_uuid(row.get(0)?)?,
            task_id: parse_uuid(row.get(1)?)?,
            reviewer_agent: row.get(2)?,
            reviewed_artifact_id: parse_opt_uuid(row.get(3)?)?,
            total_score: row.get(4)?,
            action_required: ActionRequired::parse(&action)
                .ok_or_else(|| bad_enum("action_required", &action))?,
            breakdown: serde_json::from_str(&breakdown).map_err(conv_err)?,
            suggestions: serde_json::from_str(&suggestions).map_err(conv_err)?,
            summary: row.get(8)?,
            created_at: parse_ts(row.get(9)?)?,
        })
    }

    const REVIEW_COLS: &'static str = "review_id, task_id, reviewer_agent, reviewed_artifact_id, \
         total_score, action_required, breakdown_json, suggestions_json, summary, created_at";

    /// All reviews of a task, oldest first.
    pub fn list_reviews(&self, task_id: Uuid) -> PlanloomResult<Vec<Review>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM reviews WHERE task_id = ?1 ORDER BY created_at, review_id",
                Self::REVIEW_COLS
            ))?;
            let rows = stmt.query_map(params![task_id.to_string()], Self::review_from_row)?;
            rows.collect()
        })
    }

    /// The newest review of a task, if any.
    pub fn latest_review(&self, task_id: Uuid) -> PlanloomResult<Option<Review>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM reviews WHERE task_id = ?1
                     ORDER BY created_at DESC, review_id DESC LIMIT 1",
                    Self::REVIEW_COLS
                ),
                params![task_id.to_string()],
                Self::review_from_row,
            )
            .optional()
        })
    }

    // --- Skill runs ---

    /// Insert a skill run unless its idempotency key already exists.
    /// Returns `false` on a duplicate.
    pub fn insert_skill_run(&self, run: &SkillRun) -> PlanloomResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO skill_runs
                 (skill_run_id, task_id, skill_name, inputs_json, params_json, status,
                  outputs_json, idempotency_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run.skill_run_id.to_string(),
                    run.task_id.map(|u| u.to_string()),
                    run.skill_name,
                    serde_json::to_string(&run.input_hashes).map_err(conv_err)?,
                    run.params.to_string(),
                    run.status.as_str(),
                    run.outputs.to_string(),
                    run.idempotency_key,
                    ts(run.created_at),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Look up a prior run by idempotency key.
    pub fn find_skill_run(&self, idempotency_key: &str) -> PlanloomResult<Option<SkillRun>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT skill_run_id, task_id, skill_name, inputs_json, params_json, status,
                        outputs_json, idempotency_key, created_at
                 FROM skill_runs WHERE idempotency_key = ?1",
                params![idempotency_key],
                |row| {
                    let status: String = row.get(5)?;
                    let inputs: String = row.get(3)?;
                    Ok(SkillRun {
                        skill_run_id: parse_uuid(row.get(0)?)?,
                        task_id: parse_opt_uuid(row.get(1)?)?,
                        skill_name: row.get(2)?,
                        input_hashes: serde_json::from_str(&inputs).map_err(conv_err)?,
                        params: parse_json(row.get(4)?)?,
                        status: SkillRunStatus::parse(&status)
                            .ok_or_else(|| bad_enum("skill status", &status))?,
                        outputs: parse_json(row.get(6)?)?,
                        idempotency_key: row.get(7)?,
                        created_at: parse_ts(row.get(8)?)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Update a skill run's status and outputs.
    pub fn finish_skill_run(
        &self,
        skill_run_id: Uuid,
        status: SkillRunStatus,
        outputs: &serde_json::Value,
    ) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE skill_runs SET status = ?1, outputs_json = ?2 WHERE skill_run_id = ?3",
                params![status.as_str(), outputs.to_string(), skill_run_id.to_string()],
            )?;
            Ok(())
        })
    }

    // --- Events ---

    /// Append one journal row.
    pub fn insert_event(&self, event: &TaskEvent) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO task_events
                 (event_id, plan_id, task_id, event_type, payload_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.event_id.to_string(),
                    event.plan_id.to_string(),
                    event.task_id.map(|u| u.to_string()),
                    event.event_type,
                    event.payload.to_string(),
                    ts(event.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskEvent> {
        Ok(TaskEvent {
            event_id: parse_uuid(row.get(0)?)?,
            plan_id: parse_uuid(row.get(1)?)?,
            task_id: parse_opt_uuid(row.get(2)?)?,
            event_type: row.get(3)?,
            payload: parse_json(row.get(4)?)?,
            created_at: parse_ts(row.get(5)?)?,
        })
    }

    /// Journal rows of a plan in insertion order, newest last, capped at `limit`.
    pub fn list_events(&self, plan_id: Uuid, limit: u32) -> PlanloomResult<Vec<TaskEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id, plan_id, task_id, event_type, payload_json, created_at
                 FROM task_events WHERE plan_id = ?1
                 ORDER BY rowid DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(
                params![plan_id.to_string(), limit],
                Self::event_from_row,
            )?;
            let mut events: Vec<TaskEvent> = rows.collect::<rusqlite::Result<_>>()?;
            events.reverse();
            Ok(events)
        })
    }

    /// Journal rows of a plan with a given tag, in insertion order.
    pub fn list_events_of_type(
        &self,
        plan_id: Uuid,
        event_type: &str,
    ) -> PlanloomResult<Vec<TaskEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id, plan_id, task_id, event_type, payload_json, created_at
                 FROM task_events WHERE plan_id = ?1 AND event_type = ?2 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(
                params![plan_id.to_string(), event_type],
                Self::event_from_row,
            )?;
            rows.collect()
        })
    }

    /// How many journal rows a task has accumulated.
    pub fn event_count_for_task(&self, task_id: Uuid) -> PlanloomResult<u32> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM task_events WHERE task_id = ?1",
                params![task_id.to_string()],
                |row| row.get(0),
            )
        })
    }

    // --- LM call telemetry ---

    /// Persist one telemetry row; called for every LM exchange.
    pub fn insert_llm_call(&self, call: &LlmCall) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO llm_calls
                 (llm_call_id, created_at, plan_id, task_id, agent, scope, prompt_text,
                  response_text, parsed_json, normalized_json, validator_error, error_code,
                  error_message, meta_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    call.llm_call_id.to_string(),
                    ts(call.created_at),
                    call.plan_id.map(|u| u.to_string()),
                    call.task_id.map(|u| u.to_string()),
                    call.agent.as_str(),
                    call.scope.as_str(),
                    call.prompt_text,
                    call.response_text,
                    call.parsed_json.as_ref().map(|v| v.to_string()),
                    call.normalized_json.as_ref().map(|v| v.to_string()),
                    call.validator_error,
                    call.error_code.map(|c| c.as_str()),
                    call.error_message,
                    serde_json::to_string(&call.meta).map_err(conv_err)?,
                ],
            )?;
            Ok(())
        })
    }

    /// Fill in the normalization outcome on an existing telemetry row.
    pub fn update_llm_call_result(
        &self,
        llm_call_id: Uuid,
        normalized_json: Option<&serde_json::Value>,
        validator_error: Option<&str>,
        error_code: Option<ErrorCode>,
        error_message: Option<&str>,
    ) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE llm_calls
                 SET normalized_json = ?1, validator_error = ?2, error_code = ?3,
                     error_message = ?4
                 WHERE llm_call_id = ?5",
                params![
                    normalized_json.map(|v| v.to_string()),
                    validator_error,
                    error_code.map(|c| c.as_str()),
                    error_message,
                    llm_call_id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    /// Back-fill the plan id on a PLAN_GEN call once the stub plan row exists.
    pub fn set_llm_call_plan(&self, llm_call_id: Uuid, plan_id: Uuid) -> PlanloomResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE llm_calls SET plan_id = ?1 WHERE llm_call_id = ?2",
                params![plan_id.to_string(), llm_call_id.to_string()],
            )?;
            Ok(())
        })
    }

    fn llm_call_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LlmCall> {
        let agent: String = row.get(4)?;
        let scope: String = row.get(5)?;
        let error_code: Option<String> = row.get(11)?;
        let meta: String = row.get(13)?;
        Ok(LlmCall {
            llm_call_id: parse_uuid(row.get(0)?)?,
            created_at: parse_ts(row.get(1)?)?,
            plan_id: parse_opt_uuid(row.get(2)?)?,
            task_id: parse_opt_uuid(row.get(3)?)?,
            agent: AgentKind::parse(&agent).ok_or_else(|| bad_enum("agent", &agent))?,
            scope: CallScope::parse(&scope).ok_or_else(|| bad_enum("scope", &scope))?,
            prompt_text: row.get(6)?,
            response_text: row.get(7)?,
            parsed_json: row.get::<_, Option<String>>(8)?.map(parse_json).transpose()?,
            normalized_json: row.get::<_, Option<String>>(9)?.map(parse_json).transpose()?,
            validator_error: row.get(10)?,
            error_code: error_code
                .map(|c| ErrorCode::parse(&c).ok_or_else(|| bad_enum("error_code", &c)))
                .transpose()?,
            error_message: row.get(12)?,
            meta: serde_json::from_str::<LlmCallMeta>(&meta).map_err(conv_err)?,
        })
    }

    const LLM_CALL_COLS: &'static str = "llm_call_id, created_at, plan_id, task_id, agent, \
         scope, prompt_text, response_text, parsed_json, normalized_json, validator_error, \
         error_code, error_message, meta_json";

    /// Newest telemetry rows first, capped at `limit`.
    pub fn list_llm_calls(&self, limit: u32) -> PlanloomResult<Vec<LlmCall>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM llm_calls ORDER BY rowid DESC LIMIT ?1",
                Self::LLM_CALL_COLS
            ))?;
            let rows = stmt.query_map(params![limit], Self::llm_call_from_row)?;
            rows.collect()
        })
    }

    /// Every telemetry row, oldest first (contract-audit walks the lot).
    pub fn list_all_llm_calls(&self) -> PlanloomResult<Vec<LlmCall>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM llm_calls ORDER BY rowid",
                Self::LLM_CALL_COLS
            ))?;
            let rows = stmt.query_map([], Self::llm_call_from_row)?;
            rows.collect()
        })
    }

    /// LM calls charged to one task so far.
    pub fn llm_call_count_for_task(&self, task_id: Uuid) -> PlanloomResult<u32> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM llm_calls WHERE task_id = ?1",
                params![task_id.to_string()],
                |row| row.get(0),
            )
        })
    }

    // --- Maintenance (repair-db) ---

    /// Drop the oldest telemetry rows beyond `max_rows`. Returns rows removed.
    pub fn prune_llm_calls(&self, max_rows: u32) -> PlanloomResult<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM llm_calls WHERE rowid IN (
                     SELECT rowid FROM llm_calls ORDER BY rowid DESC LIMIT -1 OFFSET ?1
                 )",
                params![max_rows],
            )
        })
    }

    /// Drop the oldest journal rows beyond `max_rows`. Returns rows removed.
    pub fn prune_task_events(&self, max_rows: u32) -> PlanloomResult<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM task_events WHERE rowid IN (
                     SELECT rowid FROM task_events ORDER BY rowid DESC LIMIT -1 OFFSET ?1
                 )",
                params![max_rows],
            )
        })
    }

    /// Null out artifact pointers that reference no artifact row.
    pub fn clear_dangling_artifact_pointers(&self) -> PlanloomResult<usize> {
        self.with_conn(|conn| {
            let mut n = conn.execute(
                "UPDATE task_nodes SET active_artifact_id = NULL
                 WHERE active_artifact_id IS NOT NULL
                   AND active_artifact_id NOT IN (SELECT artifact_id FROM artifacts)",
                [],
            )?;
            n += conn.execute(
                "UPDATE task_nodes SET approved_artifact_id = NULL
                 WHERE approved_artifact_id IS NOT NULL
                   AND approved_artifact_id NOT IN (SELECT artifact_id FROM artifacts)",
                [],
            )?;
            Ok(n)
        })
    }

    // --- Introspection (doctor) ---

    /// Migration filenames recorded as applied, in order.
    pub fn applied_migrations(&self) -> PlanloomResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM schema_migrations ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Whether the foreign-keys pragma is on for this connection.
    pub fn foreign_keys_enabled(&self) -> PlanloomResult<bool> {
        self.with_conn(|conn| {
            conn.query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
                .map(|v| v == 1)
        })
    }

    /// Whether a table exists.
    pub fn table_exists(&self, name: &str) -> PlanloomResult<bool> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1)",
                params![name],
                |row| row.get(0),
            )
        })
    }

    /// Column names of a table, in declaration order.
    pub fn table_columns(&self, name: &str) -> PlanloomResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({name})"))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
            rows.collect()
        })
    }
}
