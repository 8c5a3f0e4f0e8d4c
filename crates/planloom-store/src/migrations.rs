use rusqlite::Connection;

/// A migration that could not be applied, with the failing filename.
#[derive(Debug)]
pub struct MigrationError {
    /// The migration file that failed.
    pub file: String,
    /// The underlying database error.
    pub message: String,
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "migration {} failed: {}", self.file, self.message)
    }
}

/// Embedded migrations, applied in file order, each at most once.
const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_init.sql", include_str!("../migrations/0001_init.sql")),
    (
        "0002_workflow_v2.sql",
        include_str!("../migrations/0002_workflow_v2.sql"),
    ),
];

/// The ordered migration filenames this build ships.
pub fn expected_migrations() -> Vec<&'static str> {
    MIGRATIONS.iter().map(|(name, _)| *name).collect()
}

/// Apply every migration not yet recorded in `schema_migrations`.
///
/// Each migration runs inside its own transaction together with its
/// bookkeeping row, so a failure leaves the database at the previous
/// migration boundary.
pub(crate) fn apply_all(conn: &mut Connection) -> Result<Vec<String>, MigrationError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(|e| MigrationError {
        file: "schema_migrations".to_string(),
        message: e.to_string(),
    })?;

    let mut applied = Vec::new();
    for (name, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE name = ?1)",
                [name],
                |row| row.get(0),
            )
            .map_err(|e| MigrationError {
                file: (*name).to_string(),
                message: e.to_string(),
            })?;
        if already {
            continue;
        }

        let tx = conn.transaction().map_err(|e| MigrationError {
            file: (*name).to_string(),
            message: e.to_string(),
        })?;
        tx.execute_batch(sql).map_err(|e| MigrationError {
            file: (*name).to_string(),
            message: e.to_string(),
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, ?2)",
            rusqlite::params![name, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(|e| MigrationError {
            file: (*name).to_string(),
            message: e.to_string(),
        })?;
        tx.commit().map_err(|e| MigrationError {
            file: (*name).to_string(),
            message: e.to_string(),
        })?;

        tracing::info!(migration = name, "applied migration");
        applied.push((*name).to_string());
    }
    Ok(applied)
}
