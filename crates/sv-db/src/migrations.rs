//! Embedded SQL migrations and runner.
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_migrations`.

use rusqlite::Connection;
use sv_core::{Error, Result};

/// V1: the job table.
const V1_TRANSCODE_JOBS: &str = r#"
CREATE TABLE transcode_jobs (
    id                TEXT PRIMARY KEY,
    media_id          INTEGER NOT NULL,
    kind              TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'pending',
    input_path        TEXT NOT NULL,
    output_path       TEXT NOT NULL,
    profile_name      TEXT,
    target_format     TEXT NOT NULL,
    target_resolution TEXT,
    progress_pct      INTEGER NOT NULL DEFAULT 0,
    error             TEXT,
    created_at        TEXT NOT NULL,
    started_at        TEXT,
    completed_at      TEXT
);

CREATE INDEX idx_transcode_jobs_status ON transcode_jobs(status);
CREATE INDEX idx_transcode_jobs_media ON transcode_jobs(media_id);
"#;

/// `(version, sql)`, in application order.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_TRANSCODE_JOBS)];

fn db_err(e: rusqlite::Error) -> Error {
    Error::database(e.to_string())
}

/// Apply every migration newer than the highest recorded version.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(db_err)?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(db_err)?;

    for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.unchecked_transaction().map_err(db_err)?;
        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("migration v{version} failed: {e}")))?;
        tx.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [version])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        tracing::info!(version, "applied schema migration");
    }

    Ok(())
}
