//! SQLite-backed [`JobStore`].

use std::path::Path;

use sv_core::{JobId, JobRecord, JobStatus, JobStore, Result};

use crate::pool::{get_conn, DbPool};
use crate::queries::transcode_jobs as q;

/// Job persistence over a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: DbPool,
}

impl SqliteJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: &JobRecord) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        q::insert_job(&conn, job)
    }

    fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        let conn = get_conn(&self.pool)?;
        q::get_job(&conn, id)
    }

    fn list(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<JobRecord>> {
        let conn = get_conn(&self.pool)?;
        q::list_jobs(&conn, status, limit)
    }

    fn mark_processing(&self, id: JobId) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        q::start_job(&conn, id)
    }

    fn update_progress(&self, id: JobId, percent: u8) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        q::update_progress(&conn, id, percent)
    }

    fn mark_completed(&self, id: JobId, output_path: &Path) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        q::complete_job(&conn, id, output_path)
    }

    fn mark_failed(&self, id: JobId, message: &str) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        q::fail_job(&conn, id, message)
    }

    fn mark_cancelled(&self, id: JobId) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        q::cancel_job(&conn, id)
    }

    fn reset_orphaned(&self) -> Result<usize> {
        let conn = get_conn(&self.pool)?;
        let n = q::reset_orphaned_jobs(&conn)?;
        if n > 0 {
            tracing::warn!(count = n, "Marked interrupted jobs as failed");
        }
        Ok(n)
    }
}
