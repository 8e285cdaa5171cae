//! Transcode job row operations.
//!
//! Every state-changing statement carries a `status` guard so rows only ever
//! move forward through the lifecycle, even if callers race.

use std::path::Path;

use chrono::Utc;
use rusqlite::Connection;
use sv_core::{Error, JobId, JobRecord, JobStatus, Result};

use crate::models::{job_from_row, JOB_COLS};

/// Insert a job row as-is.
pub fn insert_job(conn: &Connection, job: &JobRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO transcode_jobs (id, media_id, kind, status, input_path, output_path,
            profile_name, target_format, target_resolution, progress_pct, error,
            created_at, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            job.id.to_string(),
            job.media_id.0,
            job.kind.to_string(),
            job.status.to_string(),
            job.input_path.to_string_lossy(),
            job.output_path.to_string_lossy(),
            job.profile_name,
            job.target_format,
            job.target_resolution,
            job.progress_percent,
            job.error_message,
            job.created_at.to_rfc3339(),
            job.started_at.map(|t| t.to_rfc3339()),
            job.completed_at.map(|t| t.to_rfc3339()),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<JobRecord>> {
    let q = format!("SELECT {JOB_COLS} FROM transcode_jobs WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], job_from_row);
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List jobs, newest first, with an optional status filter.
pub fn list_jobs(conn: &Connection, status: Option<JobStatus>, limit: u32) -> Result<Vec<JobRecord>> {
    let q = format!(
        "SELECT {JOB_COLS} FROM transcode_jobs
         WHERE (?1 IS NULL OR status = ?1)
         ORDER BY created_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::params![status.map(|s| s.to_string()), limit],
            job_from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// pending -> processing.
pub fn start_job(conn: &Connection, id: JobId) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE transcode_jobs SET status='processing', started_at=?1
             WHERE id=?2 AND status='pending'",
            rusqlite::params![now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Raise progress of a processing job. Values above 99 are reserved for
/// completion and lower values than the stored one are ignored.
pub fn update_progress(conn: &Connection, id: JobId, pct: u8) -> Result<bool> {
    let pct = pct.min(99);
    let n = conn
        .execute(
            "UPDATE transcode_jobs SET progress_pct=?1
             WHERE id=?2 AND status='processing' AND progress_pct < ?1",
            rusqlite::params![pct, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// processing -> completed, progress pinned at 100.
pub fn complete_job(conn: &Connection, id: JobId, output_path: &Path) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE transcode_jobs SET status='completed', progress_pct=100, output_path=?1,
                error=NULL, completed_at=?2
             WHERE id=?3 AND status='processing'",
            rusqlite::params![output_path.to_string_lossy(), now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// pending|processing -> failed.
pub fn fail_job(conn: &Connection, id: JobId, error: &str) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE transcode_jobs SET status='failed', error=?1, completed_at=?2
             WHERE id=?3 AND status IN ('pending', 'processing')",
            rusqlite::params![error, now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// pending|processing -> cancelled.
pub fn cancel_job(conn: &Connection, id: JobId) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE transcode_jobs SET status='cancelled', completed_at=?1
             WHERE id=?2 AND status IN ('pending', 'processing')",
            rusqlite::params![now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Fail every job a previous process left unfinished.
pub fn reset_orphaned_jobs(conn: &Connection) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE transcode_jobs SET status='failed', error='interrupted by restart', completed_at=?1
         WHERE status IN ('pending', 'processing')",
        [now],
    )
    .map_err(|e| Error::database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{get_conn, init_memory_pool};
    use sv_core::{JobKind, MediaId};

    fn new_job() -> JobRecord {
        let mut job = JobRecord::pending(
            JobId::new(),
            MediaId(1),
            JobKind::SingleFile,
            "/media/movie.mkv",
            "/out/movie_standard.mp4",
            "mp4",
        );
        job.profile_name = Some("standard".into());
        job.target_resolution = Some("1280x720".into());
        job
    }

    #[test]
    fn insert_and_get() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let job = new_job();
        insert_job(&conn, &job).unwrap();

        let found = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.kind, JobKind::SingleFile);
        assert_eq!(found.profile_name.as_deref(), Some("standard"));
        assert_eq!(found.output_path, job.output_path);
        assert_eq!(found.created_at.timestamp(), job.created_at.timestamp());

        assert!(get_job(&conn, JobId::new()).unwrap().is_none());
    }

    #[test]
    fn lifecycle_to_completed() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let job = new_job();
        insert_job(&conn, &job).unwrap();

        // Progress is ignored until the job is processing.
        assert!(!update_progress(&conn, job.id, 10).unwrap());
        assert!(start_job(&conn, job.id).unwrap());
        assert!(!start_job(&conn, job.id).unwrap());

        assert!(update_progress(&conn, job.id, 40).unwrap());
        assert!(!update_progress(&conn, job.id, 30).unwrap());
        assert!(update_progress(&conn, job.id, 100).unwrap());
        let mid = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(mid.progress_percent, 99);
        assert!(mid.started_at.is_some());

        assert!(complete_job(&conn, job.id, &job.output_path).unwrap());
        let done = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress_percent, 100);
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn terminal_rows_do_not_move() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let job = new_job();
        insert_job(&conn, &job).unwrap();

        assert!(cancel_job(&conn, job.id).unwrap());
        assert!(!start_job(&conn, job.id).unwrap());
        assert!(!fail_job(&conn, job.id, "late failure").unwrap());
        assert!(!complete_job(&conn, job.id, &job.output_path).unwrap());
        assert!(!cancel_job(&conn, job.id).unwrap());

        let found = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Cancelled);
        assert!(found.error_message.is_none());
    }

    #[test]
    fn fail_stores_message() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let job = new_job();
        insert_job(&conn, &job).unwrap();
        start_job(&conn, job.id).unwrap();

        assert!(fail_job(&conn, job.id, "ffmpeg failed to process the media").unwrap());
        let failed = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("ffmpeg failed to process the media")
        );
    }

    #[test]
    fn list_with_filter() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let a = new_job();
        let b = new_job();
        insert_job(&conn, &a).unwrap();
        insert_job(&conn, &b).unwrap();
        start_job(&conn, b.id).unwrap();

        assert_eq!(list_jobs(&conn, None, 10).unwrap().len(), 2);
        let processing = list_jobs(&conn, Some(JobStatus::Processing), 10).unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, b.id);
        assert_eq!(list_jobs(&conn, None, 1).unwrap().len(), 1);
    }

    #[test]
    fn orphaned_jobs_are_failed() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let pending = new_job();
        let running = new_job();
        let mut done = new_job();
        done.status = JobStatus::Completed;
        done.progress_percent = 100;
        for j in [&pending, &running, &done] {
            insert_job(&conn, j).unwrap();
        }
        start_job(&conn, running.id).unwrap();

        assert_eq!(reset_orphaned_jobs(&conn).unwrap(), 2);
        assert_eq!(get_job(&conn, pending.id).unwrap().unwrap().status, JobStatus::Failed);
        assert_eq!(get_job(&conn, running.id).unwrap().unwrap().status, JobStatus::Failed);
        assert_eq!(get_job(&conn, done.id).unwrap().unwrap().status, JobStatus::Completed);
    }
}
