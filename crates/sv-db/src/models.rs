//! Row mapping for persisted models.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use sv_core::{JobRecord, MediaId};
use uuid::Uuid;

fn conversion_error(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))?;
    Ok(T::from(uuid))
}

fn parse_enum<T: std::str::FromStr<Err = String>>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: String| conversion_error(idx, e))
}

fn parse_dt(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_opt_dt(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        Some(_) => parse_dt(row, idx).map(Some),
        None => Ok(None),
    }
}

/// Column list matching [`job_from_row`].
pub(crate) const JOB_COLS: &str = "id, media_id, kind, status, input_path, output_path,
    profile_name, target_format, target_resolution, progress_pct, error,
    created_at, started_at, completed_at";

/// Map a `transcode_jobs` row selected with [`JOB_COLS`].
pub fn job_from_row(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
    let input: String = row.get(4)?;
    let output: String = row.get(5)?;
    let progress: i64 = row.get(9)?;
    Ok(JobRecord {
        id: parse_id(row, 0)?,
        media_id: MediaId(row.get(1)?),
        kind: parse_enum(row, 2)?,
        status: parse_enum(row, 3)?,
        input_path: PathBuf::from(input),
        output_path: PathBuf::from(output),
        profile_name: row.get(6)?,
        target_format: row.get(7)?,
        target_resolution: row.get(8)?,
        progress_percent: progress.clamp(0, 100) as u8,
        error_message: row.get(10)?,
        created_at: parse_dt(row, 11)?,
        started_at: parse_opt_dt(row, 12)?,
        completed_at: parse_opt_dt(row, 13)?,
    })
}
