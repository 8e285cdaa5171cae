//! Durable job rows and the persistence seam the job manager writes through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::ids::{JobId, MediaId};
use crate::media::{JobKind, JobStatus};

/// One persisted transcoding job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub media_id: MediaId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub profile_name: Option<String>,
    /// Container or artifact format ("mp4", "m3u8", "jpg").
    pub target_format: String,
    /// "WxH" for single files and thumbnails, the rung list for ladders.
    pub target_resolution: Option<String>,
    pub progress_percent: u8,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh pending row.
    pub fn pending(
        id: JobId,
        media_id: MediaId,
        kind: JobKind,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        target_format: impl Into<String>,
    ) -> Self {
        Self {
            id,
            media_id,
            kind,
            status: JobStatus::Pending,
            input_path: input_path.into(),
            output_path: output_path.into(),
            profile_name: None,
            target_format: target_format.into(),
            target_resolution: None,
            progress_percent: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Persistence for job rows.
///
/// Every `mark_*` method only applies a transition the lifecycle allows and
/// returns `false` when the row was missing or already past that state.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: &JobRecord) -> Result<()>;

    fn get(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// Newest first, optionally filtered by status.
    fn list(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<JobRecord>>;

    fn mark_processing(&self, id: JobId) -> Result<bool>;

    /// Raise progress of a processing job. Lower values are ignored.
    fn update_progress(&self, id: JobId, percent: u8) -> Result<bool>;

    fn mark_completed(&self, id: JobId, output_path: &Path) -> Result<bool>;

    fn mark_failed(&self, id: JobId, message: &str) -> Result<bool>;

    fn mark_cancelled(&self, id: JobId) -> Result<bool>;

    /// Fail rows a previous process left pending or processing.
    fn reset_orphaned(&self) -> Result<usize>;
}
