//! In-memory arena of live job handles.
//!
//! Every status change a running job goes through is decided here, under
//! one lock, so a cancel request and a process exit can never both win.
//! The durable row is written afterwards by the manager.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sv_core::{Error, JobId, JobKind, JobRecord, JobStatus, MediaId, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Caller-facing view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub media_id: MediaId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub profile_name: Option<String>,
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobHandle {
    fn from(r: &JobRecord) -> Self {
        Self {
            job_id: r.id,
            media_id: r.media_id,
            kind: r.kind,
            status: r.status,
            input_path: r.input_path.clone(),
            output_path: r.output_path.clone(),
            profile_name: r.profile_name.clone(),
            progress: r.progress_percent,
            error: r.error_message.clone(),
            created_at: r.created_at,
        }
    }
}

/// How a job's own task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finish {
    Completed,
    Failed(String),
    Cancelled,
}

/// Result of [`JobRegistry::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub status: JobStatus,
    /// False when the job was already terminal (cancelled first).
    pub transitioned: bool,
}

/// What a cancel request interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still waiting for a slot.
    Queued,
    /// A process may be running; its task finishes the cleanup.
    Running,
}

/// Who holds an output path.
#[derive(Debug)]
pub enum OutputClaim {
    /// A pending or processing job that callers can join.
    Live(JobHandle),
    /// A terminal job still removing its artifacts. The receiver turns
    /// `true` once it has settled.
    Settling(watch::Receiver<bool>),
}

struct Entry {
    handle: JobHandle,
    cancel: CancellationToken,
    settled: watch::Sender<bool>,
    settled_at: Option<Instant>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Entry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new job. Terminal handles are settled on insertion.
    pub fn insert(&self, handle: JobHandle) -> CancellationToken {
        let cancel = CancellationToken::new();
        let terminal = handle.status.is_terminal();
        let (settled, _) = watch::channel(terminal);
        let entry = Entry {
            handle,
            cancel: cancel.clone(),
            settled,
            settled_at: terminal.then(Instant::now),
        };
        self.jobs.lock().insert(entry.handle.job_id, entry);
        cancel
    }

    /// Track `handle` unless another job still holds its output.
    ///
    /// A job holds its output from insertion until it settles, so a job that
    /// was cancelled but is still cleaning up keeps it too. With `force` a
    /// live job does not block the insert, but a settling one always does.
    pub fn claim(&self, handle: JobHandle, force: bool) -> std::result::Result<CancellationToken, OutputClaim> {
        let mut jobs = self.jobs.lock();
        match find_claim(&jobs, &handle.output_path) {
            Some(claim @ OutputClaim::Settling(_)) => return Err(claim),
            Some(claim @ OutputClaim::Live(_)) if !force => return Err(claim),
            _ => {}
        }
        let cancel = CancellationToken::new();
        let (settled, _) = watch::channel(false);
        let entry = Entry {
            handle,
            cancel: cancel.clone(),
            settled,
            settled_at: None,
        };
        jobs.insert(entry.handle.job_id, entry);
        Ok(cancel)
    }

    pub fn snapshot(&self, id: JobId) -> Option<JobHandle> {
        self.jobs.lock().get(&id).map(|e| e.handle.clone())
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.lock().get(&id).map(|e| e.handle.status)
    }

    pub fn is_processing(&self, id: JobId) -> bool {
        self.status(id) == Some(JobStatus::Processing)
    }

    pub fn cancel_token(&self, id: JobId) -> Option<CancellationToken> {
        self.jobs.lock().get(&id).map(|e| e.cancel.clone())
    }

    /// The unsettled job holding `output`, if any. A settling job is
    /// reported ahead of a live one.
    pub fn output_claim(&self, output: &Path) -> Option<OutputClaim> {
        find_claim(&self.jobs.lock(), output)
    }

    /// Ids of every job not yet in a terminal state.
    pub fn live_ids(&self) -> Vec<JobId> {
        self.jobs
            .lock()
            .values()
            .filter(|e| !e.handle.status.is_terminal())
            .map(|e| e.handle.job_id)
            .collect()
    }

    /// pending -> processing. False if the job is gone or no longer pending.
    pub fn set_processing(&self, id: JobId) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id) {
            Some(e) if e.handle.status == JobStatus::Pending => {
                e.handle.status = JobStatus::Processing;
                true
            }
            _ => false,
        }
    }

    /// Raise the progress of a processing job. Returns the stored value when
    /// it changed.
    pub fn set_progress(&self, id: JobId, percent: u8) -> Option<u8> {
        let percent = percent.min(crate::progress::MAX_ESTIMATE);
        let mut jobs = self.jobs.lock();
        let e = jobs.get_mut(&id)?;
        if e.handle.status == JobStatus::Processing && percent > e.handle.progress {
            e.handle.progress = percent;
            Some(percent)
        } else {
            None
        }
    }

    /// Move a pending or processing job to cancelled and fire its token.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the job is not tracked, [`Error::Conflict`]
    /// when it is already terminal.
    pub fn request_cancel(&self, id: JobId) -> Result<CancelOutcome> {
        let mut jobs = self.jobs.lock();
        let e = jobs.get_mut(&id).ok_or_else(|| Error::not_found("job", id))?;
        let outcome = match e.handle.status {
            JobStatus::Pending => CancelOutcome::Queued,
            JobStatus::Processing => CancelOutcome::Running,
            other => {
                return Err(Error::Conflict(format!("job is already {other}")));
            }
        };
        e.handle.status = JobStatus::Cancelled;
        e.handle.error = None;
        e.cancel.cancel();
        Ok(outcome)
    }

    /// Record how the job's task ended, unless the job is already terminal.
    pub fn finish(&self, id: JobId, finish: Finish) -> Settlement {
        let mut jobs = self.jobs.lock();
        let Some(e) = jobs.get_mut(&id) else {
            return Settlement {
                status: JobStatus::Failed,
                transitioned: false,
            };
        };
        if e.handle.status.is_terminal() {
            return Settlement {
                status: e.handle.status,
                transitioned: false,
            };
        }
        match finish {
            Finish::Completed => {
                e.handle.status = JobStatus::Completed;
                e.handle.progress = 100;
            }
            Finish::Failed(message) => {
                e.handle.status = JobStatus::Failed;
                e.handle.error = Some(message);
            }
            Finish::Cancelled => e.handle.status = JobStatus::Cancelled,
        }
        Settlement {
            status: e.handle.status,
            transitioned: true,
        }
    }

    /// Mark the job settled and wake every waiter.
    pub fn settle(&self, id: JobId) {
        let mut jobs = self.jobs.lock();
        if let Some(e) = jobs.get_mut(&id) {
            if e.settled_at.is_none() {
                e.settled_at = Some(Instant::now());
            }
            e.settled.send_replace(true);
        }
    }

    /// Receiver that turns `true` once the job has settled.
    pub fn watch_settled(&self, id: JobId) -> Option<watch::Receiver<bool>> {
        self.jobs.lock().get(&id).map(|e| e.settled.subscribe())
    }

    /// Drop settled handles older than `retention`.
    pub fn purge(&self, retention: Duration) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, e| match e.settled_at {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

fn find_claim(jobs: &HashMap<JobId, Entry>, output: &Path) -> Option<OutputClaim> {
    let mut live = None;
    for e in jobs.values() {
        if e.settled_at.is_some() || e.handle.output_path != output {
            continue;
        }
        if e.handle.status.is_terminal() {
            return Some(OutputClaim::Settling(e.settled.subscribe()));
        }
        live.get_or_insert_with(|| e.handle.clone());
    }
    live.map(OutputClaim::Live)
}
