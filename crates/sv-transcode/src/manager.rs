//! Job manager: admission, execution and settlement of transcoding jobs.
//!
//! A job is admitted FIFO under the configured concurrency bound, runs one
//! (or, for storyboards, several) supervised backend processes, and settles
//! once its terminal status is recorded and its artifacts are verified or
//! removed. The in-memory [`JobRegistry`] decides every transition; rows in
//! the [`JobStore`] follow it.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sv_av::actions::hls::segment_prefix;
use sv_av::{
    BackendKind, BackendSelector, ExitOutcome, HlsSpec, MediaProbe, Operation, Request,
    ThumbnailSpec, ToolRegistry, TranscodeSpec,
};
use sv_core::config::{Config, TranscodeConfig};
use sv_core::events::{EventBus, JobEvent};
use sv_core::{Error, JobId, JobKind, JobRecord, JobStatus, JobStore, MediaId, Result};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ladder::{self, HlsLadder, LadderPlan};
use crate::layout::{staging_path, OutputLayout};
use crate::profiles::{ProfileCatalog, ProfileOverrides};
use crate::progress::{self, ProgressSink, ProgressSource};
use crate::registry::{CancelOutcome, Finish, JobHandle, JobRegistry, OutputClaim};
use crate::thumbnails::{self, StoryboardPlan};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// What a job should produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobRequest {
    SingleFile {
        profile: String,
        #[serde(default)]
        overrides: ProfileOverrides,
    },
    Hls {
        /// Tallest rung allowed. Defaults to the source height.
        max_height: Option<u32>,
    },
    Thumbnail {
        offset_secs: f64,
    },
    Storyboard {
        count: u32,
    },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::SingleFile { .. } => JobKind::SingleFile,
            Self::Hls { .. } => JobKind::Hls,
            Self::Thumbnail { .. } => JobKind::Thumbnail,
            Self::Storyboard { .. } => JobKind::Storyboard,
        }
    }

    fn operation(&self) -> Operation {
        match self {
            Self::SingleFile { .. } => Operation::Transcode,
            Self::Hls { .. } => Operation::Hls,
            Self::Thumbnail { .. } | Self::Storyboard { .. } => Operation::Thumbnail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub request: JobRequest,
    /// Ignore an existing artifact and any in-flight job for the same output.
    #[serde(default)]
    pub force_regenerate: bool,
}

impl JobOptions {
    pub fn single_file(profile: impl Into<String>) -> Self {
        Self::new(JobRequest::SingleFile {
            profile: profile.into(),
            overrides: ProfileOverrides::default(),
        })
    }

    pub fn hls(max_height: Option<u32>) -> Self {
        Self::new(JobRequest::Hls { max_height })
    }

    pub fn thumbnail(offset_secs: f64) -> Self {
        Self::new(JobRequest::Thumbnail { offset_secs })
    }

    pub fn storyboard(count: u32) -> Self {
        Self::new(JobRequest::Storyboard { count })
    }

    #[must_use]
    pub fn with_overrides(mut self, new: ProfileOverrides) -> Self {
        if let JobRequest::SingleFile { overrides, .. } = &mut self.request {
            *overrides = new;
        }
        self
    }

    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force_regenerate = force;
        self
    }

    fn new(request: JobRequest) -> Self {
        Self {
            request,
            force_regenerate: false,
        }
    }
}

/// Planned backend work for an admitted job.
#[derive(Debug, Clone)]
enum Work {
    Transcode(TranscodeSpec),
    Hls {
        plan: LadderPlan,
        total: Option<Duration>,
    },
    Thumbnail(ThumbnailSpec),
    Storyboard(StoryboardPlan),
}

impl Work {
    /// Final artifact: a file, or the directory of a ladder or storyboard.
    fn target(&self) -> &Path {
        match self {
            Self::Transcode(spec) => &spec.output,
            Self::Thumbnail(spec) => &spec.output,
            Self::Hls { plan, .. } => &plan.spec.output_dir,
            Self::Storyboard(plan) => &plan.dir,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Self::Hls { .. } | Self::Storyboard(_))
    }

    /// Delete what a failed or cancelled run left behind. The target itself
    /// only goes when this run already renamed its result into place.
    async fn remove_artifacts(&self, id: JobId, committed: bool) {
        remove_path(&staging_path(self.target(), id), self.is_dir()).await;
        if committed {
            remove_path(self.target(), self.is_dir()).await;
        }
    }
}

async fn remove_path(path: &Path, dir: bool) {
    let result = if dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial artifacts"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove partial artifacts"),
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Collaborators injected into the manager.
pub struct EngineDeps {
    pub config: TranscodeConfig,
    pub output_dir: PathBuf,
    pub catalog: ProfileCatalog,
    pub selector: BackendSelector,
    pub prober: Arc<dyn MediaProbe>,
    pub store: Arc<dyn JobStore>,
    pub events: Arc<EventBus>,
}

impl EngineDeps {
    /// Default wiring: discovered tools, the built-in catalog, and the
    /// backend selector doubling as prober.
    pub fn from_config(config: &Config, store: Arc<dyn JobStore>) -> Self {
        let selector = BackendSelector::new(ToolRegistry::discover(&config.tools));
        Self {
            config: config.transcode.clone(),
            output_dir: config.storage.output_dir.clone(),
            catalog: ProfileCatalog::builtin(),
            prober: Arc::new(selector.clone()),
            selector,
            store,
            events: Arc::new(EventBus::default()),
        }
    }
}

#[derive(Default)]
struct Admission {
    running: usize,
    queue: VecDeque<(JobId, Work)>,
}

struct Inner {
    config: TranscodeConfig,
    layout: OutputLayout,
    catalog: ProfileCatalog,
    selector: BackendSelector,
    prober: Arc<dyn MediaProbe>,
    store: Arc<dyn JobStore>,
    events: Arc<EventBus>,
    registry: JobRegistry,
    admission: Mutex<Admission>,
    ladders: Mutex<HashMap<JobId, HlsLadder>>,
}

/// Owns every live job. Cheap to clone.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    /// Build a manager and fail any rows a previous process left unfinished.
    pub fn new(deps: EngineDeps) -> Result<Self> {
        let orphaned = deps.store.reset_orphaned()?;
        if orphaned > 0 {
            tracing::warn!(count = orphaned, "failed jobs interrupted by a previous run");
        }
        Ok(Self {
            inner: Arc::new(Inner {
                layout: OutputLayout::new(deps.output_dir),
                config: deps.config,
                catalog: deps.catalog,
                selector: deps.selector,
                prober: deps.prober,
                store: deps.store,
                events: deps.events,
                registry: JobRegistry::new(),
                admission: Mutex::new(Admission::default()),
                ladders: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.inner.layout
    }

    pub fn catalog(&self) -> &ProfileCatalog {
        &self.inner.catalog
    }

    /// Number of jobs holding a running slot.
    pub fn running_jobs(&self) -> usize {
        self.inner.admission.lock().running
    }

    /// Number of jobs waiting for a slot.
    pub fn queued_jobs(&self) -> usize {
        self.inner.admission.lock().queue.len()
    }

    /// Playlists of an HLS job still held in memory.
    pub fn ladder(&self, id: JobId) -> Option<HlsLadder> {
        self.inner.ladders.lock().get(&id).cloned()
    }

    /// Request a new job.
    ///
    /// Returns the handle of a fresh pending job, of an identical job
    /// already in flight, or a completed handle when the artifact is cached.
    /// A missing input yields a handle that is already failed.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] when no backend can run the job.
    /// - [`Error::Validation`] for unusable options, including a storyboard
    ///   of unknown duration.
    /// - Probe errors for ladders and storyboards, which need the source
    ///   described up front.
    ///
    /// No row is written in any of these cases.
    pub async fn start_job(
        &self,
        media_id: MediaId,
        input: &Path,
        options: JobOptions,
    ) -> Result<JobHandle> {
        let inner = &self.inner;
        let backend = inner.selector.select(options.request.operation())?;
        let kind = options.request.kind();

        let mut record = self.new_record(media_id, input, &options)?;
        let output = record.output_path.clone();

        if tokio::fs::metadata(input).await.is_err() {
            let err = Error::input_not_found(input);
            tracing::warn!(job_id = %record.id, %media_id, "{err}");
            record.status = JobStatus::Failed;
            record.error_message = Some(err.user_message());
            record.completed_at = Some(Utc::now());
            let event = JobEvent::Failed {
                job_id: record.id,
                error: err.user_message(),
            };
            return self.record_settled(record, event);
        }

        let force = options.force_regenerate;
        let work = loop {
            if let Some(existing) = self.await_output(&output, force).await {
                tracing::debug!(job_id = %existing.job_id, "joining in-flight job");
                return Ok(existing);
            }

            if !force && artifact_exists(&inner.layout, input, &output, &options.request).await {
                return self.record_cached(record, input).await;
            }

            let work = self.plan_work(&mut record, input, &options.request).await?;

            // Planning may have awaited; claim the output atomically.
            match inner.registry.claim(JobHandle::from(&record), force) {
                Ok(_) => break work,
                Err(OutputClaim::Live(existing)) => {
                    tracing::debug!(job_id = %existing.job_id, "joining in-flight job");
                    return Ok(existing);
                }
                Err(OutputClaim::Settling(_)) => continue,
            }
        };
        if let Err(e) = inner.store.insert(&record) {
            inner.registry.finish(record.id, Finish::Failed(e.user_message()));
            inner.registry.settle(record.id);
            return Err(e);
        }
        if let Work::Hls { plan, .. } = &work {
            inner.ladders.lock().insert(record.id, plan.ladder.clone());
        }

        tracing::info!(
            job_id = %record.id,
            %media_id,
            %kind,
            %backend,
            output = %output.display(),
            "job accepted"
        );
        self.admit(record.id, work);

        inner.registry.snapshot(record.id).map_or_else(|| self.get_status(record.id), Ok)
    }

    /// Thumbnail at `offset_secs`, replacing any earlier one.
    pub async fn generate_thumbnail(
        &self,
        media_id: MediaId,
        input: &Path,
        offset_secs: f64,
    ) -> Result<JobHandle> {
        self.start_job(media_id, input, JobOptions::thumbnail(offset_secs).force(true))
            .await
    }

    /// `count` evenly spaced frames.
    pub async fn generate_storyboard(
        &self,
        media_id: MediaId,
        input: &Path,
        count: u32,
    ) -> Result<JobHandle> {
        self.start_job(media_id, input, JobOptions::storyboard(count))
            .await
    }

    /// Cancel a pending or processing job.
    ///
    /// The handle reports cancelled immediately. A running process group is
    /// terminated and partial artifacts are removed before the job settles.
    ///
    /// # Errors
    ///
    /// [`Error::Conflict`] when the job is already terminal,
    /// [`Error::NotFound`] when it is unknown.
    pub fn cancel_job(&self, id: JobId) -> Result<JobHandle> {
        let inner = &self.inner;
        let outcome = match inner.registry.request_cancel(id) {
            Ok(outcome) => outcome,
            Err(Error::NotFound { .. }) => return self.cancel_untracked(id),
            Err(e) => return Err(e),
        };

        if let Err(e) = inner.store.mark_cancelled(id) {
            tracing::error!(job_id = %id, error = %e, "failed to persist cancellation");
        }
        inner.events.emit(JobEvent::Cancelled { job_id: id });

        if outcome == CancelOutcome::Queued {
            inner.admission.lock().queue.retain(|(queued, _)| *queued != id);
            inner.registry.settle(id);
        }
        tracing::info!(job_id = %id, ?outcome, "job cancelled");

        self.get_status(id)
    }

    /// A row with no live handle, e.g. left behind by a previous process.
    fn cancel_untracked(&self, id: JobId) -> Result<JobHandle> {
        let row = self
            .inner
            .store
            .get(id)?
            .ok_or_else(|| Error::not_found("job", id))?;
        if row.status.is_terminal() {
            return Err(Error::Conflict(format!("job is already {}", row.status)));
        }
        self.inner.store.mark_cancelled(id)?;
        self.inner.events.emit(JobEvent::Cancelled { job_id: id });
        self.get_status(id)
    }

    /// Live handle if still in memory, else the persisted row.
    pub fn get_status(&self, id: JobId) -> Result<JobHandle> {
        if let Some(handle) = self.inner.registry.snapshot(id) {
            return Ok(handle);
        }
        self.inner
            .store
            .get(id)?
            .map(|row| JobHandle::from(&row))
            .ok_or_else(|| Error::not_found("job", id))
    }

    /// Resolve once the job has settled.
    pub async fn wait(&self, id: JobId) -> Result<JobHandle> {
        if let Some(mut settled) = self.inner.registry.watch_settled(id) {
            let _ = settled.wait_for(|done| *done).await;
        }
        self.get_status(id)
    }

    /// Cancel every live job and wait for all of them to settle.
    pub async fn shutdown(&self) -> usize {
        let ids = self.inner.registry.live_ids();
        for id in &ids {
            if let Err(e) = self.cancel_job(*id) {
                tracing::debug!(job_id = %id, error = %e, "skipped during shutdown");
            }
        }
        for id in &ids {
            let _ = self.wait(*id).await;
        }
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "cancelled live jobs on shutdown");
        }
        ids.len()
    }

    /// Drop settled handles older than the retention window.
    pub fn purge_expired(&self) -> usize {
        let inner = &self.inner;
        let purged = inner.registry.purge(inner.config.handle_retention());
        if purged > 0 {
            inner
                .ladders
                .lock()
                .retain(|id, _| inner.registry.status(*id).is_some());
            tracing::debug!(count = purged, "purged expired job handles");
        }
        purged
    }

    /// Periodically purge expired handles until `shutdown` fires.
    pub fn spawn_janitor(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        let period = this
            .inner
            .config
            .handle_retention()
            .clamp(Duration::from_secs(1), Duration::from_secs(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        this.purge_expired();
                    }
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    fn new_record(&self, media_id: MediaId, input: &Path, options: &JobOptions) -> Result<JobRecord> {
        let inner = &self.inner;
        let id = JobId::new();
        let layout = &inner.layout;
        let thumb_size = format!(
            "{}x{}",
            inner.config.thumbnail_width, inner.config.thumbnail_height
        );

        let record = match &options.request {
            JobRequest::SingleFile { profile, overrides } => {
                let profile = inner.catalog.lookup(profile).with_overrides(overrides);
                let output = layout.single_file(input, &profile.name, &profile.container);
                let mut r = JobRecord::pending(id, media_id, JobKind::SingleFile, input, output, &profile.container);
                r.target_resolution = Some(profile.resolution());
                r.profile_name = Some(profile.name);
                r
            }
            JobRequest::Hls { .. } => {
                JobRecord::pending(id, media_id, JobKind::Hls, input, layout.hls_master(input), "m3u8")
            }
            JobRequest::Thumbnail { offset_secs } => {
                if !offset_secs.is_finite() || *offset_secs < 0.0 {
                    return Err(Error::Validation(format!(
                        "thumbnail offset must be a non-negative number of seconds, got {offset_secs}"
                    )));
                }
                let mut r = JobRecord::pending(id, media_id, JobKind::Thumbnail, input, layout.thumbnail(input), "jpg");
                r.target_resolution = Some(thumb_size);
                r
            }
            JobRequest::Storyboard { count } => {
                if *count == 0 {
                    return Err(Error::Validation(
                        "storyboard frame count must be at least 1".into(),
                    ));
                }
                if *count > inner.config.max_storyboard_frames {
                    return Err(Error::Validation(format!(
                        "storyboard frame count {count} exceeds the limit of {}",
                        inner.config.max_storyboard_frames
                    )));
                }
                let mut r = JobRecord::pending(
                    id,
                    media_id,
                    JobKind::Storyboard,
                    input,
                    layout.storyboard_dir(input),
                    "jpg",
                );
                r.target_resolution = Some(thumb_size);
                r
            }
        };
        Ok(record)
    }

    async fn plan_work(
        &self,
        record: &mut JobRecord,
        input: &Path,
        request: &JobRequest,
    ) -> Result<Work> {
        let inner = &self.inner;
        let config = &inner.config;
        match request {
            JobRequest::SingleFile { profile, overrides } => {
                let profile = inner
                    .catalog
                    .lookup(profile)
                    .with_overrides(overrides)
                    .capped(config.max_video_bitrate_kbps);
                Ok(Work::Transcode(TranscodeSpec {
                    input: input.to_path_buf(),
                    output: record.output_path.clone(),
                    container: profile.container,
                    video_codec: profile.video_codec,
                    audio_codec: profile.audio_codec,
                    video_bitrate_kbps: profile.video_bitrate_kbps,
                    audio_bitrate_kbps: profile.audio_bitrate_kbps,
                    width: profile.width,
                    height: profile.height,
                    hw_accel: config.hw_accel,
                }))
            }
            JobRequest::Hls { max_height } => {
                let info = inner.prober.probe(input).await?;
                let plan = ladder::plan(record.id, &inner.layout, input, &info, *max_height, config)?;
                record.target_resolution = Some(plan.ladder.rung_names());
                Ok(Work::Hls {
                    plan,
                    total: info.duration(),
                })
            }
            JobRequest::Thumbnail { offset_secs } => Ok(Work::Thumbnail(thumbnails::thumbnail_spec(
                &inner.layout,
                input,
                Duration::from_secs_f64(*offset_secs),
                config,
            ))),
            JobRequest::Storyboard { count } => {
                let info = inner.prober.probe(input).await?;
                let plan = thumbnails::storyboard_plan(&inner.layout, input, &info, *count, config)?;
                Ok(Work::Storyboard(plan))
            }
        }
    }

    /// Wait out any job still cleaning up `output`, then return the live job
    /// holding it, unless `force` is set.
    async fn await_output(&self, output: &Path, force: bool) -> Option<JobHandle> {
        loop {
            match self.inner.registry.output_claim(output) {
                Some(OutputClaim::Settling(mut settled)) => {
                    tracing::debug!(output = %output.display(), "waiting for previous job to settle");
                    let _ = settled.wait_for(|done| *done).await;
                }
                Some(OutputClaim::Live(existing)) if !force => return Some(existing),
                _ => return None,
            }
        }
    }

    /// Serve an artifact a previous run produced.
    async fn record_cached(&self, mut record: JobRecord, input: &Path) -> Result<JobHandle> {
        let output = record.output_path.clone();
        tracing::info!(job_id = %record.id, kind = %record.kind, output = %output.display(), "artifact cached");
        let now = Utc::now();
        record.status = JobStatus::Completed;
        record.progress_percent = 100;
        record.started_at = Some(now);
        record.completed_at = Some(now);

        let ladder = if record.kind == JobKind::Hls {
            let ladder = self.cached_ladder(record.id, input).await;
            record.target_resolution = Some(ladder.rung_names());
            Some(ladder)
        } else {
            None
        };

        let event = JobEvent::Completed {
            job_id: record.id,
            output_path: output,
        };
        let handle = self.record_settled(record, event)?;
        if let Some(ladder) = ladder {
            self.inner.ladders.lock().insert(handle.job_id, ladder);
        }
        Ok(handle)
    }

    /// Rebuild a ladder from the rung playlists on disk.
    async fn cached_ladder(&self, id: JobId, input: &Path) -> HlsLadder {
        let inner = &self.inner;
        let mut variants = Vec::new();
        for rung in &ladder::DEFAULT_LADDER {
            let variant = ladder::variant(&inner.layout, input, rung, &inner.config);
            if is_file(&variant.playlist_path).await {
                variants.push(variant);
            }
        }
        HlsLadder {
            job_id: id,
            variants,
            master_playlist_path: inner.layout.hls_master(input),
        }
    }

    /// Persist a job that is terminal from the start and announce it.
    fn record_settled(&self, record: JobRecord, event: JobEvent) -> Result<JobHandle> {
        self.inner.store.insert(&record)?;
        let handle = JobHandle::from(&record);
        self.inner.registry.insert(handle.clone());
        self.inner.events.emit(event);
        Ok(handle)
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    fn admit(&self, id: JobId, work: Work) {
        let mut admission = self.inner.admission.lock();
        if admission.running < self.inner.config.concurrency() {
            admission.running += 1;
            drop(admission);
            self.launch(id, work);
        } else {
            tracing::debug!(job_id = %id, position = admission.queue.len() + 1, "job queued");
            admission.queue.push_back((id, work));
        }
    }

    fn launch(&self, id: JobId, work: Work) {
        let this = self.clone();
        tokio::spawn(async move { this.run_job(id, work).await });
    }

    /// Hand the slot to the next queued job, or give it back.
    fn release_slot(&self) {
        let next = {
            let mut admission = self.inner.admission.lock();
            let next = admission.queue.pop_front();
            if next.is_none() {
                admission.running = admission.running.saturating_sub(1);
            }
            next
        };
        if let Some((id, work)) = next {
            self.launch(id, work);
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn run_job(self, id: JobId, work: Work) {
        let inner = &self.inner;
        if !inner.registry.set_processing(id) {
            // Cancelled while queued.
            inner.registry.settle(id);
            self.release_slot();
            return;
        }
        if let Err(e) = inner.store.mark_processing(id) {
            tracing::error!(job_id = %id, error = %e, "failed to persist processing state");
        }
        inner.events.emit(JobEvent::Started { job_id: id });
        tracing::info!(job_id = %id, "job started");

        let cancel = inner.registry.cancel_token(id).unwrap_or_default();
        let result = self.execute(id, &work, &cancel).await;
        let committed = result.is_ok();

        let finish = match &result {
            Ok(()) => Finish::Completed,
            Err(Error::Cancelled) => Finish::Cancelled,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "job failed");
                Finish::Failed(e.user_message())
            }
        };
        let settlement = inner.registry.finish(id, finish);

        if settlement.status != JobStatus::Completed {
            work.remove_artifacts(id, committed).await;
        }

        if let Err(e) = self.persist_terminal(id, settlement.status, settlement.transitioned) {
            tracing::error!(job_id = %id, error = %e, "failed to persist terminal state");
        }

        inner.registry.settle(id);
        self.release_slot();
    }

    fn persist_terminal(&self, id: JobId, status: JobStatus, announce: bool) -> Result<()> {
        let inner = &self.inner;
        let handle = inner.registry.snapshot(id);
        match status {
            JobStatus::Completed => {
                let output = handle.map(|h| h.output_path).unwrap_or_default();
                inner.store.mark_completed(id, &output)?;
                if announce {
                    tracing::info!(job_id = %id, output = %output.display(), "job completed");
                    inner.events.emit(JobEvent::Completed {
                        job_id: id,
                        output_path: output,
                    });
                }
            }
            JobStatus::Failed => {
                let message = handle.and_then(|h| h.error).unwrap_or_default();
                inner.store.mark_failed(id, &message)?;
                if announce {
                    inner.events.emit(JobEvent::Failed {
                        job_id: id,
                        error: message,
                    });
                }
            }
            JobStatus::Cancelled => {
                // Usually already written by cancel_job; the guard makes this a no-op.
                inner.store.mark_cancelled(id)?;
                if announce {
                    inner.events.emit(JobEvent::Cancelled { job_id: id });
                }
            }
            JobStatus::Pending | JobStatus::Processing => {}
        }
        Ok(())
    }

    /// Run the backend into a staging path, verify the result, and rename it
    /// over the target. Nothing is written at the target until then.
    async fn execute(&self, id: JobId, work: &Work, cancel: &CancellationToken) -> Result<()> {
        let deadline = self.inner.config.job_timeout().map(|t| Instant::now() + t);
        let target = work.target();
        let staged = staging_path(target, id);

        match work {
            Work::Transcode(spec) => {
                prepare_file(&staged).await?;
                let total = self.source_duration(&spec.input).await;
                let source = total.map(|total| ProgressSource::PartialOutput {
                    path: staged.clone(),
                    total,
                    prober: self.inner.prober.clone(),
                });
                let request = Request::Transcode(TranscodeSpec {
                    output: staged.clone(),
                    ..spec.clone()
                });
                self.run_process(id, &request, source, cancel, deadline).await?;
                verify_output(&staged).await?;
            }
            Work::Hls { plan, total } => {
                prepare_dir(&staged).await?;
                let spec = HlsSpec {
                    output_dir: staged.clone(),
                    ..plan.spec.clone()
                };
                let source = match (total, spec.renditions.first()) {
                    (Some(total), Some(lowest)) => Some(ProgressSource::HlsSegments {
                        dir: staged.clone(),
                        prefix: segment_prefix(&spec.basename, &lowest.name),
                        segment_secs: spec.segment_secs,
                        total: *total,
                    }),
                    _ => None,
                };
                self.run_process(id, &Request::Hls(spec), source, cancel, deadline)
                    .await?;
                for artifact in plan.ladder.expected_artifacts() {
                    verify_output(&restage(artifact, &staged)).await?;
                }
            }
            Work::Thumbnail(spec) => {
                prepare_file(&staged).await?;
                let request = Request::Thumbnail(ThumbnailSpec {
                    output: staged.clone(),
                    ..spec.clone()
                });
                self.run_process(id, &request, None, cancel, deadline).await?;
                verify_output(&staged).await?;
            }
            Work::Storyboard(plan) => {
                prepare_dir(&staged).await?;
                let count = u32::try_from(plan.len()).unwrap_or(u32::MAX);
                for (done, frame) in (1u32..).zip(&plan.frames) {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    let frame = ThumbnailSpec {
                        output: restage(&frame.output, &staged),
                        ..frame.clone()
                    };
                    self.run_process(id, &Request::Thumbnail(frame.clone()), None, cancel, deadline)
                        .await?;
                    verify_output(&frame.output).await?;
                    self.report_progress(id, progress::frame_percent(done, count));
                }
            }
        }

        commit(&staged, target, work.is_dir()).await
    }

    /// Spawn `request`, poll progress while it runs, and map its exit.
    async fn run_process(
        &self,
        id: JobId,
        request: &Request,
        source: Option<ProgressSource>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let (backend, process) = self.inner.selector.spawn(request)?;
        tracing::debug!(job_id = %id, %backend, pid = ?process.id(), "backend process running");

        let poll_cancel = cancel.child_token();
        let poller = source.map(|source| {
            let sink: Arc<dyn ProgressSink> = Arc::new(JobProgress {
                manager: self.clone(),
                id,
            });
            progress::spawn_poller(
                source,
                self.inner.config.progress_interval(),
                sink,
                poll_cancel.clone(),
            )
        });

        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let outcome = process.wait(cancel, timeout).await;

        poll_cancel.cancel();
        if let Some(poller) = poller {
            let _ = poller.await;
        }

        exit_result(id, backend, outcome?)
    }

    async fn source_duration(&self, input: &Path) -> Option<Duration> {
        match self.inner.prober.probe(input).await {
            Ok(info) => info.duration(),
            Err(e) => {
                tracing::debug!(error = %e, "source not probed; no progress estimate");
                None
            }
        }
    }

    fn report_progress(&self, id: JobId, percent: u8) {
        let inner = &self.inner;
        let Some(stored) = inner.registry.set_progress(id, percent) else {
            return;
        };
        if let Err(e) = inner.store.update_progress(id, stored) {
            tracing::debug!(job_id = %id, error = %e, "progress not persisted");
        }
        inner.events.emit(JobEvent::Progress {
            job_id: id,
            percent: stored,
        });
    }
}

/// Progress sink bound to one job.
struct JobProgress {
    manager: JobManager,
    id: JobId,
}

impl ProgressSink for JobProgress {
    fn is_processing(&self) -> bool {
        self.manager.inner.registry.is_processing(self.id)
    }

    fn report(&self, percent: u8) {
        self.manager.report_progress(self.id, percent);
    }
}

fn exit_result(id: JobId, backend: BackendKind, outcome: ExitOutcome) -> Result<()> {
    match outcome {
        ExitOutcome::Exited { status, .. } if status.success() => Ok(()),
        ExitOutcome::Exited {
            status,
            stderr_tail,
        } => {
            tracing::warn!(job_id = %id, %backend, %status, stderr = %stderr_tail, "backend failed");
            Err(Error::backend(backend.to_string(), format!("exited with {status}")))
        }
        ExitOutcome::Cancelled => Err(Error::Cancelled),
        ExitOutcome::TimedOut(limit) => Err(Error::backend(
            backend.to_string(),
            format!("timed out after {}s", limit.as_secs()),
        )),
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Whether a previous run already produced the artifact at `output`.
///
/// A storyboard counts only when it holds exactly `count` frames, since a
/// different count spaces the frames differently.
async fn artifact_exists(
    layout: &OutputLayout,
    input: &Path,
    output: &Path,
    request: &JobRequest,
) -> bool {
    match request {
        JobRequest::Storyboard { count } => {
            for n in 1..=*count {
                if !is_file(&layout.storyboard_frame(input, n)).await {
                    return false;
                }
            }
            match count.checked_add(1) {
                Some(next) => !is_file(&layout.storyboard_frame(input, next)).await,
                None => false,
            }
        }
        _ => is_file(output).await,
    }
}

/// `path` moved from its target directory into `staged`.
fn restage(path: &Path, staged: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => staged.join(name),
        None => staged.to_path_buf(),
    }
}

/// Rename a verified result over `target`, replacing an older artifact.
async fn commit(staged: &Path, target: &Path, dir: bool) -> Result<()> {
    if dir {
        match tokio::fs::remove_dir_all(target).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
    }
    tokio::fs::rename(staged, target).await?;
    tracing::debug!(path = %target.display(), "artifact committed");
    Ok(())
}

/// Remove a stale staging file and make sure its directory exists.
async fn prepare_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Start from an empty directory.
async fn prepare_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

async fn verify_output(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(()),
        Err(_) => Err(Error::output_missing(path)),
    }
}
