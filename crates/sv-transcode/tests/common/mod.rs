//! Shared harness for job manager tests.
//!
//! Builds a [`JobManager`] over an in-memory SQLite store, a temporary output
//! directory, and fake backend binaries written as shell scripts.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sv_av::tools::{FFMPEG, NATIVE_TRANSCODER};
use sv_av::{BackendSelector, MediaProbe, ToolRegistry};
use sv_core::config::TranscodeConfig;
use sv_core::events::EventBus;
use sv_core::{JobId, JobStatus, MediaInfo};
use sv_db::{init_memory_pool, SqliteJobStore};
use sv_transcode::{EngineDeps, JobHandle, JobManager, ProfileCatalog};
use tempfile::TempDir;

/// Prober that describes every path the same way.
pub struct FixedProbe(pub MediaInfo);

#[async_trait]
impl MediaProbe for FixedProbe {
    async fn probe(&self, path: &Path) -> sv_core::Result<MediaInfo> {
        Ok(MediaInfo {
            path: path.to_path_buf(),
            ..self.0.clone()
        })
    }
}

/// 100 seconds of 720p video with stereo audio.
pub fn movie_info() -> MediaInfo {
    MediaInfo {
        format: "matroska".into(),
        duration_ms: 100_000,
        width: 1280,
        height: 720,
        video_codec: Some("h264".into()),
        audio_codec: Some("aac".into()),
        audio_channels: Some(2),
        ..Default::default()
    }
}

pub struct TestHarness {
    pub dir: TempDir,
    pub store: Arc<SqliteJobStore>,
    pub events: Arc<EventBus>,
    pub manager: JobManager,
}

pub struct HarnessBuilder {
    dir: TempDir,
    config: TranscodeConfig,
    tools: Vec<(&'static str, PathBuf)>,
    info: MediaInfo,
    store: Option<Arc<SqliteJobStore>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            config: TranscodeConfig {
                progress_interval_secs: 1,
                ..Default::default()
            },
            tools: Vec::new(),
            info: movie_info(),
            store: None,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(mut self, f: impl FnOnce(&mut TranscodeConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn probe(mut self, info: MediaInfo) -> Self {
        self.info = info;
        self
    }

    pub fn store(mut self, store: Arc<SqliteJobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Install a fake `streamvio-transcoder` running `body`.
    pub fn native(mut self, body: &str) -> Self {
        let path = write_script(self.dir.path(), NATIVE_TRANSCODER, body);
        self.tools.push((NATIVE_TRANSCODER, path));
        self
    }

    /// Point the native transcoder at `path`, which may not exist.
    pub fn native_at(mut self, path: PathBuf) -> Self {
        self.tools.push((NATIVE_TRANSCODER, path));
        self
    }

    /// Install a fake `ffmpeg` running `body`.
    pub fn ffmpeg(mut self, body: &str) -> Self {
        let path = write_script(self.dir.path(), FFMPEG, body);
        self.tools.push((FFMPEG, path));
        self
    }

    pub fn build(self) -> TestHarness {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(SqliteJobStore::new(init_memory_pool().unwrap())));
        let events = Arc::new(EventBus::default());
        let deps = EngineDeps {
            config: self.config,
            output_dir: self.dir.path().join("out"),
            catalog: ProfileCatalog::builtin(),
            selector: BackendSelector::new(ToolRegistry::with_tools(self.tools)),
            prober: Arc::new(FixedProbe(self.info)),
            store: store.clone(),
            events: events.clone(),
        };
        TestHarness {
            dir: self.dir,
            store,
            events,
            manager: JobManager::new(deps).unwrap(),
        }
    }
}

impl TestHarness {
    pub fn out(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Create an input file under the harness directory.
    pub fn input(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("media").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"source media").unwrap();
        path
    }

    /// Names of everything directly under the output directory, sorted.
    pub fn out_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.out())
            .map(|dir| {
                dir.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Lines the fake backends appended to `calls.log`.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("calls.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("calls.log")
    }

    pub async fn wait(&self, id: JobId) -> JobHandle {
        tokio::time::timeout(Duration::from_secs(20), self.manager.wait(id))
            .await
            .expect("job did not settle in time")
            .unwrap()
    }

    /// Poll until the job reaches `status`.
    pub async fn wait_for_status(&self, id: JobId, status: JobStatus) {
        for _ in 0..500 {
            if self.manager.get_status(id).unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {id} never reached {status}");
    }
}

/// Write an executable `/bin/sh` script. `$LOG` in `body` expands to the
/// harness call log.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let log = dir.join("calls.log");
    let path = dir.join(name);
    let script = format!("#!/bin/sh\nLOG='{}'\n{body}\n", log.display());
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Native transcoder that logs each call as `<command> <input name>`, then
/// runs `extra` before writing its output.
pub fn native_body(extra: &str) -> String {
    format!(
        r#"echo "$1 $(basename "$2")" >> "$LOG"
{extra}
case "$1" in
  transcode) printf 'encoded' > "$3" ;;
  thumbnail) printf 'jpeg' > "$3" ;;
  *) exit 2 ;;
esac"#
    )
}
