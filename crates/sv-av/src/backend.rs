//! Execution backend selection.
//!
//! Two backends can run media work: the native `streamvio-transcoder`
//! binary and the general-purpose ffmpeg/ffprobe pair. The native backend is
//! preferred whenever it is installed and supports the operation. If a
//! command built for it cannot be started because the binary has gone
//! missing, the request is rebuilt for the general backend and tried exactly
//! once more.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sv_core::{Error, MediaInfo, Result};

use crate::actions::{self, hls, thumbnail, transcode, Request};
use crate::command::{SupervisedProcess, ToolCommand, ToolOutput};
use crate::probe::{MediaProbe, ProbeOutput};
use crate::tools::{ToolRegistry, FFMPEG, FFPROBE, NATIVE_TRANSCODER};

/// Kind of work a backend is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Probe,
    Transcode,
    Thumbnail,
    Hls,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::Transcode => write!(f, "transcode"),
            Self::Thumbnail => write!(f, "thumbnail"),
            Self::Hls => write!(f, "hls"),
        }
    }
}

/// Which backend ran (or will run) a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The native `streamvio-transcoder` binary.
    Native,
    /// ffmpeg / ffprobe.
    General,
}

impl BackendKind {
    /// The native tool has no HLS mode.
    pub fn supports(self, op: Operation) -> bool {
        match self {
            Self::Native => op != Operation::Hls,
            Self::General => true,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::General => write!(f, "ffmpeg"),
        }
    }
}

/// Picks a backend per operation and builds/runs its commands.
#[derive(Debug, Clone)]
pub struct BackendSelector {
    tools: ToolRegistry,
}

impl BackendSelector {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn general_tool(op: Operation) -> &'static str {
        match op {
            Operation::Probe => FFPROBE,
            _ => FFMPEG,
        }
    }

    /// Whether `backend` is installed and able to run `op`.
    pub fn is_usable(&self, backend: BackendKind, op: Operation) -> bool {
        if !backend.supports(op) {
            return false;
        }
        match backend {
            BackendKind::Native => self.tools.is_available(NATIVE_TRANSCODER),
            BackendKind::General => self.tools.is_available(Self::general_tool(op)),
        }
    }

    /// Preferred backend for `op`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when neither backend can run `op`.
    pub fn select(&self, op: Operation) -> Result<BackendKind> {
        [BackendKind::Native, BackendKind::General]
            .into_iter()
            .find(|b| self.is_usable(*b, op))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "no backend can {op}: install {} or configure tools.native_transcoder_path",
                    Self::general_tool(op)
                ))
            })
    }

    /// Build the command that runs `request` on `backend`.
    pub fn build(&self, backend: BackendKind, request: &Request) -> Result<ToolCommand> {
        match backend {
            BackendKind::Native => {
                let native = &self.tools.require(NATIVE_TRANSCODER)?.path;
                match request {
                    Request::Probe { input } => Ok(actions::native_info_command(native, input)),
                    Request::Transcode(spec) => Ok(transcode::native_command(native, spec)),
                    Request::Thumbnail(spec) => Ok(thumbnail::native_command(native, spec)),
                    Request::Hls(_) => Err(Error::Configuration(
                        "the native transcoder cannot build HLS ladders".into(),
                    )),
                }
            }
            BackendKind::General => {
                let tool = &self.tools.require(Self::general_tool(request.operation()))?.path;
                Ok(match request {
                    Request::Probe { input } => actions::ffprobe_command(tool, input),
                    Request::Transcode(spec) => transcode::ffmpeg_command(tool, spec),
                    Request::Thumbnail(spec) => thumbnail::ffmpeg_command(tool, spec),
                    Request::Hls(spec) => hls::ffmpeg_command(tool, spec),
                })
            }
        }
    }

    /// The single permitted recovery: native binary absent at spawn time.
    fn fallback_for(&self, tried: BackendKind, op: Operation, err: &Error) -> Option<BackendKind> {
        (tried == BackendKind::Native
            && err.is_configuration()
            && self.is_usable(BackendKind::General, op))
        .then_some(BackendKind::General)
    }

    /// Run `request` to completion and capture its output.
    pub async fn run(&self, request: &Request) -> Result<(BackendKind, ToolOutput)> {
        let op = request.operation();
        let backend = self.select(op)?;

        match self.build(backend, request)?.execute().await {
            Ok(output) => Ok((backend, output)),
            Err(e) => match self.fallback_for(backend, op, &e) {
                Some(next) => {
                    tracing::warn!(operation = %op, error = %e, "native backend unavailable; falling back to {next}");
                    let output = self.build(next, request)?.execute().await?;
                    Ok((next, output))
                }
                None => Err(e),
            },
        }
    }

    /// Start `request` as a supervised process group.
    pub fn spawn(&self, request: &Request) -> Result<(BackendKind, SupervisedProcess)> {
        let op = request.operation();
        let backend = self.select(op)?;

        match self.build(backend, request)?.spawn() {
            Ok(process) => Ok((backend, process)),
            Err(e) => match self.fallback_for(backend, op, &e) {
                Some(next) => {
                    tracing::warn!(operation = %op, error = %e, "native backend unavailable; falling back to {next}");
                    let process = self.build(next, request)?.spawn()?;
                    Ok((next, process))
                }
                None => Err(e),
            },
        }
    }

    /// Probe `path` and return the raw, backend-tagged output.
    pub async fn probe_output(&self, path: &Path) -> Result<ProbeOutput> {
        let request = Request::Probe {
            input: path.to_path_buf(),
        };
        let (backend, output) = self.run(&request).await?;
        Ok(match backend {
            BackendKind::Native => ProbeOutput::NativeText(output.stdout),
            BackendKind::General => ProbeOutput::FfprobeJson(output.stdout),
        })
    }
}

#[async_trait]
impl MediaProbe for BackendSelector {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        if !path.exists() {
            return Err(Error::input_not_found(path));
        }
        self.probe_output(path).await?.normalize(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn registry(names: &[&str]) -> ToolRegistry {
        ToolRegistry::with_tools(names.iter().map(|n| (*n, PathBuf::from(format!("/opt/bin/{n}")))))
    }

    #[test]
    fn prefers_native_when_present() {
        let selector = BackendSelector::new(registry(&[NATIVE_TRANSCODER, FFMPEG, FFPROBE]));
        assert_eq!(selector.select(Operation::Transcode).unwrap(), BackendKind::Native);
        assert_eq!(selector.select(Operation::Probe).unwrap(), BackendKind::Native);
        assert_eq!(selector.select(Operation::Thumbnail).unwrap(), BackendKind::Native);
    }

    #[test]
    fn hls_always_uses_general_backend() {
        let selector = BackendSelector::new(registry(&[NATIVE_TRANSCODER, FFMPEG]));
        assert_eq!(selector.select(Operation::Hls).unwrap(), BackendKind::General);

        let native_only = BackendSelector::new(registry(&[NATIVE_TRANSCODER]));
        assert!(native_only.select(Operation::Hls).unwrap_err().is_configuration());
    }

    #[test]
    fn probe_needs_ffprobe_not_ffmpeg() {
        let selector = BackendSelector::new(registry(&[FFMPEG]));
        assert_eq!(selector.select(Operation::Transcode).unwrap(), BackendKind::General);
        assert!(selector.select(Operation::Probe).is_err());
    }

    #[test]
    fn nothing_installed_is_configuration_error() {
        let selector = BackendSelector::new(ToolRegistry::default());
        for op in [
            Operation::Probe,
            Operation::Transcode,
            Operation::Thumbnail,
            Operation::Hls,
        ] {
            let err = selector.select(op).unwrap_err();
            assert!(err.is_configuration(), "{op}: {err}");
        }
    }

    #[test]
    fn builds_backend_specific_commands() {
        let selector = BackendSelector::new(registry(&[NATIVE_TRANSCODER, FFPROBE]));
        let request = Request::Probe {
            input: PathBuf::from("/media/a.mp4"),
        };
        let native = selector.build(BackendKind::Native, &request).unwrap();
        assert_eq!(native.get_args(), &["info", "/media/a.mp4"]);
        let general = selector.build(BackendKind::General, &request).unwrap();
        assert_eq!(general.program(), &PathBuf::from("/opt/bin/ffprobe"));
        assert!(general.get_args().iter().any(|a| a == "-show_streams"));
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_native_binary_falls_back_once() {
        let dir = tempfile::tempdir().unwrap();
        let ffprobe = write_script(
            dir.path(),
            "ffprobe",
            r#"echo '{"format": {"format_name": "mp4", "duration": "42.0"}, "streams": []}'"#,
        );
        let input = dir.path().join("movie.mp4");
        std::fs::write(&input, b"x").unwrap();

        // Registered, but deleted before execution.
        let tools = ToolRegistry::with_tools([
            (NATIVE_TRANSCODER, dir.path().join("gone-transcoder")),
            (FFPROBE, ffprobe),
        ]);
        let selector = BackendSelector::new(tools);

        let output = selector.probe_output(&input).await.unwrap();
        assert!(matches!(output, ProbeOutput::FfprobeJson(_)));
        let info = selector.probe(&input).await.unwrap();
        assert_eq!(info.duration_ms, 42_000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn native_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let native = write_script(dir.path(), "streamvio-transcoder", "echo broken >&2; exit 1");
        let ffprobe = write_script(dir.path(), "ffprobe", "exit 0");
        let input = dir.path().join("movie.mp4");
        std::fs::write(&input, b"x").unwrap();

        let selector = BackendSelector::new(ToolRegistry::with_tools([
            (NATIVE_TRANSCODER, native),
            (FFPROBE, ffprobe),
        ]));
        let err = selector.probe(&input).await.unwrap_err();
        assert!(
            matches!(err, Error::BackendExecution { ref message, .. } if message.contains("broken")),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn probe_missing_input() {
        let selector = BackendSelector::new(registry(&[FFPROBE]));
        let err = selector.probe(Path::new("/nonexistent/movie.mkv")).await.unwrap_err();
        assert!(matches!(err, Error::InputNotFound { .. }));
    }
}
