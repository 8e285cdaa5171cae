//! # sv-av
//!
//! External media tool management for the streamvio engine.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to the
//!   native `streamvio-transcoder`, ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support, plus supervised process groups that can be cancelled as a unit.
//! - **Backend selection** ([`BackendSelector`]) -- native-first selection
//!   with a single fallback to ffmpeg when the native binary is absent.
//! - **Command builders** ([`actions`]) -- transcode, thumbnail and HLS
//!   ladder invocations for each backend.
//! - **Probe parsers** ([`probe`]) -- normalize native text and ffprobe JSON
//!   into [`sv_core::MediaInfo`].

pub mod actions;
pub mod backend;
pub mod command;
pub mod probe;
pub mod tools;

// ---- Re-exports for convenience ----

pub use actions::{HlsSpec, Rendition, Request, ThumbnailSpec, TranscodeSpec};
pub use backend::{BackendKind, BackendSelector, Operation};
pub use command::{ExitOutcome, SupervisedProcess, ToolCommand, ToolOutput};
pub use probe::{MediaProbe, ProbeOutput};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
