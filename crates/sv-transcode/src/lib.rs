//! # sv-transcode
//!
//! The streamvio job engine.
//!
//! - [`profiles`] -- built-in encode targets and device-based selection.
//! - [`layout`] -- deterministic artifact paths.
//! - [`ladder`] -- HLS rung selection and planning.
//! - [`thumbnails`] -- thumbnail and storyboard planning.
//! - [`progress`] -- polling progress estimation.
//! - [`registry`] -- live job handles and their transitions.
//! - [`manager`] -- [`JobManager`], which admits, runs, cancels and settles
//!   jobs.

pub mod ladder;
pub mod layout;
pub mod manager;
pub mod profiles;
pub mod progress;
pub mod registry;
pub mod thumbnails;

pub use ladder::{HlsLadder, VariantStream};
pub use layout::OutputLayout;
pub use manager::{EngineDeps, JobManager, JobOptions, JobRequest};
pub use profiles::{
    select_optimal, ConnectionType, DeviceHints, ProfileCatalog, ProfileOverrides,
    TranscodeProfile,
};
pub use registry::JobHandle;
