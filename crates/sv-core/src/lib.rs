//! sv-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other sv-* crates,
//! providing typed identifiers, a unified error type, job and media types,
//! engine configuration, the job-store seam, and a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;
pub mod store;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
pub use store::{JobRecord, JobStore};
