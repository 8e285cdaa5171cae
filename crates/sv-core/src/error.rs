//! Unified error type for the streamvio engine.
//!
//! All crates funnel their failures into [`Error`]. Job failures are captured
//! by the job manager and stored on the job row using
//! [`Error::user_message`]; the full `Display` form (which may include paths
//! and backend diagnostics) is meant for logs only.

use std::fmt;
use std::path::PathBuf;

/// Unified error type covering all failure modes in streamvio.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The request conflicts with the current state of the entity.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No usable execution backend is available. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The input media file does not exist.
    #[error("Input not found: {}", path.display())]
    InputNotFound {
        /// The path that was checked.
        path: PathBuf,
    },

    /// A backend process exited non-zero, timed out, or produced output that
    /// could not be parsed.
    #[error("Backend error [{backend}]: {message}")]
    BackendExecution {
        /// Name of the backend that failed.
        backend: String,
        /// Diagnostic description (may contain stderr excerpts).
        message: String,
    },

    /// The backend reported success but the expected artifact is missing.
    #[error("Output verification failed: {} does not exist", path.display())]
    OutputVerification {
        /// The artifact path that was expected.
        path: PathBuf,
    },

    /// The job was cancelled. Terminal, but not a failure.
    #[error("Cancelled")]
    Cancelled,

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code for API layers
    /// built on top of the engine.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Conflict(_) => 409,
            Error::Configuration(_) => 503,
            Error::InputNotFound { .. } => 404,
            Error::BackendExecution { .. } => 502,
            Error::OutputVerification { .. } => 502,
            Error::Cancelled => 409,
            Error::Probe(_) => 422,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short, human-readable message suitable for storing on a job row.
    ///
    /// Never includes filesystem paths or raw backend output.
    pub fn user_message(&self) -> String {
        match self {
            Error::NotFound { entity, .. } => format!("{entity} not found"),
            Error::Validation(msg) | Error::Conflict(msg) => msg.clone(),
            Error::Configuration(_) => "no usable media backend is configured".into(),
            Error::InputNotFound { .. } => "input file not found".into(),
            Error::BackendExecution { backend, message } if message.starts_with("timed out") => {
                format!("{backend} timed out")
            }
            Error::BackendExecution { backend, .. } => {
                format!("{backend} failed to process the media")
            }
            Error::OutputVerification { .. } => {
                "backend reported success but produced no output".into()
            }
            Error::Cancelled => "cancelled".into(),
            Error::Probe(_) => "media could not be analyzed".into(),
            Error::Database { .. } => "storage error".into(),
            Error::Io { .. } => "filesystem error".into(),
            Error::Internal(_) => "internal error".into(),
        }
    }

    /// Whether this error indicates that no backend could be used.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::BackendExecution`].
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::BackendExecution {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::InputNotFound`].
    pub fn input_not_found(path: impl Into<PathBuf>) -> Self {
        Error::InputNotFound { path: path.into() }
    }

    /// Convenience constructor for [`Error::OutputVerification`].
    pub fn output_missing(path: impl Into<PathBuf>) -> Self {
        Error::OutputVerification { path: path.into() }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
