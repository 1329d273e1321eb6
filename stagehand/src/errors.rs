//! Error types for staging task orchestration.
//!
//! Every failure a staging task can produce is represented here so that
//! callers receive a single error taxonomy regardless of which pipeline
//! step failed.

use thiserror::Error;

/// The main error type for staging operations.
#[derive(Debug, Error)]
pub enum StagingError {
    /// Downloading or uploading an archive failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The container runtime rejected or failed an operation.
    #[error("Container error: {0}")]
    Container(String),

    /// The container runtime reported no filesystem root for the container.
    #[error("Container info did not include a filesystem path")]
    ContainerRootMissing,

    /// A script run inside the container exited with a non-zero status.
    #[error("Staging step '{step}' failed with exit status {exit_status}")]
    Build {
        /// The pipeline step that ran the script.
        step: String,
        /// The exit status reported by the container runtime.
        exit_status: u32,
    },

    /// The task was handed an invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The task was started more than once.
    #[error("Staging task has already been started")]
    AlreadyStarted,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error from workspace or droplet handling.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP-level error from the archive transport.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A generic internal error, including panicked pipeline steps.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StagingError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a container error.
    #[must_use]
    pub fn container(message: impl Into<String>) -> Self {
        Self::Container(message.into())
    }

    /// Creates a build error for a failed in-container script.
    #[must_use]
    pub fn build(step: impl Into<String>, exit_status: u32) -> Self {
        Self::Build {
            step: step.into(),
            exit_status,
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` if this error came from a script run inside the
    /// container rather than from the orchestration around it.
    #[must_use]
    pub fn is_build_failure(&self) -> bool {
        matches!(self, Self::Build { .. })
    }
}
