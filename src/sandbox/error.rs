//! Error types for the Docker execution sandbox.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur while executing a job in the sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The language tag is not one of the supported languages.
    #[error("Language {0} not supported")]
    UnsupportedLanguage(String),

    /// A caller-supplied job identifier is not path and container-name safe.
    #[error("Invalid job id '{id}': {reason}")]
    InvalidJobId { id: String, reason: String },

    /// Creating or writing the scratch directory failed.
    #[error("Error making file {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Docker daemon is not available or not running.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable { reason: String },

    /// The sandbox image is missing and could not be pulled.
    #[error("Image {image} unavailable: {reason}")]
    ImageUnavailable { image: String, reason: String },

    /// Failed to create container.
    #[error("Container creation failed: {reason}")]
    ContainerCreationFailed { reason: String },

    /// Failed to start container.
    #[error("Container start failed: {reason}")]
    ContainerStartFailed { reason: String },

    /// Waiting for the container to exit failed.
    #[error("Container wait failed: {reason}")]
    WaitFailed { reason: String },

    /// Reading the container's log stream failed.
    #[error("Log retrieval failed: {reason}")]
    LogRetrievalFailed { reason: String },

    /// The job ran past its deadline.
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    /// Container resource limit exceeded.
    #[error("Resource limit exceeded: {resource} limit of {limit}")]
    ResourceLimitExceeded { resource: String, limit: String },

    /// Removing the container failed. Only ever logged during teardown.
    #[error("Container removal failed: {reason}")]
    RemovalFailed { reason: String },
}

impl SandboxError {
    /// Whether the error was caused by the caller's input rather than the
    /// execution environment.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SandboxError::UnsupportedLanguage(_) | SandboxError::InvalidJobId { .. }
        )
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SandboxError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
