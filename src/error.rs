//! Error handling for relayctl.
use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::service::ServiceState;

/// Defines all possible errors that can occur while managing the relay service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The caller lacks the privileges the operation requires.
    #[error("{operation} requires elevated privileges: {hint}")]
    PermissionDenied {
        /// Operation that was refused.
        operation: &'static str,
        /// How to obtain the missing privileges on this platform.
        hint: &'static str,
    },

    /// A native descriptor already exists for the service.
    #[error("Service '{0}' is already installed; uninstall it first")]
    AlreadyInstalled(String),

    /// No native descriptor exists for the service.
    #[error("Service '{0}' is not installed")]
    NotInstalled(String),

    /// The platform supervisor could not be reached.
    #[error("Service supervisor unavailable: {0}")]
    BackendUnavailable(String),

    /// A start or stop transition did not settle within the polling bound.
    #[error("Timed out after {waited:?} waiting for service '{service}' to become {target}")]
    Timeout {
        /// The service being waited on.
        service: String,
        /// State the service was expected to reach.
        target: ServiceState,
        /// Total time spent polling.
        waited: Duration,
    },

    /// There is no log source to follow or tail yet.
    #[error("No log stream available: {0}")]
    StreamUnavailable(String),

    /// Install options are out of range or reference missing files.
    #[error("Invalid install options: {0}")]
    InvalidSpec(String),

    /// The platform supervisor rejected a request.
    #[error("Failed to {action}: {detail}")]
    BackendFailure {
        /// Short description of the attempted action.
        action: String,
        /// Error text reported by the supervisor.
        detail: String,
    },

    /// Local I/O failed (descriptor writes, directory creation, stream reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Shorthand for a [`ServiceError::BackendFailure`].
    pub fn backend(action: impl Into<String>, detail: impl ToString) -> Self {
        ServiceError::BackendFailure {
            action: action.into(),
            detail: detail.to_string(),
        }
    }
}

/// Error type for manager settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the settings file.
    #[error("Failed to read settings file {path}: {source}")]
    ReadError {
        /// The settings file that could not be read.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing YAML settings.
    #[error("Invalid YAML format: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A `${VAR}` reference names an unset environment variable.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    /// Per-user paths were requested but no home directory is known.
    #[error("Unable to determine the home directory for per-user service paths")]
    NoHomeDirectory,
}
