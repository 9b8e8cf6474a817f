//! Error types for the reconciler crate.

use std::fmt;

use sidecar_core::PodKey;
use tracing::error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug)]
pub enum Error {
    /// The pod cache could not answer a lookup.
    Lookup(sidecar_core::Error),
    /// A worker task ended abnormally.
    WorkerFailed { reason: String },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lookup(e) => write!(f, "{e}"),
            Self::WorkerFailed { reason } => {
                write!(f, "reconciliation worker failed: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Lookup(e) => Some(e),
            Self::WorkerFailed { .. } | Self::InvalidConfig { .. } => None,
        }
    }
}

impl From<sidecar_core::Error> for Error {
    fn from(e: sidecar_core::Error) -> Self {
        Self::Lookup(e)
    }
}

impl Error {
    /// Create a worker failed error.
    pub fn worker_failed(reason: impl Into<String>) -> Self {
        Self::WorkerFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same key later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Lookup(e) => e.is_transient(),
            Self::WorkerFailed { .. } | Self::InvalidConfig { .. } => false,
        }
    }
}

/// Process-wide sink for errors the loop has given up on.
///
/// Abandoned keys are not fatal to the controller.
pub fn report_error(key: &PodKey, err: &Error) {
    error!(
        key = %key,
        error = %err,
        transient = err.is_transient(),
        "Dropping pod out of the work queue"
    );
}
