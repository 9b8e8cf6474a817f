//! Core error types for sidecar controller operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for sidecar controller operations.
#[derive(Debug, Error)]
pub enum Error {
    // Reconciliation errors
    #[error("failed to look up '{key}' in the pod cache: {reason}")]
    CacheLookupFailed { key: String, reason: String },

    #[error("pod cache did not sync: {reason}")]
    CacheSyncFailed { reason: String },

    #[error("exec in container '{container}' of pod '{pod}' failed: {reason}")]
    ExecFailed {
        pod: String,
        container: String,
        reason: String,
    },

    #[error("exec in container '{container}' of pod '{pod}' timed out after {timeout_ms}ms")]
    ExecTimeout {
        pod: String,
        container: String,
        timeout_ms: u64,
    },

    // Startup errors
    #[error("failed to load kubeconfig '{path}': {reason}")]
    KubeconfigFailed { path: PathBuf, reason: String },

    #[error("failed to build cluster client: {reason}")]
    ClientFailed { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a cache lookup error.
    pub fn cache_lookup_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CacheLookupFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a cache sync error.
    pub fn cache_sync_failed(reason: impl Into<String>) -> Self {
        Self::CacheSyncFailed {
            reason: reason.into(),
        }
    }

    /// Create an exec error.
    pub fn exec_failed(
        pod: impl Into<String>,
        container: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ExecFailed {
            pod: pod.into(),
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Create a kubeconfig error.
    pub fn kubeconfig_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::KubeconfigFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a client construction error.
    pub fn client_failed(reason: impl Into<String>) -> Self {
        Self::ClientFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether a reconciliation that hit this error should be requeued.
    ///
    /// Startup errors are fatal and never retried by the work queue.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CacheLookupFailed { .. }
                | Self::ExecFailed { .. }
                | Self::ExecTimeout { .. }
        )
    }
}
