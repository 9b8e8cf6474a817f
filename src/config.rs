//! Controller configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, the TOML
//! file given with `--config`, and command-line flags (including
//! `KUBECONFIG`).

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sidecar_reconciler::{
    DEFAULT_MAX_RETRIES, DEFAULT_SIDECAR_ANNOTATION, default_termination_command,
};
use sidecar_workqueue::{ItemExponentialBackoff, MaxOf, TokenBucket};
use thiserror::Error;

use crate::cli::Cli;
use crate::logging::{self, LogFormat};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the controller process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Kubeconfig path; in-cluster credentials when unset.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Number of concurrent reconciliation workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Annotation listing a pod's sidecar containers.
    #[serde(default = "default_annotation")]
    pub sidecar_annotation: String,

    /// Ignore whitespace around names in the sidecar annotation.
    #[serde(default = "default_true")]
    pub trim_annotation_names: bool,

    /// Rate-limited retries before a key is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Command executed inside each sidecar to stop it.
    #[serde(default = "default_termination_command")]
    pub termination_command: Vec<String>,

    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    #[serde(default = "default_cache_sync_timeout")]
    pub cache_sync_timeout_secs: u64,

    /// Reconcile pods seen during the initial list.
    #[serde(default = "default_true")]
    pub reconcile_on_initial_sync: bool,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            workers: default_workers(),
            sidecar_annotation: default_annotation(),
            trim_annotation_names: default_true(),
            max_retries: default_max_retries(),
            termination_command: default_termination_command(),
            exec_timeout_secs: default_exec_timeout(),
            cache_sync_timeout_secs: default_cache_sync_timeout(),
            reconcile_on_initial_sync: default_true(),
            backoff: BackoffConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build the effective configuration from the command line.
    ///
    /// `home` is used to expand a leading `~` in the kubeconfig path.
    pub fn resolve(cli: &Cli, home: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match cli.config.as_deref() {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.kubeconfig = config
            .kubeconfig
            .as_deref()
            .and_then(first_path)
            .map(|path| expand_home(&path, home));
        config.validate()?;
        Ok(config)
    }

    /// Override file values with the flags that were given.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(path) = &cli.kubeconfig {
            self.kubeconfig = Some(path.clone());
        }
        if let Some(workers) = cli.workers {
            self.workers = workers;
        }
        if let Some(annotation) = &cli.annotation {
            self.sidecar_annotation.clone_from(annotation);
        }
        if let Some(max_retries) = cli.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(secs) = cli.exec_timeout_secs {
            self.exec_timeout_secs = secs;
        }
        if let Some(secs) = cli.cache_sync_timeout_secs {
            self.cache_sync_timeout_secs = secs;
        }
        if let Some(level) = &cli.log_level {
            self.log.level.clone_from(level);
        }
        if let Some(format) = cli.log_format {
            self.log.format = format;
        }
        if cli.no_initial_sync {
            self.reconcile_on_initial_sync = false;
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid(
                "workers must be greater than 0".to_string(),
            ));
        }

        if self.sidecar_annotation.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "sidecar_annotation must not be empty".to_string(),
            ));
        }

        if self.termination_command.is_empty() {
            return Err(ConfigError::Invalid(
                "termination_command must not be empty".to_string(),
            ));
        }

        if self.exec_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "exec_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.cache_sync_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache_sync_timeout_secs must be greater than 0".to_string(),
            ));
        }

        self.backoff.validate()?;
        logging::validate_filter(&self.log.level)
            .map_err(|e| ConfigError::Invalid(format!("log.level: {e}")))?;

        Ok(())
    }

    pub const fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub const fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }
}

/// Requeue backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    /// First retry delay.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on the per-key delay.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Overall requeue rate across all keys.
    #[serde(default = "default_qps")]
    pub qps: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            qps: default_qps(),
            burst: default_burst(),
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "backoff.base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.base_delay() > self.max_delay() {
            return Err(ConfigError::Invalid(
                "backoff.base_delay_ms must not exceed backoff.max_delay_secs".to_string(),
            ));
        }
        if !self.qps.is_finite() || self.qps <= 0.0 {
            return Err(ConfigError::Invalid(
                "backoff.qps must be a positive number".to_string(),
            ));
        }
        if self.burst == 0 {
            return Err(ConfigError::Invalid(
                "backoff.burst must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub const fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    /// Per-key exponential backoff combined with the overall token bucket.
    pub fn rate_limiter<K>(&self) -> MaxOf<K>
    where
        K: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    {
        MaxOf::new(vec![
            Box::new(ItemExponentialBackoff::<K>::new(
                self.base_delay(),
                self.max_delay(),
            )),
            Box::new(TokenBucket::new(self.qps, self.burst)),
        ])
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Level or filter directives, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// First entry of a path list such as `KUBECONFIG=a:b`; `None` when empty.
fn first_path(list: &Path) -> Option<PathBuf> {
    std::env::split_paths(list.as_os_str()).find(|path| !path.as_os_str().is_empty())
}

/// Replace a leading `~` component with the home directory.
///
/// Only the first component is expanded: `~/x` and `~` are, while
/// `~user/x` and a `~` later in the path are kept as written.
pub fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

fn default_workers() -> usize {
    1
}

fn default_annotation() -> String {
    DEFAULT_SIDECAR_ANNOTATION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_exec_timeout() -> u64 {
    30
}

fn default_cache_sync_timeout() -> u64 {
    120
}

fn default_base_delay_ms() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    1000
}

fn default_qps() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}
