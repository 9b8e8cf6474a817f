//! CLI definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::Parser;

use crate::logging::LogFormat;

/// Sidecar controller
#[derive(Parser, Debug, Default)]
#[command(name = "sidecar-controller")]
#[command(version)]
#[command(about = "Stops sidecar containers once a pod's primary containers have finished")]
#[command(
    long_about = "Watches pods in every namespace. When all containers of a pod have settled and only the containers named in its sidecar annotation are still running, a termination command is executed inside each of them."
)]
pub struct Cli {
    /// Path to a kubeconfig file (in-cluster credentials when unset)
    #[arg(long, env = "KUBECONFIG", value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of concurrent reconciliation workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Annotation listing a pod's sidecar containers
    #[arg(long, value_name = "KEY")]
    pub annotation: Option<String>,

    /// Rate-limited retries before a pod is dropped from the queue
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Timeout for a single termination command
    #[arg(long, value_name = "SECONDS")]
    pub exec_timeout_secs: Option<u64>,

    /// How long to wait for the initial pod list
    #[arg(long, value_name = "SECONDS")]
    pub cache_sync_timeout_secs: Option<u64>,

    /// Log level or filter directives (overridden by RUST_LOG)
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Do not reconcile pods seen during the initial list
    #[arg(long, default_value_t = false)]
    pub no_initial_sync: bool,
}
