#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # sidecar-controller
//!
//! Kubernetes controller that stops sidecar containers once every primary
//! container of their pod has finished.
//!
//! The binary wires the workspace crates together; this library holds the
//! process-level pieces so they can be tested: command line, configuration
//! and logging.

pub mod cli;
pub mod config;
pub mod logging;

pub use cli::Cli;
pub use config::{BackoffConfig, ConfigError, ControllerConfig, LogConfig};
pub use logging::LogFormat;
