//! Kubernetes adapters for the sidecar controller.
//!
//! - [`client`] - builds a [`kube::Client`] from a kubeconfig or in-cluster
//!   credentials
//! - [`cache`] - [`ReflectorCache`], the reflector-backed [`PodCache`](sidecar_reconciler::PodCache)
//! - [`watch`] - pod watch feeding keys into the work queue
//! - [`exec`] - [`KubeCommandExecutor`], running commands through the pods/exec
//!   subresource

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cache;
pub mod client;
pub mod exec;
pub mod watch;

pub use cache::{ReflectorCache, pod_key, snapshot_from_pod};
pub use client::connect;
pub use exec::{DEFAULT_EXEC_TIMEOUT, KubeCommandExecutor};
pub use watch::{EnqueuePolicy, PodWatch, spawn_pod_watch};
