//! K8s-style reconciliation loop that stops sidecar containers.
//!
//! Pods may run helper containers (a proxy, a log shipper) next to the
//! containers doing the actual work. Batch pods never complete while such a
//! sidecar keeps running, so this crate watches for the moment every primary
//! container has finished and asks the remaining sidecars to stop.
//!
//! # Key Concepts
//!
//! ## Reconciliation
//!
//! Each worker repeatedly:
//! 1. Takes a pod key from the [`WorkQueue`](sidecar_workqueue::WorkQueue)
//! 2. Loads the pod from the [`PodCache`]
//! 3. Asks the [`ShutdownEvaluator`] which sidecars to stop
//! 4. Runs the termination command in each of them via the [`CommandExecutor`]
//!
//! ## Decisions
//!
//! - `NoAnnotation` - the pod does not declare sidecars
//! - `Unsettled` - some container is neither running nor terminated
//! - `WaitingOnPrimary` - something other than the sidecars is still running
//! - `Terminate` - only the sidecars are left
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sidecar_reconciler::{
//!     LoopConfig, ReconcilerBuilder, ReconciliationLoop, ShutdownEvaluator,
//! };
//! use sidecar_workqueue::WorkQueue;
//!
//! #[tokio::main]
//! async fn main() -> sidecar_reconciler::Result<()> {
//!     let reconciler = ReconcilerBuilder::new()
//!         .with_cache(cache)
//!         .with_executor(executor)
//!         .with_evaluator(ShutdownEvaluator::default())
//!         .build()?;
//!
//!     let queue = WorkQueue::new();
//!     let workers = ReconciliationLoop::new(Arc::new(reconciler), queue, LoopConfig::default());
//!     let stopper = workers.stopper();
//!
//!     // Await stopper.stop_and_drain() from a signal handler
//!     workers.run().await
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod evaluator;
pub mod r#loop;
pub mod reconciler;
pub mod types;

// Re-export main types
pub use error::{Error, Result, report_error};
pub use evaluator::{DEFAULT_SIDECAR_ANNOTATION, ShutdownEvaluator};
pub use r#loop::{LoopConfig, LoopState, LoopStopper, ReconciliationLoop};
pub use reconciler::{
    CommandExecutor, DEFAULT_MAX_RETRIES, PodCache, Reconciler, ReconcilerBuilder,
    ReconcilerConfig, default_termination_command,
};
pub use types::{Assessment, ContainerCounts, Decision, ReconcileOutcome, SkipReason};
