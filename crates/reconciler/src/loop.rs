//! Worker pool draining the work queue.

use std::sync::Arc;

use sidecar_core::PodKey;
use sidecar_workqueue::WorkQueue;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::reconciler::Reconciler;

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Number of concurrent workers. Values below one are treated as one.
    pub workers: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

/// Lifecycle of a [`ReconciliationLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// Terminal: the queue shut down and every worker returned.
    Stopped,
}

/// Continuous reconciliation loop.
///
/// Runs `workers` tasks, each calling
/// [`Reconciler::process_next_item`] until the queue shuts down.
pub struct ReconciliationLoop {
    reconciler: Arc<Reconciler>,
    queue: WorkQueue<PodKey>,
    config: LoopConfig,
    state_tx: watch::Sender<LoopState>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    pub fn new(reconciler: Arc<Reconciler>, queue: WorkQueue<PodKey>, config: LoopConfig) -> Self {
        let (state_tx, _) = watch::channel(LoopState::Running);
        Self {
            reconciler,
            queue,
            config,
            state_tx,
        }
    }

    /// Run until the queue shuts down and every in-flight key is finished.
    ///
    /// Returns an error if a worker task panicked.
    pub async fn run(&self) -> Result<()> {
        let workers = self.config.workers.max(1);
        info!(workers, "Starting reconciliation workers");

        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            let reconciler = Arc::clone(&self.reconciler);
            let queue = self.queue.clone();
            tasks.spawn(async move {
                while reconciler.process_next_item(&queue).await {}
                debug!(worker, "Worker exiting");
            });
        }

        let mut first_failure = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Reconciliation worker ended abnormally");
                if first_failure.is_none() {
                    first_failure = Some(Error::worker_failed(e.to_string()));
                }
            }
        }

        self.state_tx.send_replace(LoopState::Stopped);
        info!("Reconciliation loop stopped");

        first_failure.map_or(Ok(()), Err)
    }

    /// Observe the loop state.
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state_tx.subscribe()
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            queue: self.queue.clone(),
        }
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    queue: WorkQueue<PodKey>,
}

impl LoopStopper {
    /// Stop handing out keys, then wait until every in-flight key has been
    /// finished. Workers exit once the queue is empty.
    pub async fn stop_and_drain(&self) {
        self.queue.shut_down_with_drain().await;
    }
}
