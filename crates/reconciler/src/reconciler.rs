//! Reconciler implementation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use sidecar_core::{ContainerSet, PodKey, PodSnapshot};
use sidecar_workqueue::WorkQueue;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result, report_error};
use crate::evaluator::ShutdownEvaluator;
use crate::types::{ContainerCounts, Decision, ReconcileOutcome};

/// Rate-limited requeues allowed before a key is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Graceful stop of the container's process 1.
pub fn default_termination_command() -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "kill -s TERM 1".to_string(),
    ]
}

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Maximum rate-limited requeues per key.
    pub max_retries: u32,
    /// Command run inside each sidecar to stop it.
    pub termination_command: Vec<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            termination_command: default_termination_command(),
        }
    }
}

/// Read access to the local mirror of pod state.
pub trait PodCache: Send + Sync {
    /// Look up a pod. `Ok(None)` means the pod no longer exists.
    fn get_by_key(&self, key: &PodKey) -> sidecar_core::Result<Option<PodSnapshot>>;
}

/// Runs a command inside a container of a pod.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `command` in `container` and return what it wrote to stderr.
    async fn exec(
        &self,
        pod: &PodKey,
        container: &str,
        command: &[String],
    ) -> sidecar_core::Result<Vec<u8>>;
}

/// Reconciler stopping the sidecars of finished pods.
pub struct Reconciler {
    cache: Arc<dyn PodCache>,
    executor: Arc<dyn CommandExecutor>,
    evaluator: ShutdownEvaluator,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        cache: Arc<dyn PodCache>,
        executor: Arc<dyn CommandExecutor>,
        evaluator: ShutdownEvaluator,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            cache,
            executor,
            evaluator,
            config,
        }
    }

    /// Bring one pod to its desired state.
    ///
    /// Only a failed cache lookup is an error. Failed termination commands
    /// are logged and counted in the outcome.
    pub async fn reconcile(&self, key: &PodKey) -> Result<ReconcileOutcome> {
        let Some(snapshot) = self.cache.get_by_key(key)? else {
            debug!(key = %key, "Pod no longer exists");
            return Ok(ReconcileOutcome::PodMissing);
        };

        let assessment = self.evaluator.assess(&snapshot);
        let counts = assessment.counts;

        match assessment.decision {
            Decision::Skip(reason) => {
                debug!(
                    key = %key,
                    phase = snapshot.phase_or_unknown(),
                    containers_total = counts.total,
                    running = counts.running,
                    completed = counts.completed,
                    sidecars = counts.sidecars,
                    reason = %reason,
                    "Nothing to do"
                );
                Ok(ReconcileOutcome::Skipped(reason))
            }
            Decision::Terminate(sidecars) => {
                info!(
                    key = %key,
                    phase = snapshot.phase_or_unknown(),
                    containers_total = counts.total,
                    running = counts.running,
                    completed = counts.completed,
                    sidecars = %sidecars,
                    "Primary containers finished, stopping sidecars"
                );
                let failed = self.terminate_sidecars(&snapshot, &sidecars, counts).await;
                Ok(ReconcileOutcome::Terminated {
                    attempted: sidecars.len(),
                    failed,
                })
            }
        }
    }

    /// Send the termination command to every sidecar, returning how many
    /// commands failed.
    async fn terminate_sidecars(
        &self,
        snapshot: &PodSnapshot,
        sidecars: &ContainerSet,
        counts: ContainerCounts,
    ) -> usize {
        let mut failed: usize = 0;

        for container in sidecars.iter() {
            debug!(key = %snapshot.key, container, "Sending termination command");

            match self
                .executor
                .exec(&snapshot.key, container, &self.config.termination_command)
                .await
            {
                Ok(stderr) if !stderr.is_empty() => {
                    warn!(
                        key = %snapshot.key,
                        container,
                        stderr = %String::from_utf8_lossy(&stderr).trim_end(),
                        "Termination command wrote to stderr"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    failed = failed.saturating_add(1);
                    error!(
                        key = %snapshot.key,
                        container,
                        phase = snapshot.phase_or_unknown(),
                        containers_total = counts.total,
                        running = counts.running,
                        completed = counts.completed,
                        sidecars = counts.sidecars,
                        error = %e,
                        "Failed to stop sidecar"
                    );
                }
            }
        }

        failed
    }

    /// Take one key from the queue and reconcile it.
    ///
    /// A panic inside the reconcile is caught and handled as a permanent
    /// error, so the key is always marked done. Returns `false` once the
    /// queue has shut down.
    pub async fn process_next_item(&self, queue: &WorkQueue<PodKey>) -> bool {
        let Some(key) = queue.get().await else {
            return false;
        };

        let result = AssertUnwindSafe(self.reconcile(&key))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(Error::worker_failed(format!(
                    "reconcile panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        queue.done(&key);
        self.handle_result(queue, key, result);
        true
    }

    /// Forget the key on success, requeue it with backoff on a transient
    /// error, and drop it once the retry budget is spent.
    fn handle_result(
        &self,
        queue: &WorkQueue<PodKey>,
        key: PodKey,
        result: Result<ReconcileOutcome>,
    ) {
        match result {
            Ok(outcome) => {
                debug!(key = %key, outcome = ?outcome, "Reconciled");
                queue.forget(&key);
            }
            Err(e) => {
                let requeues = queue.num_requeues(&key);
                if e.is_transient() && requeues < self.config.max_retries {
                    error!(
                        key = %key,
                        error = %e,
                        requeues,
                        "Failed to reconcile pod, will retry"
                    );
                    queue.add_rate_limited(key);
                } else {
                    queue.forget(&key);
                    report_error(&key, &e);
                }
            }
        }
    }

    pub const fn evaluator(&self) -> &ShutdownEvaluator {
        &self.evaluator
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    cache: Option<Arc<dyn PodCache>>,
    executor: Option<Arc<dyn CommandExecutor>>,
    evaluator: ShutdownEvaluator,
    config: ReconcilerConfig,
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            cache: None,
            executor: None,
            evaluator: ShutdownEvaluator::default(),
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the pod cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn PodCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the command executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn with_evaluator(mut self, evaluator: ShutdownEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set max retries.
    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.config.max_retries = max;
        self
    }

    /// Build the reconciler.
    pub fn build(self) -> Result<Reconciler> {
        let cache = self
            .cache
            .ok_or_else(|| Error::invalid_config("pod cache is required"))?;
        let executor = self
            .executor
            .ok_or_else(|| Error::invalid_config("command executor is required"))?;

        if self.config.termination_command.is_empty() {
            return Err(Error::invalid_config(
                "termination command must not be empty",
            ));
        }

        Ok(Reconciler::new(cache, executor, self.evaluator, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoPods;

    impl PodCache for NoPods {
        fn get_by_key(&self, _key: &PodKey) -> sidecar_core::Result<Option<PodSnapshot>> {
            Ok(None)
        }
    }

    struct NoExec;

    #[async_trait]
    impl CommandExecutor for NoExec {
        async fn exec(
            &self,
            _pod: &PodKey,
            _container: &str,
            _command: &[String],
        ) -> sidecar_core::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_default_config() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(
            config.termination_command,
            vec!["/bin/sh", "-c", "kill -s TERM 1"]
        );
    }

    #[test]
    fn test_builder_requires_cache() {
        let result = ReconcilerBuilder::new()
            .with_executor(Arc::new(NoExec))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_rejects_empty_command() {
        let result = ReconcilerBuilder::new()
            .with_cache(Arc::new(NoPods))
            .with_executor(Arc::new(NoExec))
            .with_config(ReconcilerConfig {
                max_retries: 1,
                termination_command: Vec::new(),
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_applies_settings() {
        let result = ReconcilerBuilder::new()
            .with_cache(Arc::new(NoPods))
            .with_executor(Arc::new(NoExec))
            .with_evaluator(ShutdownEvaluator::new("example.com/sidecars"))
            .max_retries(5)
            .build();

        let reconciler = result.ok();
        assert_eq!(
            reconciler.as_ref().map(|r| r.config().max_retries),
            Some(5)
        );
        assert_eq!(
            reconciler.as_ref().map(|r| r.evaluator().annotation_key()),
            Some("example.com/sidecars")
        );
    }

    #[test]
    fn test_panic_message_reads_str_and_string_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("exec bridge broke"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(literal.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "exec bridge broke");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_missing_pod_is_success() {
        let reconciler = Reconciler::new(
            Arc::new(NoPods),
            Arc::new(NoExec),
            ShutdownEvaluator::default(),
            ReconcilerConfig::default(),
        );

        let outcome = reconciler.reconcile(&PodKey::new("ns", "gone")).await;
        assert!(matches!(outcome, Ok(ReconcileOutcome::PodMissing)));
    }
}
