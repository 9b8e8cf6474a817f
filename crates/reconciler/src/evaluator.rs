//! Decides which sidecars of a pod can be stopped.
//!
//! A pod is ready for sidecar shutdown when every container has settled
//! (running or terminated) and the set of running containers is exactly the
//! set named in the sidecar annotation. Evaluation is a pure function of the
//! snapshot, so reconciling the same pod twice yields the same decision.

use sidecar_core::{ContainerSet, ContainerStatus, PodSnapshot};
use tracing::trace;

use crate::types::{Assessment, ContainerCounts, Decision, SkipReason};

/// Annotation listing a pod's sidecar containers, comma separated.
pub const DEFAULT_SIDECAR_ANNOTATION: &str = "limgit/sidecars";

/// Pure decision function from a pod snapshot to the sidecars to stop.
#[derive(Debug, Clone)]
pub struct ShutdownEvaluator {
    annotation_key: String,
    trim_names: bool,
}

impl Default for ShutdownEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_SIDECAR_ANNOTATION)
    }
}

impl ShutdownEvaluator {
    /// Create an evaluator reading sidecar names from `annotation_key`.
    pub fn new(annotation_key: impl Into<String>) -> Self {
        Self {
            annotation_key: annotation_key.into(),
            trim_names: true,
        }
    }

    /// Whether whitespace around annotation names is ignored (default on).
    #[must_use]
    pub fn with_trim_names(mut self, trim: bool) -> Self {
        self.trim_names = trim;
        self
    }

    pub fn annotation_key(&self) -> &str {
        &self.annotation_key
    }

    /// Sidecars to stop, empty when the pod should be left alone.
    pub fn evaluate(&self, snapshot: &PodSnapshot) -> ContainerSet {
        self.assess(snapshot).decision.into_termination_set()
    }

    /// Evaluate a pod and report the counts behind the decision.
    pub fn assess(&self, snapshot: &PodSnapshot) -> Assessment {
        let all = snapshot.containers_where(|_| true);
        let running = snapshot.containers_where(|s| s == ContainerStatus::Running);
        let completed = snapshot.containers_where(ContainerStatus::is_terminated);

        let sidecars = snapshot
            .annotation(&self.annotation_key)
            .map(|value| ContainerSet::parse_list(value, self.trim_names))
            .unwrap_or_default();

        let counts = ContainerCounts {
            total: all.len(),
            running: running.len(),
            completed: completed.len(),
            sidecars: sidecars.len(),
        };

        let decision = if sidecars.is_empty() {
            Decision::Skip(SkipReason::NoAnnotation)
        } else if running.union(&completed) != all {
            Decision::Skip(SkipReason::Unsettled)
        } else if running != sidecars {
            Decision::Skip(SkipReason::WaitingOnPrimary)
        } else {
            Decision::Terminate(sidecars)
        };

        trace!(
            key = %snapshot.key,
            decision = ?decision,
            total = counts.total,
            running = counts.running,
            completed = counts.completed,
            "Assessed pod"
        );

        Assessment { decision, counts }
    }
}
