//! Core types for the reconciler.

use std::fmt;

use sidecar_core::ContainerSet;

/// Container tallies for one pod, attached to reconcile logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerCounts {
    /// Containers reported for the pod.
    pub total: usize,
    /// Containers that are ready.
    pub running: usize,
    /// Containers that terminated, successfully or not.
    pub completed: usize,
    /// Names declared in the sidecar annotation.
    pub sidecars: usize,
}

/// Why a pod was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The pod carries no usable sidecar annotation.
    NoAnnotation,
    /// Some container is neither running nor terminated.
    Unsettled,
    /// The running containers are not exactly the sidecars.
    WaitingOnPrimary,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAnnotation => write!(f, "no sidecar annotation"),
            Self::Unsettled => write!(f, "containers not settled"),
            Self::WaitingOnPrimary => write!(f, "primary containers still running"),
        }
    }
}

/// Outcome of evaluating a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Leave the pod alone.
    Skip(SkipReason),
    /// Stop these sidecars.
    Terminate(ContainerSet),
}

impl Decision {
    /// Sidecars to stop; empty unless the decision is [`Decision::Terminate`].
    pub fn into_termination_set(self) -> ContainerSet {
        match self {
            Self::Skip(_) => ContainerSet::new(),
            Self::Terminate(set) => set,
        }
    }
}

/// A decision together with the counts it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub decision: Decision,
    pub counts: ContainerCounts,
}

/// Result of reconciling one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The pod is no longer in the cache.
    PodMissing,
    /// The pod was evaluated and nothing needed doing.
    Skipped(SkipReason),
    /// Termination commands were issued.
    Terminated {
        /// Number of sidecars a command was sent to.
        attempted: usize,
        /// Number of those commands that failed.
        failed: usize,
    },
}
