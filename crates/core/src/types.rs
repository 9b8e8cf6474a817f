//! Domain types shared by the queue, the reconciler and the cluster adapter.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Stable identifier of a pod: `namespace/name`.
///
/// Used as the work queue's dedup key and as the cache lookup key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodKey {
    namespace: String,
    name: String,
}

impl PodKey {
    /// Create a key for a namespaced pod.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Namespace of the pod (empty for cluster-scoped keys).
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the pod.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Settled-ness of a single container, derived from readiness and the
/// termination reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// Not ready and not terminated with a recognised reason.
    Pending,
    /// Ready.
    Running,
    /// Terminated with reason `Completed`.
    TerminatedSuccess,
    /// Terminated with reason `Error`.
    TerminatedFailure,
}

impl ContainerStatus {
    /// Classify a container from its readiness and, when not ready, the
    /// reason of its terminated state.
    pub fn classify(ready: bool, terminated_reason: Option<&str>) -> Self {
        if ready {
            return Self::Running;
        }
        match terminated_reason {
            Some("Completed") => Self::TerminatedSuccess,
            Some("Error") => Self::TerminatedFailure,
            _ => Self::Pending,
        }
    }

    /// Whether the container has finished (successfully or not).
    pub const fn is_terminated(self) -> bool {
        matches!(self, Self::TerminatedSuccess | Self::TerminatedFailure)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::TerminatedSuccess => write!(f, "TerminatedSuccess"),
            Self::TerminatedFailure => write!(f, "TerminatedFailure"),
        }
    }
}

/// A container name with its classified status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub name: String,
    pub status: ContainerStatus,
}

impl ContainerState {
    pub fn new(name: impl Into<String>, status: ContainerStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// Immutable view of a pod at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSnapshot {
    /// Identifier of the pod.
    pub key: PodKey,
    /// Overall pod phase (`Pending`, `Running`, `Succeeded`, ...).
    pub phase: Option<String>,
    /// Container statuses reported for the pod.
    pub containers: Vec<ContainerState>,
    /// Free-form annotations.
    pub annotations: BTreeMap<String, String>,
}

impl PodSnapshot {
    /// Create an empty snapshot for a key.
    pub fn new(key: PodKey) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }

    /// Set the phase.
    #[must_use]
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Add a container.
    #[must_use]
    pub fn with_container(mut self, name: impl Into<String>, status: ContainerStatus) -> Self {
        self.containers.push(ContainerState::new(name, status));
        self
    }

    /// Add an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Look up an annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Phase for logging, `Unknown` when the pod has not reported one.
    pub fn phase_or_unknown(&self) -> &str {
        self.phase.as_deref().unwrap_or("Unknown")
    }

    /// Names of containers whose status satisfies `predicate`.
    pub fn containers_where<F>(&self, predicate: F) -> ContainerSet
    where
        F: Fn(ContainerStatus) -> bool,
    {
        self.containers
            .iter()
            .filter(|c| predicate(c.status))
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Ordering-irrelevant set of container names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSet(BTreeSet<String>);

impl ContainerSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list of container names.
    ///
    /// Duplicates collapse. With `trim`, whitespace around each name is
    /// removed; empty segments are always dropped.
    pub fn parse_list(value: &str, trim: bool) -> Self {
        value
            .split(',')
            .map(|name| if trim { name.trim() } else { name })
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether the set contains `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Set union.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        self.0.union(&other.0).cloned().collect()
    }

    /// Number of names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for ContainerSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for ContainerSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

impl IntoIterator for ContainerSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ContainerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.iter().join(","))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pod_key_display() {
        let key = PodKey::new("batch", "job-42");
        assert_eq!(key.namespace(), "batch");
        assert_eq!(key.name(), "job-42");
        assert_eq!(key.to_string(), "batch/job-42");
        assert_eq!(PodKey::new("", "standalone").to_string(), "standalone");
    }

    #[test]
    fn test_classify_container_status() {
        assert_eq!(ContainerStatus::classify(true, None), ContainerStatus::Running);
        assert_eq!(
            ContainerStatus::classify(true, Some("Completed")),
            ContainerStatus::Running
        );
        assert_eq!(
            ContainerStatus::classify(false, Some("Completed")),
            ContainerStatus::TerminatedSuccess
        );
        assert_eq!(
            ContainerStatus::classify(false, Some("Error")),
            ContainerStatus::TerminatedFailure
        );
        assert_eq!(
            ContainerStatus::classify(false, Some("OOMKilled")),
            ContainerStatus::Pending
        );
        assert_eq!(ContainerStatus::classify(false, None), ContainerStatus::Pending);
    }

    #[test]
    fn test_parse_list_collapses_duplicates() {
        let set = ContainerSet::parse_list("proxy,proxy,logger", false);
        assert_eq!(set.len(), 2);
        assert!(set.contains("proxy"));
        assert!(set.contains("logger"));
    }

    #[test]
    fn test_parse_list_trim() {
        let trimmed = ContainerSet::parse_list(" proxy , logger,", true);
        let expected: ContainerSet = ["proxy", "logger"].into_iter().collect();
        assert_eq!(trimmed, expected);

        let exact = ContainerSet::parse_list(" proxy", false);
        assert!(exact.contains(" proxy"));
        assert!(!exact.contains("proxy"));
    }

    #[test]
    fn test_set_equality_ignores_order() {
        let a: ContainerSet = ["b", "a"].into_iter().collect();
        let b: ContainerSet = ["a", "b"].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "{a,b}");
    }

    #[test]
    fn test_union() {
        let a: ContainerSet = ["app"].into_iter().collect();
        let b: ContainerSet = ["proxy", "app"].into_iter().collect();
        let expected: ContainerSet = ["app", "proxy"].into_iter().collect();
        assert_eq!(a.union(&b), expected);
    }

    #[test]
    fn test_snapshot_containers_where() {
        let snapshot = PodSnapshot::new(PodKey::new("ns", "pod"))
            .with_container("app", ContainerStatus::TerminatedSuccess)
            .with_container("proxy", ContainerStatus::Running);

        let running = snapshot.containers_where(|s| s == ContainerStatus::Running);
        let expected: ContainerSet = ["proxy"].into_iter().collect();
        assert_eq!(running, expected);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = PodSnapshot::new(PodKey::new("ns", "pod")).with_phase("Running");
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"phase\":\"Running\""));
    }

    proptest! {
        #[test]
        fn prop_parse_list_is_order_insensitive(names in proptest::collection::vec("[a-z]{1,8}", 0..8)) {
            let forward = names.join(",");
            let reversed = names.iter().rev().cloned().collect::<Vec<_>>().join(",");
            prop_assert_eq!(
                ContainerSet::parse_list(&forward, true),
                ContainerSet::parse_list(&reversed, true)
            );
        }
    }
}
