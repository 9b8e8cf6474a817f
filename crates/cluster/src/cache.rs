//! Reflector-backed pod cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::{ObjectRef, Store};
use sidecar_core::{ContainerStatus, Error, PodKey, PodSnapshot, Result};
use sidecar_reconciler::PodCache;
use tracing::debug;

/// Read side of the pod reflector.
///
/// Cheap to clone. Lookups fail once the watch feeding the store has
/// stopped, since the contents can no longer be trusted.
#[derive(Clone)]
pub struct ReflectorCache {
    store: Store<Pod>,
    watching: Arc<AtomicBool>,
}

impl ReflectorCache {
    pub fn new(store: Store<Pod>) -> Self {
        Self {
            store,
            watching: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Wait for the initial list to land in the store.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.store.wait_until_ready()).await {
            Ok(Ok(())) => {
                debug!(pods = self.len(), "Pod cache synced");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::cache_sync_failed(e.to_string())),
            Err(_) => Err(Error::cache_sync_failed(format!(
                "timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Number of pods currently mirrored.
    pub fn len(&self) -> usize {
        self.store.state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn mark_stopped(&self) {
        self.watching.store(false, Ordering::Release);
    }
}

impl PodCache for ReflectorCache {
    fn get_by_key(&self, key: &PodKey) -> Result<Option<PodSnapshot>> {
        if !self.watching.load(Ordering::Acquire) {
            return Err(Error::cache_lookup_failed(
                key.to_string(),
                "pod watch has stopped",
            ));
        }

        let mut object_ref = ObjectRef::<Pod>::new(key.name());
        if !key.namespace().is_empty() {
            object_ref = object_ref.within(key.namespace());
        }
        Ok(self.store.get(&object_ref).map(|pod| snapshot_from_pod(&pod)))
    }
}

/// Key of a pod, `None` when the object has no name.
pub fn pod_key(pod: &Pod) -> Option<PodKey> {
    let name = pod.metadata.name.as_deref()?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    Some(PodKey::new(namespace, name))
}

/// Convert a pod into the snapshot the evaluator works on.
///
/// Only containers with a reported status are included.
pub fn snapshot_from_pod(pod: &Pod) -> PodSnapshot {
    let mut snapshot = PodSnapshot::new(pod_key(pod).unwrap_or_default());
    snapshot.annotations = pod.metadata.annotations.clone().unwrap_or_default();

    let Some(status) = pod.status.as_ref() else {
        return snapshot;
    };
    snapshot.phase.clone_from(&status.phase);

    for container in status.container_statuses.iter().flatten() {
        let reason = container
            .state
            .as_ref()
            .and_then(|state| state.terminated.as_ref())
            .and_then(|terminated| terminated.reason.as_deref());
        snapshot = snapshot.with_container(
            container.name.clone(),
            ContainerStatus::classify(container.ready, reason),
        );
    }

    snapshot
}
