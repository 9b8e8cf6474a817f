//! Pod watch feeding the work queue.
//!
//! A reflector keeps [`ReflectorCache`] current while every relevant event
//! pushes the pod's key into the queue. Only the key travels; workers read
//! the latest state from the cache when they get to it.

use std::pin::pin;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::{self, Event};
use kube::runtime::{WatchStreamExt, reflector};
use kube::{Api, Client};
use sidecar_core::{PodKey, ResultExt};
use sidecar_workqueue::WorkQueue;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::cache::{ReflectorCache, pod_key};

/// Which watch events enqueue a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueuePolicy {
    /// Enqueue every pod seen during the initial list (and relists).
    pub reconcile_on_initial_sync: bool,
}

impl Default for EnqueuePolicy {
    fn default() -> Self {
        Self {
            reconcile_on_initial_sync: true,
        }
    }
}

impl EnqueuePolicy {
    /// Key to enqueue for `event`, if any.
    ///
    /// Deletions are not enqueued: the pod is gone from the cache, so there
    /// is nothing left to stop.
    pub fn key_for(&self, event: &Event<Pod>) -> Option<PodKey> {
        match event {
            Event::Apply(pod) => pod_key(pod),
            Event::InitApply(pod) if self.reconcile_on_initial_sync => pod_key(pod),
            Event::InitApply(_) | Event::Delete(_) | Event::Init | Event::InitDone => None,
        }
    }
}

/// A running pod watch.
pub struct PodWatch {
    cache: ReflectorCache,
    handle: JoinHandle<()>,
}

impl PodWatch {
    /// Cache kept current by this watch.
    pub fn cache(&self) -> ReflectorCache {
        self.cache.clone()
    }

    /// Stop watching. Subsequent cache lookups fail.
    pub fn stop(&self) {
        self.handle.abort();
        self.cache.mark_stopped();
    }
}

/// Watch pods in every namespace, mirroring them into a cache and pushing
/// their keys into `queue`.
pub fn spawn_pod_watch(
    client: Client,
    queue: WorkQueue<PodKey>,
    policy: EnqueuePolicy,
) -> PodWatch {
    let api: Api<Pod> = Api::all(client);
    let (reader, writer) = reflector::store();
    let cache = ReflectorCache::new(reader);

    let events = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer);

    info!(
        reconcile_on_initial_sync = policy.reconcile_on_initial_sync,
        "Starting pod watch"
    );
    let handle = tokio::spawn(forward_events(events, queue, policy, cache.clone()));

    PodWatch { cache, handle }
}

async fn forward_events<S>(
    events: S,
    queue: WorkQueue<PodKey>,
    policy: EnqueuePolicy,
    cache: ReflectorCache,
) where
    S: Stream<Item = Result<Event<Pod>, watcher::Error>>,
{
    let mut events = pin!(events);

    while let Some(event) = events.next().await {
        let Some(event) = event.into_option_logged("Pod watch error") else {
            continue;
        };
        if let Some(key) = policy.key_for(&event) {
            trace!(key = %key, "Enqueueing pod");
            queue.add(key);
        }
    }

    warn!("Pod watch stream ended");
    cache.mark_stopped();
}
