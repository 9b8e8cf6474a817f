//! Command execution through the pods/exec subresource.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{AttachParams, Api};
use kube::Client;
use sidecar_core::{Error, PodKey, Result};
use sidecar_reconciler::CommandExecutor;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Upper bound on a single exec round trip.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// [`CommandExecutor`] that runs commands over the Kubernetes exec websocket.
#[derive(Clone)]
pub struct KubeCommandExecutor {
    client: Client,
    timeout: Duration,
}

impl KubeCommandExecutor {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn run(&self, pod: &PodKey, container: &str, command: &[String]) -> Result<Vec<u8>> {
        let namespace = if pod.namespace().is_empty() {
            "default"
        } else {
            pod.namespace()
        };
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(false)
            .stderr(true);

        let mut attached = api
            .exec(pod.name(), command.iter().cloned(), &params)
            .await
            .map_err(|e| Error::exec_failed(pod.to_string(), container, e.to_string()))?;

        let status = attached.take_status();

        let mut stderr = Vec::new();
        if let Some(mut reader) = attached.stderr() {
            reader
                .read_to_end(&mut stderr)
                .await
                .map_err(|e| Error::exec_failed(pod.to_string(), container, e.to_string()))?;
        }

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| Error::exec_failed(pod.to_string(), container, e.to_string()))?;

        if let Some(status) = status {
            if status.status.as_deref() == Some("Failure") {
                let message = status
                    .message
                    .unwrap_or_else(|| "command exited with failure".to_string());
                return Err(Error::exec_failed(pod.to_string(), container, message));
            }
        }

        debug!(key = %pod, container, stderr_bytes = stderr.len(), "Command finished");
        Ok(stderr)
    }
}

#[async_trait]
impl CommandExecutor for KubeCommandExecutor {
    async fn exec(&self, pod: &PodKey, container: &str, command: &[String]) -> Result<Vec<u8>> {
        match tokio::time::timeout(self.timeout, self.run(pod, container, command)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ExecTimeout {
                pod: pod.to_string(),
                container: container.to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
