//! Cluster client bootstrap.

use std::path::Path;

use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use sidecar_core::{Error, Result};
use tracing::{debug, info};

/// Connect to the cluster and check that the API server answers.
///
/// Uses the kubeconfig at `kubeconfig` when given, otherwise the pod's
/// in-cluster service account.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), "Loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::kubeconfig_failed(path, e.to_string()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::kubeconfig_failed(path, e.to_string()))?
        }
        None => {
            debug!("No kubeconfig given, using in-cluster credentials");
            kube::Config::incluster()
                .map_err(|e| Error::client_failed(format!("in-cluster config: {e}")))?
        }
    };

    let cluster_url = config.cluster_url.to_string();
    let client = Client::try_from(config).map_err(|e| Error::client_failed(e.to_string()))?;

    let version = client
        .apiserver_version()
        .await
        .map_err(|e| {
            Error::client_failed(format!("API server at {cluster_url} unreachable: {e}"))
        })?;

    info!(
        cluster_url = %cluster_url,
        version = %version.git_version,
        "Connected to cluster"
    );
    Ok(client)
}
