//! Cluster API access.

use crate::backoff::RetryPolicy;
use crate::config::ClusterConfig;
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::ListParams;
use kube::{Api, Client};
use std::time::Duration;
use tracing::info;

/// Read-only view of the cluster used by the inventory collector
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Names of every namespace in the cluster
    async fn list_namespaces(&self) -> Result<Vec<String>, kube::Error>;

    /// Pods of one namespace
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, kube::Error>;
}

fn transient(e: &kube::Error) -> bool {
    matches!(e, kube::Error::HyperError(_) | kube::Error::Service(_))
}

/// [`ClusterApi`] backed by a kube client
pub struct KubeCluster {
    client: Client,
    retry: RetryPolicy,
}

impl KubeCluster {
    /// Build a client from the inferred kubeconfig or in-cluster service account.
    ///
    /// `cluster.api_url` overrides the inferred server URL.
    pub async fn connect(config: &ClusterConfig, retry: RetryPolicy) -> Result<Self, ControllerError> {
        let mut kube_config = kube::Config::infer()
            .await
            .map_err(|e| ControllerError::InvalidConfig(format!("cannot load cluster configuration: {}", e)))?;

        if let Some(url) = config.api_url.as_deref().filter(|u| !u.is_empty()) {
            kube_config.cluster_url = url
                .parse()
                .map_err(|e| ControllerError::InvalidConfig(format!("invalid cluster URL '{}': {}", url, e)))?;
        }
        kube_config.read_timeout = Some(Duration::from_secs(config.request_timeout_secs));

        info!("Connecting to cluster at {}", kube_config.cluster_url);
        let client = Client::try_from(kube_config)?;
        Ok(Self { client, retry })
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>, kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params = ListParams::default();
        let list = self
            .retry
            .retry("list namespaces", transient, || api.list(&params))
            .await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default();
        let list = self
            .retry
            .retry("list pods", transient, || api.list(&params))
            .await?;
        Ok(list.items)
    }
}
