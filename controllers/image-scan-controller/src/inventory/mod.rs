//! Cluster inventory collection.
//!
//! Turns the configured namespace selection into a flat list of pod records
//! whose containers carry normalized image digests. Digests come from the
//! container statuses reported by the cluster, falling back to a registry
//! lookup when the cluster reports none.

pub mod cluster;
pub mod registry;

use crate::config::ClusterConfig;
use crate::error::InventoryError;
use cluster::ClusterApi;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use regex::Regex;
use registry::DigestResolver;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One container of a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    /// Image reference without any `@digest` fragment
    pub image: String,
    /// Normalized `repository@sha256:...`, empty when unresolved
    pub digest: String,
}

/// Snapshot of one pod taken during a collection pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    pub containers: Vec<Container>,
    pub start_time: Option<String>,
}

impl PodRecord {
    /// `namespace/name`, unique within a pass
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Which namespaces to collect
#[derive(Debug, Clone)]
pub enum NamespaceSelection {
    /// Names used verbatim, without an existence check
    Explicit(Vec<String>),
    /// Every live namespace whose name matches
    Pattern(Regex),
}

impl NamespaceSelection {
    /// A configured regular expression takes precedence over the explicit list
    pub fn from_config(config: &ClusterConfig) -> Result<Self, InventoryError> {
        if let Some(pattern) = config.namespace_regex.as_deref().filter(|p| !p.is_empty()) {
            let regex = Regex::new(pattern).map_err(|source| InventoryError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            return Ok(Self::Pattern(regex));
        }

        let names = config
            .namespace_list
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self::Explicit(names))
    }
}

/// Repository part of an image reference: no `@digest`, no `:tag`
pub fn repository_of(image: &str) -> &str {
    let name = image.split('@').next().unwrap_or(image);
    match name.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => name,
    }
}

/// Normalize a runtime-reported image id into `repository@digest`, lower-cased.
///
/// Runtime scheme prefixes are dropped and any `:tag` between the repository
/// and the `@` is stripped. A bare `sha256:...` id is joined onto the
/// repository of `image`.
pub fn normalize_image_id(image_id: &str, image: &str) -> String {
    let id = image_id
        .trim()
        .trim_start_matches("docker-pullable://")
        .trim_start_matches("docker://");
    if id.is_empty() {
        return String::new();
    }

    let normalized = match id.split_once('@') {
        Some((name, digest)) => format!("{}@{}", repository_of(name), digest),
        None if id.starts_with("sha256:") => format!("{}@{}", repository_of(image), id),
        None => id.to_string(),
    };
    normalized.to_lowercase()
}

fn find_status<'a>(statuses: &'a [ContainerStatus], name: &str, image: &str) -> Option<&'a ContainerStatus> {
    statuses
        .iter()
        .find(|s| s.image == image)
        .or_else(|| statuses.iter().find(|s| s.name == name))
}

/// Collects pod records from the cluster
pub struct InventoryCollector {
    cluster: Arc<dyn ClusterApi>,
    resolver: Arc<dyn DigestResolver>,
}

impl InventoryCollector {
    /// Create a new collector
    pub fn new(cluster: Arc<dyn ClusterApi>, resolver: Arc<dyn DigestResolver>) -> Self {
        Self { cluster, resolver }
    }

    /// Resolve the selection into namespace names.
    ///
    /// A listing failure while evaluating a pattern is fatal.
    pub async fn resolve_namespaces(&self, selection: &NamespaceSelection) -> Result<Vec<String>, InventoryError> {
        match selection {
            NamespaceSelection::Explicit(names) => Ok(names.clone()),
            NamespaceSelection::Pattern(regex) => {
                let all = self
                    .cluster
                    .list_namespaces()
                    .await
                    .map_err(InventoryError::ListNamespaces)?;
                let matched: Vec<String> = all.into_iter().filter(|ns| regex.is_match(ns)).collect();
                info!("Namespace pattern '{}' matched {} namespace(s)", regex.as_str(), matched.len());
                Ok(matched)
            }
        }
    }

    /// Collect every pod of `namespaces`, in namespace order.
    ///
    /// A namespace whose pods cannot be listed is logged and skipped.
    pub async fn collect(&self, namespaces: &[String]) -> Vec<PodRecord> {
        let mut records = Vec::new();

        for namespace in namespaces {
            let pods = match self.cluster.list_pods(namespace).await {
                Ok(pods) => pods,
                Err(source) => {
                    let err = InventoryError::ListPods {
                        namespace: namespace.clone(),
                        source,
                    };
                    warn!("{}; skipping namespace", err);
                    continue;
                }
            };

            debug!("Namespace {} has {} pod(s)", namespace, pods.len());
            for pod in pods {
                if let Some(record) = self.pod_record(namespace, pod).await {
                    records.push(record);
                }
            }
        }

        info!("Collected {} pod(s) from {} namespace(s)", records.len(), namespaces.len());
        records
    }

    async fn pod_record(&self, namespace: &str, pod: Pod) -> Option<PodRecord> {
        let name = pod.metadata.name?;
        let namespace = pod.metadata.namespace.unwrap_or_else(|| namespace.to_string());
        let status = pod.status.unwrap_or_default();
        let statuses = status.container_statuses.unwrap_or_default();
        let specs = pod.spec.map(|s| s.containers).unwrap_or_default();

        let mut containers = Vec::with_capacity(specs.len());
        for spec in specs {
            let image = spec.image.unwrap_or_default();
            let reported = find_status(&statuses, &spec.name, &image)
                .map(|s| normalize_image_id(&s.image_id, &image))
                .unwrap_or_default();

            let digest = if reported.is_empty() {
                self.resolve_from_registry(&namespace, &name, &image).await
            } else {
                reported
            };

            containers.push(Container {
                name: spec.name,
                image: image.split('@').next().unwrap_or_default().to_string(),
                digest,
            });
        }

        Some(PodRecord {
            name,
            namespace,
            containers,
            start_time: status.start_time.map(|t| t.0.to_string()),
        })
    }

    async fn resolve_from_registry(&self, namespace: &str, pod: &str, image: &str) -> String {
        if image.is_empty() {
            return String::new();
        }
        match self.resolver.resolve(image).await {
            Ok(digest) => {
                debug!("Digest of image {} is {}", image, digest);
                format!("{}@{}", repository_of(image), digest).to_lowercase()
            }
            Err(e) => {
                warn!("{}/{}: cannot resolve digest of {}: {}", namespace, pod, image, e);
                String::new()
            }
        }
    }
}
