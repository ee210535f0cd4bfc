//! Test utilities for unit testing the inventory, reconciler and dispatcher
//!
//! This module provides fakes for the cluster, the registry and the scan
//! functions, plus helpers for building test pods and scan types.

use crate::error::RegistryError;
use crate::inventory::cluster::ClusterApi;
use crate::inventory::registry::DigestResolver;
use crate::inventory::{Container, PodRecord};
use crate::scan::{ScanType, Scanner};
use k8s_openapi::api::core::v1::{
    Container as ContainerSpec, ContainerStatus, Pod, PodSpec, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Helper to create a test pod.
///
/// Each container is `(name, image, image_id)`; a container with an image id
/// gets a matching container status.
pub fn pod(namespace: &str, name: &str, containers: &[(&str, &str, Option<&str>)]) -> Pod {
    let specs = containers
        .iter()
        .map(|(container, image, _)| ContainerSpec {
            name: container.to_string(),
            image: Some(image.to_string()),
            ..Default::default()
        })
        .collect();

    let statuses = containers
        .iter()
        .filter_map(|(container, image, image_id)| {
            image_id.map(|id| ContainerStatus {
                name: container.to_string(),
                image: image.to_string(),
                image_id: id.to_string(),
                ..Default::default()
            })
        })
        .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: specs,
            ..Default::default()
        }),
        status: Some(PodStatus {
            container_statuses: Some(statuses),
            ..Default::default()
        }),
    }
}

/// Helper to create a collected pod record from `(image, digest)` pairs
pub fn pod_record(namespace: &str, name: &str, images: &[(&str, &str)]) -> PodRecord {
    PodRecord {
        name: name.to_string(),
        namespace: namespace.to_string(),
        containers: images
            .iter()
            .map(|(image, digest)| Container {
                name: image.to_string(),
                image: image.to_string(),
                digest: digest.to_string(),
            })
            .collect(),
        start_time: None,
    }
}

/// Helper to create a scan type backed by `scanner`
pub fn scan_type(name: &str, lane: &str, scanner: &Arc<FakeScanner>) -> ScanType {
    ScanType {
        name: name.to_string(),
        lane: lane.to_string(),
        scanner: Arc::clone(scanner) as Arc<dyn Scanner>,
    }
}

fn cluster_error(message: &str) -> kube::Error {
    kube::Error::Service(message.to_string().into())
}

/// In-memory cluster
#[derive(Default)]
pub struct FakeCluster {
    namespaces: Vec<String>,
    pods: HashMap<String, Vec<Pod>>,
    fail_namespace_listing: bool,
    failing_namespaces: HashSet<String>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespaces(mut self, namespaces: &[&str]) -> Self {
        for ns in namespaces {
            self.add_namespace(ns);
        }
        self
    }

    /// Adds the pod under its namespace, registering the namespace if needed
    pub fn with_pod(mut self, pod: Pod) -> Self {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        self.add_namespace(&namespace);
        self.pods.entry(namespace).or_default().push(pod);
        self
    }

    pub fn failing_namespace_listing(mut self) -> Self {
        self.fail_namespace_listing = true;
        self
    }

    pub fn failing_namespace(mut self, namespace: &str) -> Self {
        self.add_namespace(namespace);
        self.failing_namespaces.insert(namespace.to_string());
        self
    }

    fn add_namespace(&mut self, namespace: &str) {
        if !self.namespaces.iter().any(|ns| ns == namespace) {
            self.namespaces.push(namespace.to_string());
        }
    }
}

#[async_trait::async_trait]
impl ClusterApi for FakeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>, kube::Error> {
        if self.fail_namespace_listing {
            return Err(cluster_error("namespace listing unavailable"));
        }
        Ok(self.namespaces.clone())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, kube::Error> {
        if self.failing_namespaces.contains(namespace) {
            return Err(cluster_error("pod listing unavailable"));
        }
        Ok(self.pods.get(namespace).cloned().unwrap_or_default())
    }
}

/// Registry with fixed digests per image reference
#[derive(Default)]
pub struct FakeRegistry {
    digests: HashMap<String, String>,
    failing: HashSet<String>,
}

impl FakeRegistry {
    pub fn with_digest(mut self, image: &str, digest: &str) -> Self {
        self.digests.insert(image.to_string(), digest.to_string());
        self
    }

    pub fn failing(mut self, image: &str) -> Self {
        self.failing.insert(image.to_string());
        self
    }
}

#[async_trait::async_trait]
impl DigestResolver for FakeRegistry {
    async fn resolve(&self, image: &str) -> Result<String, RegistryError> {
        if self.failing.contains(image) {
            return Err(RegistryError::Unauthorized(format!("registry for {} unreachable", image)));
        }
        self.digests
            .get(image)
            .cloned()
            .ok_or_else(|| RegistryError::MissingDigest(image.to_string()))
    }
}

/// Scanner that writes an empty report per image and records its calls
pub struct FakeScanner {
    dir: tempfile::TempDir,
    calls: Mutex<Vec<String>>,
    prepared: Mutex<usize>,
    failing: Mutex<HashSet<String>>,
}

impl FakeScanner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dir: tempfile::tempdir().unwrap(),
            calls: Mutex::new(Vec::new()),
            prepared: Mutex::new(0),
            failing: Mutex::new(HashSet::new()),
        })
    }

    /// Make scans of `image` fail
    pub fn fail_on(&self, image: &str) {
        self.failing.lock().unwrap().insert(image.to_string());
    }

    /// Images scanned so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn prepare_calls(&self) -> usize {
        *self.prepared.lock().unwrap()
    }

    /// Report files still present on disk
    pub fn artifacts(&self) -> usize {
        std::fs::read_dir(self.dir.path()).unwrap().count()
    }
}

#[async_trait::async_trait]
impl Scanner for FakeScanner {
    fn tool(&self) -> &str {
        "fake"
    }

    async fn prepare(&self) -> anyhow::Result<()> {
        *self.prepared.lock().unwrap() += 1;
        Ok(())
    }

    async fn scan(&self, image: &str) -> anyhow::Result<PathBuf> {
        self.calls.lock().unwrap().push(image.to_string());
        if self.failing.lock().unwrap().contains(image) {
            anyhow::bail!("scanner crashed on {}", image);
        }
        let path = crate::scan::artifact_path(self.dir.path(), image, self.tool());
        tokio::fs::write(&path, br#"{"matches": []}"#).await?;
        Ok(path)
    }
}
