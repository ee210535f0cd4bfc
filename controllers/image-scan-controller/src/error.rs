//! Controller-specific error types.
//!
//! Errors are split by the scope they abort: a fatal error stops the whole
//! run, everything else is logged at the pod or container boundary and the
//! run carries on.

use defectdojo_client::DefectDojoError;
use kube::Error as KubeError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while collecting cluster inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The namespace selection pattern is not a valid regular expression
    #[error("Invalid namespace pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Listing namespaces failed, so the pattern cannot be evaluated
    #[error("Failed to list namespaces: {0}")]
    ListNamespaces(#[source] KubeError),

    /// Listing pods in one namespace failed
    #[error("Failed to list pods in namespace {namespace}: {source}")]
    ListPods {
        namespace: String,
        #[source]
        source: KubeError,
    },
}

/// Errors raised while resolving an image digest from its registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("Registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry returned {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Registry authentication failed: {0}")]
    Unauthorized(String),

    #[error("Registry response for {0} carries no digest")]
    MissingDigest(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur in the image scan controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// DefectDojo API error outside of a fatal context
    #[error("DefectDojo error: {0}")]
    DefectDojo(#[from] DefectDojoError),

    /// Cluster inventory could not be collected
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// Configuration could not be loaded or is inconsistent
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid runtime configuration detected after loading
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The namespace to product type mapping could not be built
    #[error("Failed to build product type directory: {0}")]
    Directory(#[source] DefectDojoError),

    /// A product could not be created or resolved by name
    #[error("Product {name} could not be resolved: {reason}")]
    ProductResolution { name: String, reason: String },

    /// A stale engagement could not be retired
    #[error("Failed to delete engagement {engagement} of product {product}: {source}")]
    EngagementDelete {
        product: u64,
        engagement: u64,
        #[source]
        source: DefectDojoError,
    },

    /// The metrics endpoint could not be started
    #[error("Metrics server error: {0}")]
    Metrics(String),

    /// The run was cancelled before all pods were processed
    #[error("Run cancelled")]
    Cancelled,
}

impl ControllerError {
    /// Whether this error aborts the whole run.
    ///
    /// Pod-scoped failures (product resolution, engagement listing and any
    /// other tracking-system error) are not fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            ControllerError::Kube(_)
            | ControllerError::Inventory(_)
            | ControllerError::Config(_)
            | ControllerError::InvalidConfig(_)
            | ControllerError::Directory(_)
            | ControllerError::EngagementDelete { .. }
            | ControllerError::Metrics(_)
            | ControllerError::Cancelled => true,
            ControllerError::DefectDojo(_) | ControllerError::ProductResolution { .. } => false,
        }
    }
}
