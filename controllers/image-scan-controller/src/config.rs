//! Controller configuration.
//!
//! Loaded from a YAML file; secrets and namespace selectors can be overridden
//! from the environment so the same file works across clusters.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub defect_dojo: DefectDojoConfig,
    pub scanner: ScannerConfig,
    pub scan_types: Vec<ScanTypeConfig>,
    pub run: RunConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// API server URL; the inferred kubeconfig / in-cluster URL is used when unset
    pub api_url: Option<String>,
    /// Comma-separated namespace names, used verbatim
    pub namespace_list: Option<String>,
    /// Regular expression matched against every live namespace; wins over the list
    pub namespace_regex: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            namespace_list: None,
            namespace_regex: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefectDojoConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Push the deduplication settings below to DefectDojo at the start of each pass
    pub sync_settings: bool,
    pub enable_deduplication: bool,
    pub delete_duplicates: bool,
    pub max_duplicates: u32,
}

impl Default for DefectDojoConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            username: None,
            password: None,
            sync_settings: false,
            enable_deduplication: true,
            delete_duplicates: false,
            max_duplicates: 0,
        }
    }
}

/// How the controller authenticates against DefectDojo
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    Password { username: String, password: String },
}

impl DefectDojoConfig {
    /// Resolve credentials; an API token wins over username/password
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_empty()) {
            return Some(Credentials::Token(token.clone()));
        }
        match (&self.username, &self.password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Credentials::Password {
                username: u.clone(),
                password: p.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Directory scan artifacts are written to
    pub artifact_dir: PathBuf,
    /// Keep artifacts after a successful import
    pub keep_artifacts: bool,
    pub grype: GrypeConfig,
    pub trivy: TrivyConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("/tmp/image-scans"),
            keep_artifacts: false,
            grype: GrypeConfig::default(),
            trivy: TrivyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrypeConfig {
    pub binary: String,
    pub db_root_dir: Option<PathBuf>,
    pub listing_url: Option<String>,
}

impl Default for GrypeConfig {
    fn default() -> Self {
        Self {
            binary: "grype".to_string(),
            db_root_dir: None,
            listing_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrivyConfig {
    pub binary: String,
    pub cache_dir: Option<PathBuf>,
}

impl Default for TrivyConfig {
    fn default() -> Self {
        Self {
            binary: "trivy".to_string(),
            cache_dir: None,
        }
    }
}

/// One scan type row: `{name, lane, function, enabled}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanTypeConfig {
    /// DefectDojo scan type, e.g. "Anchore Grype"
    pub name: String,
    /// Engagement lane name, e.g. "Grype"
    #[serde(alias = "engName")]
    pub lane: String,
    /// Registered scan function, e.g. "RunGrype"
    pub function: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Pods reconciled concurrently
    pub workers: usize,
    pub http_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Seconds between passes; 0 runs a single pass
    pub interval_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            http_timeout_secs: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            interval_secs: 0,
        }
    }
}

impl RunConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for `/metrics` and `/healthz`, e.g. "0.0.0.0:9090"
    pub listen_addr: Option<String>,
}

impl Config {
    /// Read the file, apply environment overrides and validate.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let mut config = Self::parse(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document without overrides or validation
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Override settings from the environment.
    ///
    /// `lookup` returns the value of a variable, `None` when unset.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut Option<String>, key: &str| {
            if let Some(value) = lookup(key) {
                *target = Some(value);
            }
        };

        set(&mut self.defect_dojo.url, "DEFECTDOJO_URL");
        set(&mut self.defect_dojo.token, "DEFECTDOJO_TOKEN");
        set(&mut self.defect_dojo.username, "DEFECTDOJO_USERNAME");
        set(&mut self.defect_dojo.password, "DEFECTDOJO_PASSWORD");
        set(&mut self.cluster.api_url, "CLUSTER_URL");
        set(&mut self.cluster.namespace_list, "NAMESPACE_LIST");
        set(&mut self.cluster.namespace_regex, "NAMESPACE_REGEX");

        if let Some(value) = lookup("SCAN_WORKERS") {
            match value.parse::<usize>() {
                Ok(workers) => self.run.workers = workers,
                Err(_) => warn!(value = value.as_str(), "failed to parse SCAN_WORKERS, ignoring"),
            }
        }
    }

    /// Reject configurations the controller cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.defect_dojo.url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid(
                "DefectDojo URL is required (defect_dojo.url or DEFECTDOJO_URL)".to_string(),
            ));
        }
        if self.defect_dojo.credentials().is_none() {
            return Err(ConfigError::Invalid(
                "DefectDojo credentials are required (DEFECTDOJO_TOKEN, or DEFECTDOJO_USERNAME and DEFECTDOJO_PASSWORD)"
                    .to_string(),
            ));
        }
        if self.run.workers == 0 {
            return Err(ConfigError::Invalid("run.workers must be greater than 0".to_string()));
        }

        let has_list = self.cluster.namespace_list.as_deref().is_some_and(|l| !l.trim().is_empty());
        let has_regex = self.cluster.namespace_regex.as_deref().is_some_and(|r| !r.is_empty());
        if !has_list && !has_regex {
            return Err(ConfigError::Invalid(
                "either cluster.namespace_list or cluster.namespace_regex must be set".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for scan_type in &self.scan_types {
            if !names.insert(scan_type.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate scan type '{}'", scan_type.name)));
            }
            if scan_type.lane.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "scan type '{}' has an empty lane name",
                    scan_type.name
                )));
            }
        }

        Ok(())
    }
}
