//! Scan functions and the scan-type catalogue.
//!
//! A scan type pairs a DefectDojo scan type name and an engagement lane with a
//! [`Scanner`]. Scanners are looked up by function name in a [`ScanRegistry`];
//! new scanners are added by registering a factory and adding a config row.

pub mod grype;
pub mod trivy;

use crate::config::{ScanTypeConfig, ScannerConfig};
use anyhow::{bail, Context};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A vulnerability scanner producing a JSON report for one image
#[async_trait::async_trait]
pub trait Scanner: Send + Sync {
    /// Short tool name used in artifact file names
    fn tool(&self) -> &str;

    /// Refresh the vulnerability database; run once per pass
    async fn prepare(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Scan `image` and return the path of the report artifact
    async fn scan(&self, image: &str) -> anyhow::Result<PathBuf>;
}

/// Builds a scanner from the scanner section of the configuration
pub type ScannerFactory = fn(&ScannerConfig) -> Arc<dyn Scanner>;

/// Capability map from function name to scanner factory
#[derive(Default)]
pub struct ScanRegistry {
    factories: HashMap<String, ScannerFactory>,
}

impl std::fmt::Debug for ScanRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl ScanRegistry {
    /// Registry with the built-in `RunGrype` and `RunTrivy` functions
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register("RunGrype", grype::factory);
        registry.register("RunTrivy", trivy::factory);
        registry
    }

    /// Register `factory` under `function`, replacing any previous entry
    pub fn register(&mut self, function: &str, factory: ScannerFactory) {
        self.factories.insert(function.to_string(), factory);
    }

    pub fn get(&self, function: &str) -> Option<ScannerFactory> {
        self.factories.get(function).copied()
    }
}

/// An enabled scan type, immutable for the duration of a run
#[derive(Clone)]
pub struct ScanType {
    /// DefectDojo scan type name, e.g. "Anchore Grype"
    pub name: String,
    /// Engagement lane name
    pub lane: String,
    pub scanner: Arc<dyn Scanner>,
}

impl std::fmt::Debug for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanType")
            .field("name", &self.name)
            .field("lane", &self.lane)
            .field("tool", &self.scanner.tool())
            .finish()
    }
}

/// Build the enabled scan types. Rows naming an unknown function are skipped.
pub fn load_scan_types(rows: &[ScanTypeConfig], registry: &ScanRegistry, config: &ScannerConfig) -> Vec<ScanType> {
    let mut scan_types = Vec::new();
    for row in rows {
        if !row.enabled {
            debug!("Scan type {} is disabled", row.name);
            continue;
        }
        let Some(factory) = registry.get(&row.function) else {
            warn!("Scan type {} references unknown function {}, skipping", row.name, row.function);
            continue;
        };
        info!("Scan type {} enabled (lane {}, function {})", row.name, row.lane, row.function);
        scan_types.push(ScanType {
            name: row.name.clone(),
            lane: row.lane.clone(),
            scanner: factory(config),
        });
    }
    scan_types
}

/// Artifact path `<dir>/<last-segment>_<tool>_<timestamp>_<uuid>.json`
pub fn artifact_path(dir: &Path, image: &str, tool: &str) -> PathBuf {
    let last = image.rsplit('/').next().unwrap_or(image);
    let last: String = last
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    dir.join(format!("{}_{}_{}_{}.json", last, tool, timestamp, uuid::Uuid::new_v4()))
}

/// Run an external command and fail with its stderr when it exits non-zero
pub(crate) async fn run_command(mut command: Command, what: &str) -> anyhow::Result<()> {
    command.stdout(Stdio::null()).stderr(Stdio::piped()).kill_on_drop(true);
    let output = command
        .output()
        .await
        .with_context(|| format!("failed to start {}", what))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(5)..].join("\n");
        bail!("{} exited with {}: {}", what, output.status, tail);
    }
    Ok(())
}

/// Run a scanner writing to `artifact`; a failed run leaves no artifact behind
pub(crate) async fn run_scanner(command: Command, what: &str, artifact: &Path) -> anyhow::Result<()> {
    let result = run_command(command, what).await;
    if result.is_err() {
        match tokio::fs::remove_file(artifact).await {
            Ok(()) => debug!("Removed partial artifact {}", artifact.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial artifact {}: {}", artifact.display(), e),
        }
    }
    result
}

/// Create the artifact directory and pick a path for the next report
pub(crate) async fn prepare_artifact(dir: &Path, image: &str, tool: &str) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create artifact directory {}", dir.display()))?;
    Ok(artifact_path(dir, image, tool))
}
