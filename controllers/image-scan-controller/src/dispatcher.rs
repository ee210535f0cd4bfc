//! Scan dispatcher.
//!
//! For one pod and one scan type, makes sure every container image has a
//! test recorded in DefectDojo, running the scanner only for images that have
//! none. Every failure in here is scoped to a single container.

use crate::inventory::{Container, PodRecord};
use crate::scan::ScanType;
use crate::stats::RunStatistics;
use defectdojo_client::{DefectDojoClientTrait, ImportScanRequest};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Per-call counters, mainly for tests and debug logging
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Scanned and imported
    pub imported: usize,
    /// A test for this scan type and digest already existed
    pub already_scanned: usize,
    /// No digest to scan
    pub skipped: usize,
    /// Test lookup, scan or import failed
    pub failed: usize,
}

/// Runs the scanners of one scan type over the containers of a pod
pub struct ScanDispatcher<'a> {
    client: &'a dyn DefectDojoClientTrait,
    stats: &'a RunStatistics,
    keep_artifacts: bool,
}

impl<'a> ScanDispatcher<'a> {
    /// Create a new dispatcher; artifacts are removed after import unless `keep_artifacts`
    pub fn new(client: &'a dyn DefectDojoClientTrait, stats: &'a RunStatistics, keep_artifacts: bool) -> Self {
        Self {
            client,
            stats,
            keep_artifacts,
        }
    }

    /// Scan and import every container image of `pod` not yet tested with `scan_type`.
    ///
    /// Failures are logged and counted per container; they never stop the pod.
    pub async fn dispatch(&self, pod: &PodRecord, scan_type: &ScanType) -> DispatchReport {
        let mut report = DispatchReport::default();
        for container in &pod.containers {
            self.dispatch_container(pod, container, scan_type, &mut report).await;
        }
        debug!(
            "{}: {} imported {}, already scanned {}, skipped {}, failed {}",
            pod.key(),
            scan_type.name,
            report.imported,
            report.already_scanned,
            report.skipped,
            report.failed
        );
        report
    }

    async fn dispatch_container(
        &self,
        pod: &PodRecord,
        container: &Container,
        scan_type: &ScanType,
        report: &mut DispatchReport,
    ) {
        let digest = container.digest.as_str();
        if digest.is_empty() {
            warn!(
                "{}: container {} ({}) has no digest - possible no access to image",
                pod.key(),
                container.name,
                container.image
            );
            report.skipped += 1;
            return;
        }

        let tests = match self.client.query_tests(&[("tag", digest)], true).await {
            Ok(tests) => tests,
            Err(e) => {
                error!("{}: cannot list tests for {}: {}", pod.key(), digest, e);
                self.stats.record_failure();
                report.failed += 1;
                return;
            }
        };
        if tests.iter().any(|t| t.covers(&scan_type.name, digest)) {
            info!("{}: {} already scanned with {}", pod.key(), digest, scan_type.name);
            report.already_scanned += 1;
            return;
        }

        let artifact = match scan_type.scanner.scan(digest).await {
            Ok(path) => path,
            Err(e) => {
                error!("{}: {} scan of {} failed: {:#}", pod.key(), scan_type.name, digest, e);
                self.stats.record_failure();
                report.failed += 1;
                return;
            }
        };
        self.stats.record_scan();

        let request = ImportScanRequest {
            product_type_name: pod.namespace.clone(),
            product_name: pod.name.clone(),
            engagement_name: scan_type.lane.clone(),
            test_title: container.name.clone(),
            scan_type: scan_type.name.clone(),
            image_digest: digest.to_string(),
            scan_date: chrono::Utc::now().date_naive(),
            artifact,
        };
        match self.client.import_scan(&request).await {
            Ok(response) => {
                info!(
                    "{}: imported {} results for {} (test {:?})",
                    pod.key(),
                    scan_type.name,
                    digest,
                    response.test
                );
                self.stats.record_import();
                report.imported += 1;
            }
            Err(e) => {
                error!("{}: import of {} results for {} failed: {}", pod.key(), scan_type.name, digest, e);
                self.stats.record_failure();
                report.failed += 1;
            }
        }

        if !self.keep_artifacts {
            remove_artifact(&request.artifact).await;
        }
    }
}

async fn remove_artifact(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove artifact {}: {}", path.display(), e);
    }
}
