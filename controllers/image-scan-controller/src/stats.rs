//! Run statistics.
//!
//! One accumulator per pass, shared by the pod workers. All counters are
//! atomic so pods can be processed in parallel.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug)]
pub struct RunStatistics {
    started: Instant,
    scanning_tools: u64,
    pods: AtomicU64,
    images: AtomicU64,
    scans: AtomicU64,
    imports: AtomicU64,
    failures: AtomicU64,
}

/// Final counters of a completed pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub pods_scanned: u64,
    pub images_scanned: u64,
    pub scanning_tools: u64,
    pub scans_run: u64,
    pub imports: u64,
    pub failures: u64,
    #[serde(skip)]
    pub duration: Duration,
}

impl RunStatistics {
    /// Start counting a pass that uses `scanning_tools` scan types
    pub fn new(scanning_tools: usize) -> Self {
        Self {
            started: Instant::now(),
            scanning_tools: scanning_tools as u64,
            pods: AtomicU64::new(0),
            images: AtomicU64::new(0),
            scans: AtomicU64::new(0),
            imports: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// A pod finished processing with `images` containers
    pub fn record_pod(&self, images: usize) {
        self.pods.fetch_add(1, Ordering::Relaxed);
        self.images.fetch_add(images as u64, Ordering::Relaxed);
    }

    pub fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_import(&self) {
        self.imports.fetch_add(1, Ordering::Relaxed);
    }

    /// A container-scoped failure (scan, import or test lookup)
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters and the elapsed time
    pub fn finish(&self) -> RunSummary {
        RunSummary {
            pods_scanned: self.pods.load(Ordering::Relaxed),
            images_scanned: self.images.load(Ordering::Relaxed),
            scanning_tools: self.scanning_tools,
            scans_run: self.scans.load(Ordering::Relaxed),
            imports: self.imports.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            duration: self.started.elapsed(),
        }
    }
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            pods = self.pods_scanned,
            images = self.images_scanned,
            tools = self.scanning_tools,
            scans = self.scans_run,
            imports = self.imports,
            failures = self.failures,
            "Scanning complete: scanned {} pods with {} images using {} scanning tools in {:.1?}",
            self.pods_scanned,
            self.images_scanned,
            self.scanning_tools,
            self.duration
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_updates_are_counted() {
        let stats = Arc::new(RunStatistics::new(2));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    stats.record_pod(3);
                    stats.record_scan();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let summary = stats.finish();
        assert_eq!(summary.pods_scanned, 800);
        assert_eq!(summary.images_scanned, 2400);
        assert_eq!(summary.scans_run, 800);
        assert_eq!(summary.scanning_tools, 2);
        assert_eq!(summary.failures, 0);
    }
}
