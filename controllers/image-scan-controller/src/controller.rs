//! Main controller implementation.
//!
//! This module contains the `Controller` struct that runs reconciliation
//! passes: collect the inventory, build the product type directory, then
//! reconcile and scan every pod on a bounded worker pool.

use crate::config::Config;
use crate::directory::{ensure_product, Directory};
use crate::dispatcher::ScanDispatcher;
use crate::error::ControllerError;
use crate::inventory::{InventoryCollector, NamespaceSelection, PodRecord};
use crate::metrics::Metrics;
use crate::reconciler::EngagementReconciler;
use crate::scan::ScanType;
use crate::stats::{RunStatistics, RunSummary};
use defectdojo_client::{DefectDojoClientTrait, SystemSettingsUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Runs reconciliation passes against one cluster and one DefectDojo
pub struct Controller {
    client: Arc<dyn DefectDojoClientTrait>,
    collector: InventoryCollector,
    selection: NamespaceSelection,
    scan_types: Arc<Vec<ScanType>>,
    config: Config,
    metrics: Option<Arc<Metrics>>,
}

/// State shared by the pod workers of one pass
struct PassContext {
    client: Arc<dyn DefectDojoClientTrait>,
    directory: Directory,
    scan_types: Arc<Vec<ScanType>>,
    stats: RunStatistics,
    keep_artifacts: bool,
    // product names are unique across DefectDojo, so pods sharing a name
    // in different namespaces must not race on create
    product_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PassContext {
    async fn product_lock(&self, product: &str) -> Arc<Mutex<()>> {
        let mut locks = self.product_locks.lock().await;
        Arc::clone(locks.entry(product.to_string()).or_default())
    }
}

impl Controller {
    /// Create a new controller
    pub fn new(
        client: Arc<dyn DefectDojoClientTrait>,
        collector: InventoryCollector,
        selection: NamespaceSelection,
        scan_types: Vec<ScanType>,
        config: Config,
    ) -> Self {
        Self {
            client,
            collector,
            selection,
            scan_types: Arc::new(scan_types),
            config,
            metrics: None,
        }
    }

    /// Feed the summary of every completed pass into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one full pass.
    ///
    /// Returns the statistics of a completed pass. A fatal error stops
    /// scheduling new pods and is returned once in-flight pods have finished.
    pub async fn run_once(&self, shutdown: &CancellationToken) -> Result<RunSummary, ControllerError> {
        info!("Starting reconciliation pass with {} scan type(s)", self.scan_types.len());
        let stats = RunStatistics::new(self.scan_types.len());

        if self.config.defect_dojo.sync_settings {
            self.sync_system_settings().await;
        }

        let namespaces = self.collector.resolve_namespaces(&self.selection).await?;
        if namespaces.is_empty() {
            warn!("No namespaces selected");
        }
        let pods = self.collector.collect(&namespaces).await;
        let directory = Directory::build(self.client.as_ref(), &namespaces).await?;

        self.prepare_scanners().await;

        let context = Arc::new(PassContext {
            client: Arc::clone(&self.client),
            directory,
            scan_types: Arc::clone(&self.scan_types),
            stats,
            keep_artifacts: self.config.scanner.keep_artifacts,
            product_locks: Mutex::new(HashMap::new()),
        });
        self.process_pods(&context, pods, shutdown).await?;

        let summary = context.stats.finish();
        summary.log();
        if let Some(metrics) = &self.metrics {
            metrics.observe(&summary);
        }
        Ok(summary)
    }

    /// Run passes every `interval` until `shutdown` fires.
    ///
    /// A failed pass is logged and retried at the next interval.
    pub async fn run_periodic(&self, interval: Duration, shutdown: CancellationToken) {
        loop {
            match self.run_once(&shutdown).await {
                Ok(_) => {}
                Err(ControllerError::Cancelled) => break,
                Err(e) => error!("Reconciliation pass failed: {}", e),
            }

            debug!("Next pass in {:?}", interval);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Periodic reconciliation stopped");
    }

    /// Delete every product type, returning how many were removed
    pub async fn clean(&self) -> Result<usize, ControllerError> {
        let product_types = self.client.query_product_types(&[], true).await?;
        info!("Deleting {} product type(s)", product_types.len());

        let mut deleted = 0;
        for product_type in product_types {
            match self.client.delete_product_type(product_type.id).await {
                Ok(()) => {
                    info!("Deleted product type {} (ID: {})", product_type.name, product_type.id);
                    deleted += 1;
                }
                Err(e) => warn!("Failed to delete product type {}: {}", product_type.name, e),
            }
        }
        Ok(deleted)
    }

    async fn sync_system_settings(&self) {
        let wanted = SystemSettingsUpdate {
            enable_deduplication: self.config.defect_dojo.enable_deduplication,
            delete_duplicates: self.config.defect_dojo.delete_duplicates,
            max_dupes: self.config.defect_dojo.max_duplicates,
        };

        let current = match self.client.get_system_settings().await {
            Ok(Some(current)) => current,
            Ok(None) => {
                warn!("DefectDojo returned no system settings, skipping sync");
                return;
            }
            Err(e) => {
                warn!("Failed to read system settings: {}", e);
                return;
            }
        };

        let unchanged = current.enable_deduplication == wanted.enable_deduplication
            && current.delete_duplicates == wanted.delete_duplicates
            && current.max_dupes == Some(wanted.max_dupes);
        if unchanged {
            debug!("System settings already up to date");
            return;
        }

        match self.client.update_system_settings(current.id, &wanted).await {
            Ok(_) => info!(
                "Updated system settings: deduplication={}, delete duplicates={}, max duplicates={}",
                wanted.enable_deduplication, wanted.delete_duplicates, wanted.max_dupes
            ),
            Err(e) => warn!("Failed to update system settings: {}", e),
        }
    }

    async fn prepare_scanners(&self) {
        let results = futures::future::join_all(self.scan_types.iter().map(|st| st.scanner.prepare())).await;
        for (scan_type, result) in self.scan_types.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to prepare scanner for {}: {:#}", scan_type.name, e);
            }
        }
    }

    async fn process_pods(
        &self,
        context: &Arc<PassContext>,
        pods: Vec<PodRecord>,
        shutdown: &CancellationToken,
    ) -> Result<(), ControllerError> {
        let cancel = shutdown.child_token();
        let permits = Arc::new(Semaphore::new(self.config.run.workers.max(1)));
        let mut workers = JoinSet::new();
        let mut fatal: Option<ControllerError> = None;

        for pod in pods {
            while let Some(done) = workers.try_join_next() {
                record_outcome(done, &mut fatal, &cancel);
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let span = info_span!("pod", namespace = %pod.namespace, pod = %pod.name);
            let context = Arc::clone(context);
            let stop = cancel.clone();
            workers.spawn(
                async move {
                    let result = process_pod(&context, &pod).await;
                    // cancel before the permit is released so no further pod is admitted
                    if result.is_err() {
                        stop.cancel();
                    }
                    drop(permit);
                    result
                }
                .instrument(span),
            );
        }

        while let Some(done) = workers.join_next().await {
            record_outcome(done, &mut fatal, &cancel);
        }

        match fatal {
            Some(e) => Err(e),
            None if shutdown.is_cancelled() => Err(ControllerError::Cancelled),
            None => Ok(()),
        }
    }
}

fn record_outcome(
    done: Result<Result<(), ControllerError>, tokio::task::JoinError>,
    fatal: &mut Option<ControllerError>,
    cancel: &CancellationToken,
) {
    match done {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Fatal error, stopping the pass: {}", e);
            cancel.cancel();
            fatal.get_or_insert(e);
        }
        Err(e) => error!("Pod worker panicked: {}", e),
    }
}

/// Reconcile and scan one pod. Only fatal errors are returned.
async fn process_pod(context: &PassContext, pod: &PodRecord) -> Result<(), ControllerError> {
    let Some(prod_type) = context.directory.product_type(&pod.namespace) else {
        warn!("No product type for namespace {}, skipping pod", pod.namespace);
        return Ok(());
    };

    debug!(
        "Processing pod with {} container(s), started {}",
        pod.containers.len(),
        pod.start_time.as_deref().unwrap_or("unknown")
    );
    let lock = context.product_lock(&pod.name).await;
    let _guard = lock.lock().await;

    let client = context.client.as_ref();
    let description = format!("Pod {} in namespace {}", pod.name, pod.namespace);
    let product = match ensure_product(client, &pod.name, prod_type, &description).await {
        Ok(product) => product,
        Err(e) if !e.is_fatal() => {
            error!("Skipping pod: {}", e);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let reconciler = EngagementReconciler::new(client);
    let existing = match reconciler.engagements(product.id).await {
        Ok(existing) => existing,
        Err(e) => {
            error!("Skipping pod, cannot list engagements of product {}: {}", product.id, e);
            return Ok(());
        }
    };

    let dispatcher = ScanDispatcher::new(client, &context.stats, context.keep_artifacts);
    for lane in lanes(&context.scan_types) {
        let outcome = reconciler.reconcile(product.id, pod, lane, &existing).await?;
        debug!("Lane {}: {:?}", lane, outcome);
        if !outcome.should_dispatch() {
            continue;
        }
        for scan_type in context.scan_types.iter().filter(|st| st.lane == lane) {
            dispatcher.dispatch(pod, scan_type).await;
        }
    }

    context.stats.record_pod(pod.containers.len());
    Ok(())
}

/// Distinct lanes in configuration order
fn lanes(scan_types: &[ScanType]) -> Vec<&str> {
    let mut lanes: Vec<&str> = Vec::new();
    for scan_type in scan_types {
        if !lanes.contains(&scan_type.lane.as_str()) {
            lanes.push(&scan_type.lane);
        }
    }
    lanes
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;
