//! Image Scan Controller
//!
//! Mirrors the pods of selected cluster namespaces into DefectDojo and scans
//! their container images:
//! - Namespace: DefectDojo product type
//! - Pod: product
//! - Scan lane: engagement tagged with the image digests it covers
//! - Scanned image: test, imported from the scanner report
//!
//! Images are only scanned again when the set running in a pod changes.

mod backoff;
mod cli;
mod config;
mod controller;
mod directory;
mod dispatcher;
mod dojo;
mod error;
mod inventory;
mod metrics;
mod reconciler;
mod scan;
mod stats;
mod tag_set;
#[cfg(test)]
mod test_utils;

use crate::backoff::RetryPolicy;
use crate::cli::{Cli, Command};
use crate::config::{Config, Credentials};
use crate::controller::Controller;
use crate::dojo::RetryingDojoClient;
use crate::error::ControllerError;
use crate::inventory::cluster::KubeCluster;
use crate::inventory::registry::HttpRegistryResolver;
use crate::inventory::{InventoryCollector, NamespaceSelection};
use crate::metrics::Metrics;
use crate::scan::{load_scan_types, ScanRegistry};
use clap::Parser;
use defectdojo_client::{DefectDojoClient, DefectDojoClientTrait};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_defect_dojo(config: &Config, retry: RetryPolicy) -> Result<RetryingDojoClient, ControllerError> {
    let url = config.defect_dojo.url.clone().unwrap_or_default();
    let timeout = config.run.http_timeout();

    let client = match config.defect_dojo.credentials() {
        Some(Credentials::Token(token)) => DefectDojoClient::with_timeout(url.clone(), token, timeout)?,
        Some(Credentials::Password { username, password }) => {
            info!("No API token configured, logging in as {}", username);
            DefectDojoClient::login(url.clone(), &username, &password, timeout).await?
        }
        None => {
            return Err(ControllerError::InvalidConfig(
                "DefectDojo credentials are required".to_string(),
            ))
        }
    };
    let client = RetryingDojoClient::new(Box::new(client), retry);

    // Validate token and connectivity before proceeding
    info!("Validating DefectDojo token and connectivity...");
    client.validate_token().await.map_err(|e| {
        error!("Failed to validate DefectDojo token: {}", e);
        error!("Please ensure:");
        error!("  1. DEFECTDOJO_TOKEN (or DEFECTDOJO_USERNAME/DEFECTDOJO_PASSWORD) is set correctly");
        error!("  2. The token is valid in DefectDojo");
        error!("  3. DefectDojo is reachable at {}", url);
        ControllerError::DefectDojo(e)
    })?;
    info!("DefectDojo token validated and connectivity established");

    Ok(client)
}

async fn build_controller(config: Config) -> Result<Controller, ControllerError> {
    let retry = RetryPolicy::from_config(&config.run);
    let client: Arc<dyn DefectDojoClientTrait> = Arc::new(connect_defect_dojo(&config, retry).await?);

    let selection = NamespaceSelection::from_config(&config.cluster)?;
    let cluster = KubeCluster::connect(&config.cluster, retry).await?;
    let resolver = HttpRegistryResolver::new(config.run.http_timeout())
        .map_err(|e| ControllerError::InvalidConfig(format!("cannot build registry client: {}", e)))?;
    let collector = InventoryCollector::new(Arc::new(cluster), Arc::new(resolver));

    let scan_types = load_scan_types(&config.scan_types, &ScanRegistry::builtin(), &config.scanner);
    if scan_types.is_empty() {
        warn!("No scan types enabled; engagements are maintained but nothing is scanned");
    }

    Ok(Controller::new(client, collector, selection, scan_types, config))
}

/// Cancel `shutdown` on Ctrl-C
fn watch_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            init_logging(false);
            error!("Failed to load configuration from {}: {}", cli.config.display(), e);
            return Err(e.into());
        }
    };
    init_logging(config.logging.json);

    // kube and reqwest both use rustls; pin the process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Image Scan Controller");
    info!("Configuration:");
    info!("  DefectDojo URL: {}", config.defect_dojo.url.as_deref().unwrap_or_default());
    let namespaces = match config.cluster.namespace_regex.as_deref().filter(|r| !r.is_empty()) {
        Some(pattern) => format!("matching /{}/", pattern),
        None => config.cluster.namespace_list.clone().unwrap_or_default(),
    };
    info!("  Namespaces: {}", namespaces);
    info!("  Workers: {}", config.run.workers);

    let command = cli.command();
    let interval = Duration::from_secs(config.run.interval_secs);
    let metrics_addr = config.metrics.listen_addr.clone();
    let controller = build_controller(config).await?;

    match command {
        Command::Clean => {
            let deleted = controller.clean().await?;
            info!("Deleted {} product type(s)", deleted);
        }
        Command::Run { once } if once || interval.is_zero() => {
            let shutdown = CancellationToken::new();
            watch_ctrl_c(shutdown.clone());
            controller.run_once(&shutdown).await?;
        }
        Command::Run { .. } => {
            let shutdown = CancellationToken::new();
            watch_ctrl_c(shutdown.clone());

            let controller = match metrics_addr {
                Some(addr) => {
                    let metrics = Arc::new(Metrics::new()?);
                    let served = Arc::clone(&metrics);
                    let stop = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = metrics::serve(&addr, served, stop).await {
                            error!("{}", e);
                        }
                    });
                    controller.with_metrics(metrics)
                }
                None => controller,
            };

            info!("Running a pass every {:?}", interval);
            controller.run_periodic(interval, shutdown).await;
        }
    }

    Ok(())
}
