//! Prometheus metrics and the health endpoint.
//!
//! Counters are fed from the summary of every completed pass. The HTTP
//! server only runs in periodic mode, when `metrics.listen_addr` is set.

use crate::error::ControllerError;
use crate::stats::RunSummary;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Prometheus metrics of the controller, one sample per completed pass
pub struct Metrics {
    registry: Registry,
    passes: IntCounter,
    pods: IntCounter,
    images: IntCounter,
    scans: IntCounter,
    imports: IntCounter,
    failures: IntCounter,
    scanning_tools: IntGauge,
    last_pass_seconds: Gauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace("image_scan"))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    /// Create and register all metrics in a fresh registry
    pub fn new() -> Result<Self, ControllerError> {
        Self::register().map_err(|e| ControllerError::Metrics(e.to_string()))
    }

    fn register() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let scanning_tools = IntGauge::with_opts(
            Opts::new("scanning_tools", "Enabled scan types").namespace("image_scan"),
        )?;
        registry.register(Box::new(scanning_tools.clone()))?;
        let last_pass_seconds = Gauge::with_opts(
            Opts::new("last_pass_duration_seconds", "Duration of the last completed pass").namespace("image_scan"),
        )?;
        registry.register(Box::new(last_pass_seconds.clone()))?;

        Ok(Self {
            passes: counter(&registry, "passes_total", "Completed reconciliation passes")?,
            pods: counter(&registry, "pods_scanned_total", "Pods processed")?,
            images: counter(&registry, "images_scanned_total", "Container images processed")?,
            scans: counter(&registry, "scans_total", "Scanner invocations that produced a report")?,
            imports: counter(&registry, "imports_total", "Reports imported into DefectDojo")?,
            failures: counter(&registry, "failures_total", "Container-scoped scan, import and lookup failures")?,
            scanning_tools,
            last_pass_seconds,
            registry,
        })
    }

    /// Fold a completed pass into the counters
    pub fn observe(&self, summary: &RunSummary) {
        self.passes.inc();
        self.pods.inc_by(summary.pods_scanned);
        self.images.inc_by(summary.images_scanned);
        self.scans.inc_by(summary.scans_run);
        self.imports.inc_by(summary.imports);
        self.failures.inc_by(summary.failures);
        self.scanning_tools.set(summary.scanning_tools as i64);
        self.last_pass_seconds.set(summary.duration.as_secs_f64());
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Routes for `/metrics` and `/healthz`
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Serve `/metrics` and `/healthz` on `addr` until `shutdown` fires
pub async fn serve(addr: &str, metrics: Arc<Metrics>, shutdown: CancellationToken) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Metrics(format!("cannot bind {}: {}", addr, e)))?;
    info!("Serving metrics on {}", addr);

    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ControllerError::Metrics(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn summary() -> RunSummary {
        RunSummary {
            pods_scanned: 3,
            images_scanned: 5,
            scanning_tools: 2,
            scans_run: 4,
            imports: 4,
            failures: 1,
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_observe_accumulates_across_passes() {
        let metrics = Metrics::new().unwrap();
        metrics.observe(&summary());
        metrics.observe(&summary());

        let text = metrics.render().unwrap();
        assert!(text.contains("image_scan_passes_total 2"));
        assert!(text.contains("image_scan_pods_scanned_total 6"));
        assert!(text.contains("image_scan_failures_total 2"));
        assert!(text.contains("image_scan_scanning_tools 2"));
        assert!(text.contains("image_scan_last_pass_duration_seconds 1.5"));
    }

    #[tokio::test]
    async fn test_metrics_handler_serves_text_format() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.observe(&summary());

        let response = metrics_handler(State(metrics)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            prometheus::TEXT_FORMAT
        );
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        serve("127.0.0.1:0", metrics, shutdown).await.unwrap();
    }
}
