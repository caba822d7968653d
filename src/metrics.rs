//! Prometheus metrics registry and instruments.
//!
//! Instruments can be used before `init_metrics`; registration only makes
//! them visible on the `/metrics` endpoint.

use axum::{
    Router,
    response::{IntoResponse, Response},
    routing::get,
};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{RelayError, Result};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Cycle Metrics
    pub static ref CYCLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("backup_relay_cycles_total", "Total number of backup cycles"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref BYTES_RELAYED_TOTAL: IntCounter = IntCounter::new(
        "backup_relay_bytes_relayed_total",
        "Total bytes handed to the destination"
    ).expect("metric can be created");
    pub static ref LAST_SUCCESS_TIMESTAMP_SECONDS: IntGauge = IntGauge::new(
        "backup_relay_last_success_timestamp_seconds",
        "Unix time of the last successful cycle"
    ).expect("metric can be created");

    // HTTP Metrics
    pub static ref HTTP_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("backup_relay_http_attempts_total", "Total number of outbound HTTP attempts"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref HTTP_RETRIES_TOTAL: IntCounter = IntCounter::new(
        "backup_relay_http_retries_total",
        "Total number of resends after server errors"
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_metrics() {
    let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
        Box::new(CYCLES_TOTAL.clone()),
        Box::new(BYTES_RELAYED_TOTAL.clone()),
        Box::new(LAST_SUCCESS_TIMESTAMP_SECONDS.clone()),
        Box::new(HTTP_ATTEMPTS_TOTAL.clone()),
        Box::new(HTTP_RETRIES_TOTAL.clone()),
    ];
    for collector in collectors {
        if let Err(error) = REGISTRY.register(collector) {
            tracing::debug!(%error, "Metric already registered");
        }
    }

    tracing::info!("Metrics registry initialized");
}

/// Metrics endpoint handler
///
/// Returns all metrics in Prometheus text format.
async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            )
                .into_response()
        }
    }
}

/// Create metrics router
///
/// Exposes `/metrics` and a plain `/health` probe.
pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "OK" }))
}

/// Bind the metrics endpoint and serve it in the background
///
/// # Errors
/// Returns error if the address cannot be bound
pub async fn spawn_metrics_server(bind: &str) -> Result<std::net::SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| RelayError::Config(format!("metrics.bind {}: {}", bind, e)))?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, metrics_router()).await {
            tracing::error!(%error, "Metrics server stopped");
        }
    });

    tracing::info!(%addr, "Metrics endpoint listening");
    Ok(addr)
}
