// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the MLA operator.
//!
//! All metrics carry the `mla_operator_` prefix and live in [`METRICS_REGISTRY`],
//! which is served on `/metrics` by the operator binary.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - reconcile outcomes and durations per controller
//! - **Remote Call Metrics** - Grafana, Cortex and Loki requests by outcome
//! - **Cleanup Metrics** - runs of the global cleanup pass
//!
//! # Example
//!
//! ```rust,no_run
//! use mla_operator::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("alertmanager", std::time::Duration::from_millis(120));
//! ```

use crate::constants::METRICS_SERVER_PATH;
use anyhow::Context as _;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, info};

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all MLA operator metrics
const METRICS_NAMESPACE: &str = "mla_operator";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn register_counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let counter = CounterVec::new(Opts::new(format!("{METRICS_NAMESPACE}_{name}"), help), labels)
        .expect("metric definition is valid");
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric is registered once");
    counter
}

fn register_histogram(name: &str, help: &str, labels: &[&str], buckets: Vec<f64>) -> HistogramVec {
    let opts = HistogramOpts::new(format!("{METRICS_NAMESPACE}_{name}"), help).buckets(buckets);
    let histogram = HistogramVec::new(opts, labels).expect("metric definition is valid");
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("metric is registered once");
    histogram
}

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by controller and status
///
/// Labels:
/// - `controller`: controller name (e.g., `grafana-datasource`)
/// - `status`: Outcome (`success`, `error`, `requeue`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "reconciliations_total",
        "Total number of reconciliations by controller and status",
        &["controller", "status"],
    )
});

/// Duration of reconciliations in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram(
        "reconciliation_duration_seconds",
        "Duration of reconciliations in seconds by controller",
        &["controller"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0],
    )
});

/// Total number of requeues by controller and reason
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "requeues_total",
        "Total number of requeue operations by controller and reason",
        &["controller", "reason"],
    )
});

// ============================================================================
// Remote Call Metrics
// ============================================================================

/// Requests issued to Grafana, Cortex and Loki
///
/// Labels:
/// - `backend`: `grafana`, `cortex-alertmanager`, `cortex-ruler`, `loki-ruler`
/// - `method`: HTTP method
/// - `outcome`: `success`, `not_found`, `conflict`, `error`
pub static REMOTE_REQUESTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "remote_requests_total",
        "Requests sent to Grafana, Cortex and Loki by backend, method and outcome",
        &["backend", "method", "outcome"],
    )
});

/// Latency of remote requests
pub static REMOTE_REQUEST_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram(
        "remote_request_duration_seconds",
        "Latency of requests sent to Grafana, Cortex and Loki",
        &["backend"],
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0],
    )
});

// ============================================================================
// Cleanup Metrics
// ============================================================================

/// Runs of the global cleanup pass by outcome
pub static CLEANUP_RUNS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "cleanup_runs_total",
        "Runs of the MLA cleanup pass by outcome",
        &["status"],
    )
});

// ============================================================================
// Recording helpers
// ============================================================================

/// Record a successful reconciliation
pub fn record_reconciliation_success(controller: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[controller, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[controller])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
pub fn record_reconciliation_error(controller: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[controller, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[controller])
        .observe(duration.as_secs_f64());
}

/// Record a requeue
///
/// # Arguments
/// * `controller` - Controller name
/// * `reason` - `error` or `not_ready`
pub fn record_reconciliation_requeue(controller: &str, reason: &str) {
    RECONCILIATION_TOTAL
        .with_label_values(&[controller, "requeue"])
        .inc();
    REQUEUE_TOTAL.with_label_values(&[controller, reason]).inc();
}

/// Record the outcome of a request to an external API
pub fn record_remote_request(backend: &str, method: &str, outcome: &str, duration: Duration) {
    REMOTE_REQUESTS_TOTAL
        .with_label_values(&[backend, method, outcome])
        .inc();
    REMOTE_REQUEST_DURATION_SECONDS
        .with_label_values(&[backend])
        .observe(duration.as_secs_f64());
}

/// Record a run of the cleanup pass
pub fn record_cleanup_run(success: bool) {
    let status = if success { "success" } else { "error" };
    CLEANUP_RUNS_TOTAL.with_label_values(&[status]).inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

// ============================================================================
// HTTP endpoint
// ============================================================================

async fn metrics_handler() -> (StatusCode, String) {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Router serving the registry on `/metrics`.
pub fn metrics_router() -> Router {
    Router::new().route(METRICS_SERVER_PATH, get(metrics_handler))
}

/// Serve metrics on `bind_address` until the process exits.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve_metrics(bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("failed to bind metrics server to {bind_address}"))?;
    info!("Serving metrics on {}{}", bind_address, METRICS_SERVER_PATH);
    axum::serve(listener, metrics_router())
        .await
        .context("metrics server failed")
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
