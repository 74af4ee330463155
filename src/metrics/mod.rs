//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Operation outcomes
//! - Broadcast attempts and fee bumps
//! - Nonce rollbacks
//! - Confirmation latency

use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref OPERATIONS: CounterVec = register_counter_vec!(
        "rbf_operations_total",
        "Operations finished, by kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    pub static ref ATTEMPTS_SUBMITTED: CounterVec = register_counter_vec!(
        "rbf_attempts_submitted_total",
        "Signed attempts broadcast to the node",
        &["kind"]
    ).unwrap();

    pub static ref FEE_BUMPS: CounterVec = register_counter_vec!(
        "rbf_fee_bumps_total",
        "Replace-by-fee bumps",
        &["kind"]
    ).unwrap();

    pub static ref NONCE_ROLLBACKS: CounterVec = register_counter_vec!(
        "rbf_nonce_rollbacks_total",
        "Nonce cursor rollbacks",
        &["kind"]
    ).unwrap();

    pub static ref CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "rbf_confirmation_latency_seconds",
        "Time from first broadcast to receipt",
        &["kind"],
        vec![5.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0, 600.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of the default registry
pub fn render() -> RelayerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RelayerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| RelayerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_operation(kind: &str, outcome: &str) {
    OPERATIONS.with_label_values(&[kind, outcome]).inc();
}

pub fn record_attempt_submitted(kind: &str) {
    ATTEMPTS_SUBMITTED.with_label_values(&[kind]).inc();
}

pub fn record_fee_bump(kind: &str) {
    FEE_BUMPS.with_label_values(&[kind]).inc();
}

pub fn record_nonce_rollback(kind: &str) {
    NONCE_ROLLBACKS.with_label_values(&[kind]).inc();
}

pub fn record_confirmation_latency(kind: &str, latency_secs: f64) {
    CONFIRMATION_LATENCY
        .with_label_values(&[kind])
        .observe(latency_secs);
}
