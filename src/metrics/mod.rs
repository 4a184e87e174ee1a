//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Capability fetches and cache hits
//! - Batch submissions and rejections
//! - Status queries and resolved batches

use crate::protocol::{Atomicity, BatchState, ChainId};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Capability metrics
    pub static ref CAPABILITY_FETCHES: CounterVec = register_counter_vec!(
        "batchcall_capability_fetches_total",
        "Capability fetches sent to the wallet by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref CAPABILITY_CACHE_HITS: Counter = register_counter!(
        "batchcall_capability_cache_hits_total",
        "Capability lookups answered from cache"
    ).unwrap();

    // Submission metrics
    pub static ref BATCHES_SUBMITTED: CounterVec = register_counter_vec!(
        "batchcall_batches_submitted_total",
        "Batches accepted by the wallet",
        &["chain_id", "atomicity"]
    ).unwrap();

    pub static ref SUBMISSIONS_FAILED: CounterVec = register_counter_vec!(
        "batchcall_submissions_failed_total",
        "Batch submissions that failed, by error kind",
        &["kind"]
    ).unwrap();

    // Status metrics
    pub static ref STATUS_QUERIES: CounterVec = register_counter_vec!(
        "batchcall_status_queries_total",
        "Status queries sent to the wallet",
        &["chain_id"]
    ).unwrap();

    pub static ref STATUS_QUERY_FAILURES: CounterVec = register_counter_vec!(
        "batchcall_status_query_failures_total",
        "Status queries that failed, by error kind",
        &["kind"]
    ).unwrap();

    pub static ref BATCHES_RESOLVED: CounterVec = register_counter_vec!(
        "batchcall_batches_resolved_total",
        "Batches that reached a terminal state",
        &["chain_id", "state"]
    ).unwrap();

    pub static ref BATCH_LATENCY: HistogramVec = register_histogram_vec!(
        "batchcall_batch_latency_seconds",
        "Time from submission to terminal state",
        &["chain_id"],
        vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 900.0]
    ).unwrap();

    pub static ref TRACKED_BATCHES: Gauge = register_gauge!(
        "batchcall_tracked_batches",
        "Batch status records currently tracked"
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

    pub async fn run(&self) -> std::io::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

// Helper functions to record metrics

pub fn record_capability_fetch(outcome: &str) {
    CAPABILITY_FETCHES.with_label_values(&[outcome]).inc();
}

pub fn record_capability_cache_hit() {
    CAPABILITY_CACHE_HITS.inc();
}

pub fn record_batch_submitted(chain_id: ChainId, atomicity: Atomicity) {
    BATCHES_SUBMITTED
        .with_label_values(&[&chain_id.to_string(), atomicity.as_str()])
        .inc();
}

pub fn record_submission_failed(kind: &str) {
    SUBMISSIONS_FAILED.with_label_values(&[kind]).inc();
}

pub fn record_status_query(chain_id: ChainId) {
    STATUS_QUERIES
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_status_query_failed(kind: &str) {
    STATUS_QUERY_FAILURES.with_label_values(&[kind]).inc();
}

pub fn record_batch_resolved(chain_id: ChainId, state: BatchState, latency_secs: f64) {
    let chain = chain_id.to_string();
    BATCHES_RESOLVED
        .with_label_values(&[&chain, state.as_str()])
        .inc();
    BATCH_LATENCY
        .with_label_values(&[&chain])
        .observe(latency_secs);
}

pub fn record_tracked_batches(count: usize) {
    TRACKED_BATCHES.set(count as f64);
}
