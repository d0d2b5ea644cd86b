//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - State transitions of transactions and swaps
//! - Custody and ledger call outcomes
//! - Processing pass latency
//! - Records per state

use crate::error::{RelayerError, RelayerResult};
use crate::state::StoreStats;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Lifecycle metrics
    pub static ref TRANSITIONS: CounterVec = register_counter_vec!(
        "avax_relayer_transitions_total",
        "Total state transitions applied",
        &["entity", "to"]
    ).unwrap();

    pub static ref FAILURES: CounterVec = register_counter_vec!(
        "avax_relayer_failures_total",
        "Total records moved to a failed state",
        &["entity"]
    ).unwrap();

    pub static ref RECORDS_IN_STATE: GaugeVec = register_gauge_vec!(
        "avax_relayer_records",
        "Persisted records per state",
        &["entity", "state"]
    ).unwrap();

    // Remote collaborator metrics
    pub static ref REMOTE_CALLS: CounterVec = register_counter_vec!(
        "avax_relayer_remote_calls_total",
        "Custody and ledger calls by outcome",
        &["service", "outcome"]
    ).unwrap();

    pub static ref PASS_LATENCY: HistogramVec = register_histogram_vec!(
        "avax_relayer_pass_latency_seconds",
        "Duration of one processing pass",
        &["entity"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "avax_relayer_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "avax_relayer_health_check_failure_total",
        "Total failed health checks",
        &[]
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
            .map_err(|e| RelayerError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

// Helper functions to record metrics

pub fn record_transition(entity: &str, to: &str) {
    TRANSITIONS.with_label_values(&[entity, to]).inc();
}

pub fn record_failure(entity: &str) {
    FAILURES.with_label_values(&[entity]).inc();
}

pub fn record_remote_call(service: &str, ok: bool) {
    REMOTE_CALLS
        .with_label_values(&[service, if ok { "ok" } else { "error" }])
        .inc();
}

pub fn record_pass_latency(entity: &str, latency_secs: f64) {
    PASS_LATENCY
        .with_label_values(&[entity])
        .observe(latency_secs);
}

pub fn record_state_counts(stats: &StoreStats) {
    for (state, count) in &stats.transactions {
        RECORDS_IN_STATE
            .with_label_values(&["atomic_tx", state])
            .set(*count as f64);
    }
    for (state, count) in &stats.swaps {
        RECORDS_IN_STATE
            .with_label_values(&["swap", state])
            .set(*count as f64);
    }
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_render() {
        let before = TRANSITIONS.with_label_values(&["swap", "complete"]).get();
        record_transition("swap", "complete");
        assert_eq!(
            TRANSITIONS.with_label_values(&["swap", "complete"]).get(),
            before + 1.0
        );

        let mut stats = StoreStats::default();
        stats.transactions.insert("new".to_string(), 3);
        record_state_counts(&stats);
        assert_eq!(
            RECORDS_IN_STATE.with_label_values(&["atomic_tx", "new"]).get(),
            3.0
        );

        let text = render().unwrap();
        assert!(text.contains("avax_relayer_transitions_total"));
    }
}
