//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status
//! - Workflow progress and outcomes
//! - Completion recording degradation
//! - Price quote sources

use crate::error::FlowResult;
use crate::quote::QuoteSource;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "stableflow_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    // Workflow metrics
    pub static ref WORKFLOW_STATUS: CounterVec = register_counter_vec!(
        "stableflow_workflow_transitions_total",
        "Total workflow status transitions by status",
        &["chain_id", "status"]
    ).unwrap();

    pub static ref WORKFLOW_COMPLETED: CounterVec = register_counter_vec!(
        "stableflow_workflows_completed_total",
        "Total workflows reaching completion",
        &["chain_id"]
    ).unwrap();

    pub static ref WORKFLOW_FAILED: CounterVec = register_counter_vec!(
        "stableflow_workflows_failed_total",
        "Total workflows entering the error state",
        &["chain_id"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "stableflow_transactions_submitted_total",
        "Total transactions submitted",
        &["chain_id"]
    ).unwrap();

    // Completion recording metrics
    pub static ref COMPLETION_DEGRADED: CounterVec = register_counter_vec!(
        "stableflow_completions_degraded_total",
        "Completions where the action was not found upstream",
        &[]
    ).unwrap();

    pub static ref COMPLETION_LOCAL: CounterVec = register_counter_vec!(
        "stableflow_completions_local_only_total",
        "Completions recorded only in the shadow store",
        &[]
    ).unwrap();

    // Quote metrics
    pub static ref QUOTES_SERVED: CounterVec = register_counter_vec!(
        "stableflow_quotes_served_total",
        "Price quotes served by source",
        &["source"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "stableflow_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "stableflow_health_check_failure_total",
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

    pub async fn run(&self) -> FlowResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
        axum::serve(listener, app).await.unwrap();

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_workflow_status(chain_id: u64, status: &str) {
    WORKFLOW_STATUS
        .with_label_values(&[&chain_id.to_string(), status])
        .inc();
}

pub fn record_workflow_completed(chain_id: u64) {
    WORKFLOW_COMPLETED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_workflow_failed(chain_id: u64) {
    WORKFLOW_FAILED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_completion_degraded() {
    COMPLETION_DEGRADED.with_label_values(&[]).inc();
}

pub fn record_completion_local() {
    COMPLETION_LOCAL.with_label_values(&[]).inc();
}

pub fn record_quote(source: QuoteSource) {
    let label = match source {
        QuoteSource::CoinGecko => "coingecko",
        QuoteSource::Moralis => "moralis",
        QuoteSource::Fallback => "fallback",
    };
    QUOTES_SERVED.with_label_values(&[label]).inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
