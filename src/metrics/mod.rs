//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Message traffic through the orchestrator
//! - Swap dispatch and execution outcomes
//! - Ledger polling by the binder
//! - Error rates

use crate::error::{SwapResult, SwapdError};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, CounterVec, Encoder, Gauge,
    IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{info, warn};

lazy_static! {
    // Orchestrator metrics
    pub static ref MESSAGES: CounterVec = register_counter_vec!(
        "swapd_messages_total",
        "Total messages reduced by the orchestrator, by kind",
        &["kind"]
    ).expect("swapd_messages_total registers once");

    pub static ref SWAPS_DISPATCHED: CounterVec = register_counter_vec!(
        "swapd_swaps_dispatched_total",
        "Total swaps dispatched to a strategy",
        &["strategy"]
    ).expect("swapd_swaps_dispatched_total registers once");

    pub static ref ORCHESTRATOR_ERRORS: IntCounter = register_int_counter!(
        "swapd_orchestrator_errors_total",
        "Total errors produced by the orchestrator"
    ).expect("swapd_orchestrator_errors_total registers once");

    pub static ref RECEIPT_UPDATES: IntCounter = register_int_counter!(
        "swapd_receipt_updates_total",
        "Total receipt updates received"
    ).expect("swapd_receipt_updates_total registers once");

    pub static ref PENDING_SWAPS: Gauge = register_gauge!(
        "swapd_pending_swaps",
        "In-flight swaps found at the last bootload"
    ).expect("swapd_pending_swaps registers once");

    // Binder metrics
    pub static ref BINDER_POLLS: CounterVec = register_counter_vec!(
        "swapd_binder_polls_total",
        "Total ledger polls by phase",
        &["phase"]
    ).expect("swapd_binder_polls_total registers once");

    pub static ref BINDER_TIMEOUTS: IntCounter = register_int_counter!(
        "swapd_binder_timeouts_total",
        "Total match verifications that hit their deadline"
    ).expect("swapd_binder_timeouts_total registers once");

    // Strategy metrics
    pub static ref EXECUTIONS: CounterVec = register_counter_vec!(
        "swapd_executions_total",
        "Total swap executions by outcome",
        &["outcome"]
    ).expect("swapd_executions_total registers once");
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> SwapResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| SwapdError::Internal(format!("Cannot bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| SwapdError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).map_err(|e| {
        warn!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_message(kind: &str) {
    MESSAGES.with_label_values(&[kind]).inc();
}

pub fn record_swap_dispatched(strategy: &str) {
    SWAPS_DISPATCHED.with_label_values(&[strategy]).inc();
}

pub fn record_orchestrator_error() {
    ORCHESTRATOR_ERRORS.inc();
}

pub fn record_receipt_update() {
    RECEIPT_UPDATES.inc();
}

pub fn set_pending_swaps(count: usize) {
    PENDING_SWAPS.set(count as f64);
}

pub fn record_binder_poll(phase: &str) {
    BINDER_POLLS.with_label_values(&[phase]).inc();
}

pub fn record_binder_timeout() {
    BINDER_TIMEOUTS.inc();
}

pub fn record_execution(outcome: &str) {
    EXECUTIONS.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_exposes_recorded_metrics() {
        record_message("tick");
        record_binder_poll("match");
        set_pending_swaps(3);
        let timeouts = BINDER_TIMEOUTS.get();
        record_binder_timeout();
        assert!(BINDER_TIMEOUTS.get() > timeouts);

        let body = metrics_handler().await.unwrap();
        assert!(body.contains("swapd_messages_total{kind=\"tick\"}"));
        assert!(body.contains("swapd_binder_polls_total{phase=\"match\"}"));
        assert!(body.contains("swapd_pending_swaps"));
        assert!(body.contains("swapd_binder_timeouts_total "));
    }
}
