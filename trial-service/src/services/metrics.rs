//! Metrics collection and Prometheus export for trial-service.

use crate::models::ResourceKind;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls are no-ops.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder already installed");
        }
    }
}

/// Get the current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

/// Ledger verdict counter (no session labels).
pub fn record_decision(kind: ResourceKind, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    counter!(
        "trial_decisions_total",
        "resource" => kind.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Requests refused because the session is under an abuse block.
pub fn record_abuse_block(kind: ResourceKind) {
    counter!("trial_abuse_blocks_total", "resource" => kind.as_str()).increment(1);
}

/// Gate fail-closed counter for alerting.
pub fn record_gate_failure(operation: &'static str) {
    counter!("trial_gate_failures_total", "operation" => operation).increment(1);
}

pub fn record_publish_failure() {
    counter!("trial_publish_failures_total").increment(1);
}

/// Times a store operation and records it on drop.
pub struct QueryTimer {
    operation: &'static str,
    started: Instant,
}

impl QueryTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            started: Instant::now(),
        }
    }
}

impl Drop for QueryTimer {
    fn drop(&mut self) {
        histogram!(
            "trial_db_query_duration_seconds",
            "operation" => self.operation
        )
        .record(self.started.elapsed().as_secs_f64());
    }
}
