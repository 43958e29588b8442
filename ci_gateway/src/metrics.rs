//! Prometheus metrics for webhook ingestion and build admission.

use metrics::counter;

use crate::models::{BuildStatus, HookStatus};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("ci_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a build state transition.
pub fn build_status_changed(status: BuildStatus) {
    counter!("ci_builds_total", "status" => status.as_str()).increment(1);
}

/// Record the terminal status a hook was persisted with.
pub fn hook_finalized(status: HookStatus) {
    counter!("ci_hooks_total", "status" => status.as_str()).increment(1);
}

/// Record an admitted build; `outcome` is `enqueued` or `gated`.
pub fn build_admitted(outcome: &'static str) {
    counter!("ci_builds_admitted_total", "outcome" => outcome).increment(1);
}

pub fn build_rejected(reason: &'static str) {
    counter!("ci_builds_rejected_total", "reason" => reason).increment(1);
}

pub fn auto_cancel(result: &'static str) {
    counter!("ci_auto_cancel_total", "result" => result).increment(1);
}

pub fn queue_publish(result: &'static str) {
    counter!("ci_queue_publish_total", "result" => result).increment(1);
}
