//! Prometheus metrics for the processor and its workers.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Later calls are no-ops.
///
/// Returns `false` when another recorder was already installed by someone else.
pub fn init_metrics() -> bool {
    let installed = PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, BuildError>(handle)
    });

    match installed {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus text format; empty before [`init_metrics`].
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Metric helpers labelled with the source stream.
#[derive(Debug, Clone)]
pub struct ProcessorMetrics {
    source: String,
}

impl ProcessorMetrics {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn message_received(&self) {
        counter!("qms_messages_received_total", "source" => self.source.clone()).increment(1);
    }

    /// `event_type` is `"none"` when the routing key was missing.
    pub fn message_settled(&self, action: &'static str, event_type: &str, elapsed: Duration) {
        counter!(
            "qms_messages_settled_total",
            "source" => self.source.clone(),
            "action" => action,
            "event_type" => event_type.to_string()
        )
        .increment(1);

        histogram!(
            "qms_message_processing_seconds",
            "source" => self.source.clone(),
            "action" => action
        )
        .record(elapsed.as_secs_f64());
    }

    pub fn failure(&self, kind: &str) {
        counter!(
            "qms_message_failures_total",
            "source" => self.source.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn settle_failed(&self, action: &'static str) {
        counter!(
            "qms_settle_errors_total",
            "source" => self.source.clone(),
            "action" => action
        )
        .increment(1);
    }

    pub fn messages_reclaimed(&self, count: usize) {
        counter!("qms_messages_reclaimed_total", "source" => self.source.clone())
            .increment(count as u64);
    }

    pub fn in_flight(&self, count: usize) {
        gauge!("qms_messages_in_flight", "source" => self.source.clone()).set(count as f64);
    }

    pub fn dead_letter_drained(&self, reason: &str) {
        counter!(
            "qms_dead_letters_drained_total",
            "source" => self.source.clone(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }
}
