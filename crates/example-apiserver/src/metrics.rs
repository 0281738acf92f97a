//! Request metrics exported in Prometheus text format on `/metrics`

use crate::ServerError;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::time::Duration;

pub use metrics_exporter_prometheus::PrometheusHandle;

pub const DEFAULT_NAMESPACE: &str = "example_service";

const BUCKET_COUNT: i32 = 14;

/// Latency buckets in seconds: 1ms doubling up to roughly 8s
pub fn latency_buckets() -> Vec<f64> {
    (0..BUCKET_COUNT).map(|i| 0.001 * 2f64.powi(i)).collect()
}

/// Metric names for one deployment namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetrics {
    total: String,
    duration: String,
}

impl RequestMetrics {
    pub fn new(namespace: &str) -> Self {
        Self {
            total: format!("{}_request_total", namespace),
            duration: format!("{}_request_duration_seconds", namespace),
        }
    }

    pub fn total_name(&self) -> &str {
        &self.total
    }

    pub fn duration_name(&self) -> &str {
        &self.duration
    }

    /// Count one served request and record its latency
    pub fn observe(&self, verb: &str, resource: &str, code: u16, elapsed: Duration) {
        metrics::counter!(
            self.total.clone(),
            "verb" => verb.to_string(),
            "resource" => resource.to_string(),
            "code" => code.to_string()
        )
        .increment(1);
        metrics::histogram!(
            self.duration.clone(),
            "verb" => verb.to_string(),
            "resource" => resource.to_string()
        )
        .record(elapsed.as_secs_f64());
    }
}

fn builder(namespace: &str) -> Result<PrometheusBuilder, ServerError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(RequestMetrics::new(namespace).duration),
            &latency_buckets(),
        )
        .map_err(|e| ServerError::invalid_config(format!("invalid metric buckets: {}", e)))
}

/// Install the process-wide Prometheus recorder.
///
/// Call once at startup; the returned handle renders the exposition text.
pub fn install_recorder(namespace: &str) -> Result<PrometheusHandle, ServerError> {
    builder(namespace)?
        .install_recorder()
        .map_err(|e| ServerError::invalid_config(format!("failed to install metrics recorder: {}", e)))
}
