use super::group::InstalledGroup;
use crate::metrics::RequestMetrics;
use example_core::{CodecFactory, VersionInfo};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Shared state of the serving router
pub(crate) struct AppState {
    pub(crate) groups: BTreeMap<String, InstalledGroup>,
    /// Codecs for group-independent documents
    pub(crate) codecs: CodecFactory,
    pub(crate) request_metrics: RequestMetrics,
    pub(crate) prometheus: Option<PrometheusHandle>,
    pub(crate) version: VersionInfo,
    /// Cancelled when the server shuts down; request contexts derive from it
    pub(crate) shutdown: CancellationToken,
}
