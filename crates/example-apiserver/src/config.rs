//! Configuration of the generic serving engine.
//!
//! A [`GenericConfig`] may be partial. [`GenericConfig::complete`] fills in
//! defaults, validates the result and resolves serving certificates, producing
//! a [`CompletedGenericConfig`] the engine can be built from.

use crate::metrics::DEFAULT_NAMESPACE;
use crate::tls::{resolve_tls, TlsMaterial, TlsMode};
use crate::ServerError;
use example_core::{CodecFactory, Scheme, VersionInfo};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BIND_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
pub const DEFAULT_SECURE_PORT: u16 = 6443;
pub const DEFAULT_CERT_DIR: &str = "apiserver.local.config/certificates";
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_WATCH_BUFFER: usize = 100;
pub const DEFAULT_BOOKMARK_INTERVAL: Duration = Duration::from_secs(60);

/// Names the self-signed serving certificate is valid for
pub fn default_alternate_names() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

/// Listener settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServingConfig {
    pub bind_address: Option<IpAddr>,
    pub secure_port: Option<u16>,
    /// Where self-signed certificates are kept
    pub cert_dir: Option<PathBuf>,
    /// `None` means self-signed certificates in `cert_dir`
    pub tls: Option<TlsMode>,
}

/// Partial engine configuration
#[derive(Clone, Default)]
pub struct GenericConfig {
    pub scheme: Option<Arc<Scheme>>,
    pub codecs: Option<CodecFactory>,
    pub serving: Option<ServingConfig>,
    pub shutdown_grace_period: Option<Duration>,
    /// Events buffered per watcher before it is closed
    pub watch_buffer: Option<usize>,
    pub bookmark_interval: Option<Duration>,
    pub metrics_namespace: Option<String>,
    /// Renders `/metrics`; the endpoint is not served without it
    pub metrics: Option<PrometheusHandle>,
    pub version: Option<VersionInfo>,
}

impl GenericConfig {
    pub fn new(scheme: Arc<Scheme>) -> Self {
        Self {
            scheme: Some(scheme),
            serving: Some(ServingConfig::default()),
            ..Default::default()
        }
    }

    /// Apply defaults and validate
    pub fn complete(self) -> Result<CompletedGenericConfig, ServerError> {
        let scheme = self
            .scheme
            .ok_or_else(|| ServerError::invalid_config("a scheme is required"))?;
        let serving = self
            .serving
            .ok_or_else(|| ServerError::invalid_config("secure serving configuration is required"))?;

        let cert_dir = serving
            .cert_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CERT_DIR));
        let tls = serving.tls.unwrap_or_else(|| TlsMode::SelfSigned {
            cert_dir: cert_dir.clone(),
            alternate_names: default_alternate_names(),
        });

        let codecs = match self.codecs {
            Some(codecs) if Arc::ptr_eq(codecs.scheme(), &scheme) => codecs,
            Some(_) => {
                return Err(ServerError::invalid_config(
                    "codec factory was built from a different scheme",
                ))
            }
            None => CodecFactory::new(scheme.clone()),
        };

        let watch_buffer = self.watch_buffer.unwrap_or(DEFAULT_WATCH_BUFFER);
        if watch_buffer == 0 {
            return Err(ServerError::invalid_config("watch buffer must be at least 1"));
        }
        let bookmark_interval = self.bookmark_interval.unwrap_or(DEFAULT_BOOKMARK_INTERVAL);
        if bookmark_interval.is_zero() {
            return Err(ServerError::invalid_config("bookmark interval must be positive"));
        }

        let metrics_namespace = self
            .metrics_namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if !is_valid_metric_namespace(&metrics_namespace) {
            return Err(ServerError::invalid_config(format!(
                "invalid metrics namespace {:?}",
                metrics_namespace
            )));
        }

        let tls_material = resolve_tls(&tls)?;

        let completed = CompletedGenericConfig {
            scheme,
            codecs,
            bind_address: serving.bind_address.unwrap_or(DEFAULT_BIND_ADDRESS),
            secure_port: serving.secure_port.unwrap_or(DEFAULT_SECURE_PORT),
            cert_dir,
            tls,
            tls_material,
            shutdown_grace_period: self
                .shutdown_grace_period
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_PERIOD),
            watch_buffer,
            bookmark_interval,
            metrics_namespace,
            metrics: self.metrics,
            version: self.version.unwrap_or_else(VersionInfo::get),
        };
        debug!("Completed generic config for {}", completed.address());
        Ok(completed)
    }
}

fn is_valid_metric_namespace(namespace: &str) -> bool {
    let mut chars = namespace.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Engine configuration with every default applied
#[derive(Clone)]
pub struct CompletedGenericConfig {
    pub scheme: Arc<Scheme>,
    pub codecs: CodecFactory,
    pub bind_address: IpAddr,
    pub secure_port: u16,
    pub cert_dir: PathBuf,
    pub tls: TlsMode,
    pub tls_material: Option<TlsMaterial>,
    pub shutdown_grace_period: Duration,
    pub watch_buffer: usize,
    pub bookmark_interval: Duration,
    pub metrics_namespace: String,
    pub metrics: Option<PrometheusHandle>,
    pub version: VersionInfo,
}

impl CompletedGenericConfig {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.secure_port)
    }

    /// The partial form of this configuration, with every field set
    pub fn to_config(&self) -> GenericConfig {
        GenericConfig {
            scheme: Some(self.scheme.clone()),
            codecs: Some(self.codecs.clone()),
            serving: Some(ServingConfig {
                bind_address: Some(self.bind_address),
                secure_port: Some(self.secure_port),
                cert_dir: Some(self.cert_dir.clone()),
                tls: Some(self.tls.clone()),
            }),
            shutdown_grace_period: Some(self.shutdown_grace_period),
            watch_buffer: Some(self.watch_buffer),
            bookmark_interval: Some(self.bookmark_interval),
            metrics_namespace: Some(self.metrics_namespace.clone()),
            metrics: self.metrics.clone(),
            version: Some(self.version.clone()),
        }
    }
}
