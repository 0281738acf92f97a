//! The generic serving engine.
//!
//! [`GenericApiServer`] serves every installed API group over REST with
//! content negotiation, watch streaming and discovery, plus the health,
//! `/version` and `/metrics` endpoints. Authentication, authorization and
//! admission are not part of the engine; every request is served.

mod discovery;
mod group;
mod handlers;
mod request_info;
mod response;
mod state;
mod watch;

pub use group::ApiGroupInfo;
pub use request_info::{ApiPath, RequestInfo};
pub use response::ApiResponse;
pub use watch::Framing;

use crate::config::CompletedGenericConfig;
use crate::metrics::RequestMetrics;
use crate::tls::TlsMaterial;
use crate::ServerError;
use axum::routing::{any, get};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use group::InstalledGroup;
use state::AppState;
use std::collections::BTreeMap;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Serving engine with its installed API groups
pub struct GenericApiServer {
    config: CompletedGenericConfig,
    groups: BTreeMap<String, InstalledGroup>,
}

impl GenericApiServer {
    pub fn new(config: CompletedGenericConfig) -> Self {
        Self {
            config,
            groups: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &CompletedGenericConfig {
        &self.config
    }

    /// Serve an API group under `/apis/<group>`.
    ///
    /// Every kind the scheme declares for a configured version must have
    /// storage, and a group may only be installed once.
    pub fn install_api_group(&mut self, info: ApiGroupInfo) -> Result<(), ServerError> {
        if info.group.is_empty() {
            return Err(ServerError::invalid_config(
                "the legacy core group cannot be installed under /apis",
            ));
        }
        let path = format!("/apis/{}", info.group);
        if self.groups.contains_key(&info.group) {
            return Err(ServerError::duplicate_group(info.group, path));
        }

        let group = InstalledGroup::build(info)?;
        for version in &group.versions {
            info!(
                "Installed {} at {} ({})",
                version.group_version,
                path,
                version
                    .resources
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        self.groups.insert(group.name.clone(), group);
        Ok(())
    }

    /// Names of the installed groups
    pub fn installed_groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Build the router. `shutdown` ends in-flight watches when cancelled.
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        let state = Arc::new(AppState {
            groups: self.groups.clone(),
            codecs: self.config.codecs.clone(),
            request_metrics: RequestMetrics::new(&self.config.metrics_namespace),
            prometheus: self.config.metrics.clone(),
            version: self.config.version.clone(),
            shutdown,
        });

        Router::new()
            // Health checks
            .route("/healthz", get(handlers::healthz))
            .route("/livez", get(handlers::livez))
            .route("/readyz", get(handlers::readyz))
            .route("/version", get(handlers::version))
            .route("/metrics", get(handlers::metrics))
            // Discovery and resources
            .route("/api", get(handlers::api_versions))
            .route("/apis", any(handlers::serve_apis))
            .route("/apis/{*path}", any(handlers::serve_apis))
            .fallback(handlers::fallback)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve until `cancel` fires, then drain connections within the grace period
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ServerError> {
        let address = self.config.address();
        let grace = self.config.shutdown_grace_period;
        let app = self.router(cancel.clone());

        match self.config.tls_material.clone() {
            Some(material) => serve_tls(app, address, material, grace, cancel).await,
            None => serve_plain(app, address, grace, cancel).await,
        }
    }
}

async fn serve_tls(
    app: Router,
    address: SocketAddr,
    material: TlsMaterial,
    grace: Duration,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let tls_config = RustlsConfig::from_pem(material.cert_pem, material.key_pem)
        .await
        .map_err(|e| ServerError::tls(format!("invalid serving certificate: {}", e)))?;

    let handle = axum_server::Handle::new();
    let shutdown = {
        let handle = handle.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            info!("Shutting down, draining connections for up to {:?}", grace);
            handle.graceful_shutdown(Some(grace));
        })
    };

    info!("Serving securely on {}", address);
    let result = axum_server::bind_rustls(address, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await;
    shutdown.abort();

    result.map_err(|e| ServerError::serve(address, e))?;
    info!("API server stopped");
    Ok(())
}

async fn serve_plain(
    app: Router,
    address: SocketAddr,
    grace: Duration,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| ServerError::serve(address, e))?;
    let local = listener
        .local_addr()
        .map_err(|e| ServerError::serve(address, e))?;
    warn!("Serving insecurely on {}", local);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .into_future();
    let grace_elapsed = async {
        cancel.cancelled().await;
        info!("Shutting down, draining connections for up to {:?}", grace);
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result.map_err(|e| ServerError::serve(local, e))?,
        _ = grace_elapsed => warn!("Grace period elapsed with connections still open"),
    }
    info!("API server stopped");
    Ok(())
}
