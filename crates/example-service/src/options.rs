//! Options of the `serve` command and their conversion into a server config

use clap::{Args, ValueEnum};
use example_apis::v1alpha1::{self, ExampleResource};
use example_apiserver::config::{
    default_alternate_names, DEFAULT_CERT_DIR, DEFAULT_SECURE_PORT,
};
use example_apiserver::metrics::{PrometheusHandle, DEFAULT_NAMESPACE};
use example_apiserver::{
    Config, ExtraConfig, GenericConfig, ServerError, ServingConfig, StorageOptions, TlsMode,
};
use example_core::Scheme;
use example_storage::{MemoryStorage, StorageRegistry};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Args)]
pub struct ServeOptions {
    /// Address to listen on
    #[arg(long, env = "EXAMPLE_SERVICE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// Port to serve HTTPS on
    #[arg(long, default_value_t = DEFAULT_SECURE_PORT)]
    pub secure_port: u16,

    /// Directory for self-signed certificates. Ignored when --tls-cert-file is set.
    #[arg(long, default_value = DEFAULT_CERT_DIR)]
    pub cert_dir: PathBuf,

    /// PEM certificate chain for serving
    #[arg(long)]
    pub tls_cert_file: Option<PathBuf>,

    /// PEM private key matching --tls-cert-file
    #[arg(long)]
    pub tls_private_key_file: Option<PathBuf>,

    /// Serve plain HTTP
    #[arg(long)]
    pub disable_tls: bool,

    /// Seconds to drain open connections on shutdown
    #[arg(long, default_value_t = 30)]
    pub shutdown_grace_period: u64,

    /// Events buffered per watcher before it is closed
    #[arg(long, default_value_t = 100)]
    pub watch_buffer: usize,

    /// Seconds between bookmark events on watches that request them
    #[arg(long, default_value_t = 60)]
    pub bookmark_interval: u64,

    /// Prefix of the exported metric names
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub metrics_namespace: String,

    /// Extra names for the self-signed serving certificate
    #[arg(long, value_delimiter = ',')]
    pub tls_alternate_names: Vec<String>,
}

impl ServeOptions {
    /// Fill in values derived from other options
    pub fn complete(mut self) -> Self {
        let mut names = default_alternate_names();
        for name in self.tls_alternate_names.drain(..) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        if !self.bind_address.is_unspecified() {
            let address = self.bind_address.to_string();
            if !names.contains(&address) {
                names.push(address);
            }
        }
        self.tls_alternate_names = names;
        self
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        match (&self.tls_cert_file, &self.tls_private_key_file) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(ServerError::invalid_config(
                    "--tls-cert-file and --tls-private-key-file must be set together",
                ))
            }
            (Some(_), Some(_)) if self.disable_tls => {
                return Err(ServerError::invalid_config(
                    "--disable-tls cannot be combined with --tls-cert-file",
                ))
            }
            _ => {}
        }
        if self.watch_buffer == 0 {
            return Err(ServerError::invalid_config("--watch-buffer must be at least 1"));
        }
        if self.bookmark_interval == 0 {
            return Err(ServerError::invalid_config("--bookmark-interval must be at least 1"));
        }
        Ok(())
    }

    fn tls_mode(&self) -> TlsMode {
        if self.disable_tls {
            return TlsMode::Disabled;
        }
        match (&self.tls_cert_file, &self.tls_private_key_file) {
            (Some(cert_file), Some(key_file)) => TlsMode::Provided {
                cert_file: cert_file.clone(),
                key_file: key_file.clone(),
            },
            _ => TlsMode::SelfSigned {
                cert_dir: self.cert_dir.clone(),
                alternate_names: self.tls_alternate_names.clone(),
            },
        }
    }

    /// Server configuration serving `ExampleResource` from memory
    pub fn config(&self, scheme: Arc<Scheme>, metrics: Option<PrometheusHandle>) -> Config {
        let generic = GenericConfig {
            serving: Some(ServingConfig {
                bind_address: Some(self.bind_address),
                secure_port: Some(self.secure_port),
                cert_dir: Some(self.cert_dir.clone()),
                tls: Some(self.tls_mode()),
            }),
            shutdown_grace_period: Some(Duration::from_secs(self.shutdown_grace_period)),
            watch_buffer: Some(self.watch_buffer),
            bookmark_interval: Some(Duration::from_secs(self.bookmark_interval)),
            metrics_namespace: Some(self.metrics_namespace.clone()),
            metrics,
            ..GenericConfig::new(scheme)
        };

        let extra = ExtraConfig::new().with_provider(
            v1alpha1::scheme_group_version(),
            Arc::new(|options: &StorageOptions| {
                let storage = MemoryStorage::for_kind::<ExampleResource>(
                    &v1alpha1::scheme_group_version(),
                )
                .with_config(options.memory());
                StorageRegistry::new().with("exampleresources", Arc::new(storage))
            }),
        );

        Config::new(generic, extra)
    }
}

/// The scheme of every API group this server serves
pub fn build_scheme() -> Result<Scheme, example_core::CoreError> {
    let mut scheme = Scheme::new();
    example_apis::install(&mut scheme)?;
    scheme.add_unversioned_meta_types()?;
    Ok(scheme)
}
