//! ExampleService API Server - aggregated Kubernetes-style API serving
//!
//! This crate provides:
//! - A generic serving engine: REST and watch over installed API groups,
//!   content negotiation, discovery, health, `/version` and `/metrics`
//! - The two-phase configuration pipeline (`Config` -> `CompletedConfig`)
//! - Server assembly binding declared kinds to their storage
//! - Self-signed or provided TLS serving certificates

pub mod apiserver;
pub mod config;
pub mod error;
pub mod generic;
pub mod metrics;
pub mod tls;

// Re-export commonly used types
pub use apiserver::{
    CompletedConfig, Config, ExampleServer, ExtraConfig, StorageOptions, StorageProvider,
};
pub use config::{CompletedGenericConfig, GenericConfig, ServingConfig};
pub use error::{ApiError, Result, ServerError};
pub use generic::{ApiGroupInfo, GenericApiServer};
pub use metrics::install_recorder;
pub use tls::TlsMode;
