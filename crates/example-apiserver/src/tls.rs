//! Serving certificates.
//!
//! When no certificate is configured the server generates a self-signed CA
//! and a serving certificate signed by it, and keeps both in the cert
//! directory so restarts present the same identity.

use crate::ServerError;
use rcgen::{BasicConstraints, CertificateParams, ExtendedKeyUsagePurpose, IsCa, KeyPair};
use std::path::{Path, PathBuf};
use tracing::info;

const CA_FILE: &str = "ca.pem";
const CERT_FILE: &str = "apiserver.crt";
const KEY_FILE: &str = "apiserver.key";

/// How the secure port gets its certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain HTTP
    Disabled,
    /// Self-signed CA and serving certificate, persisted under `cert_dir`
    SelfSigned {
        cert_dir: PathBuf,
        alternate_names: Vec<String>,
    },
    /// PEM certificate chain and private key supplied by the operator
    Provided {
        cert_file: PathBuf,
        key_file: PathBuf,
    },
}

impl TlsMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, TlsMode::Disabled)
    }
}

/// PEM-encoded serving material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    /// Set only for self-signed material
    pub ca_pem: Option<Vec<u8>>,
}

pub fn resolve_tls(mode: &TlsMode) -> Result<Option<TlsMaterial>, ServerError> {
    match mode {
        TlsMode::Disabled => Ok(None),
        TlsMode::SelfSigned {
            cert_dir,
            alternate_names,
        } => {
            let ca_path = cert_dir.join(CA_FILE);
            let cert_path = cert_dir.join(CERT_FILE);
            let key_path = cert_dir.join(KEY_FILE);

            if ca_path.exists() && cert_path.exists() && key_path.exists() {
                info!("Using existing serving certificates in {}", cert_dir.display());
                Ok(Some(TlsMaterial {
                    cert_pem: read_pem(&cert_path, "serving certificate")?,
                    key_pem: read_pem(&key_path, "serving key")?,
                    ca_pem: Some(read_pem(&ca_path, "CA certificate")?),
                }))
            } else {
                info!(
                    "Generating self-signed serving certificates in {}",
                    cert_dir.display()
                );
                generate_self_signed(cert_dir, alternate_names).map(Some)
            }
        }
        TlsMode::Provided {
            cert_file,
            key_file,
        } => Ok(Some(TlsMaterial {
            cert_pem: read_pem(cert_file, "TLS certificate")?,
            key_pem: read_pem(key_file, "TLS private key")?,
            ca_pem: None,
        })),
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>, ServerError> {
    std::fs::read(path).map_err(|e| {
        ServerError::tls(format!("failed to read {} at {}: {}", what, path.display(), e))
    })
}

fn write_pem(path: &Path, pem: &str, what: &str) -> Result<(), ServerError> {
    std::fs::write(path, pem).map_err(|e| {
        ServerError::tls(format!("failed to write {} to {}: {}", what, path.display(), e))
    })
}

fn generate_self_signed(
    cert_dir: &Path,
    alternate_names: &[String],
) -> Result<TlsMaterial, ServerError> {
    std::fs::create_dir_all(cert_dir).map_err(|e| {
        ServerError::tls(format!(
            "failed to create cert directory {}: {}",
            cert_dir.display(),
            e
        ))
    })?;

    let ca_key = KeyPair::generate()
        .map_err(|e| ServerError::tls(format!("failed to generate CA key pair: {}", e)))?;
    let mut ca_params = CertificateParams::new(vec!["example-service-ca".to_string()])
        .map_err(|e| ServerError::tls(format!("invalid CA certificate parameters: {}", e)))?;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_cert = ca_params
        .self_signed(&ca_key)
        .map_err(|e| ServerError::tls(format!("failed to self-sign CA certificate: {}", e)))?;

    let server_key = KeyPair::generate()
        .map_err(|e| ServerError::tls(format!("failed to generate serving key pair: {}", e)))?;
    let mut server_params = CertificateParams::new(alternate_names.to_vec())
        .map_err(|e| ServerError::tls(format!("invalid serving certificate parameters: {}", e)))?;
    server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .map_err(|e| ServerError::tls(format!("failed to sign serving certificate: {}", e)))?;

    let ca_pem = ca_cert.pem();
    let cert_pem = server_cert.pem();
    let key_pem = server_key.serialize_pem();

    write_pem(&cert_dir.join(CA_FILE), &ca_pem, "CA certificate")?;
    write_pem(&cert_dir.join(CERT_FILE), &cert_pem, "serving certificate")?;
    write_pem(&cert_dir.join(KEY_FILE), &key_pem, "serving key")?;

    info!(
        "Serving certificates written to {} for {:?}",
        cert_dir.display(),
        alternate_names
    );

    Ok(TlsMaterial {
        cert_pem: cert_pem.into_bytes(),
        key_pem: key_pem.into_bytes(),
        ca_pem: Some(ca_pem.into_bytes()),
    })
}
