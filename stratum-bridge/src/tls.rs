//! TLS setup for the worker listener.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

/// Reasons a certificate/key pair could not be turned into an acceptor.
#[derive(Error, Debug)]
pub enum TlsError {
    #[error("cannot read certificate chain from {}: {reason}", path.display())]
    Certificate { path: PathBuf, reason: String },

    #[error("no certificates in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("cannot read private key from {}: {reason}", path.display())]
    PrivateKey { path: PathBuf, reason: String },

    #[error("certificate and key rejected: {0}")]
    Rejected(#[from] rustls::Error),
}

/// Build a TLS acceptor from a PEM certificate chain and PEM private key.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certificate_error = |e: rustls::pki_types::pem::Error| TlsError::Certificate {
        path: cert_path.to_path_buf(),
        reason: e.to_string(),
    };

    let chain = CertificateDer::pem_file_iter(cert_path)
        .map_err(certificate_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(certificate_error)?;
    if chain.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| TlsError::PrivateKey {
        path: key_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(chain, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
