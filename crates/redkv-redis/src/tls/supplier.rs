//! Client certificates supplied at handshake time.
//!
//! [`SecurityContext::connect`](super::SecurityContext::connect) asks its
//! [`CertificateSupplier`] for a key pair before every handshake, so
//! certificates rotated on disk are picked up by the next connection without
//! rebuilding the TLS context. A supplier failure aborts that connection.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redkv_core::TlsError;
use rustls::SignatureScheme;
use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use rustls_pki_types::pem::{self, PemObject};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

/// Source of the client certificate presented during a handshake.
pub trait CertificateSupplier: fmt::Debug + Send + Sync {
    fn supply(&self) -> Result<Arc<CertifiedKey>, TlsError>;
}

/// Reads a PEM certificate chain and private key from disk on every call.
pub struct FileCertificateSupplier {
    cert: PathBuf,
    key: PathBuf,
    provider: Arc<CryptoProvider>,
}

impl FileCertificateSupplier {
    pub fn new(
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
            provider,
        }
    }

    fn load_chain(&self) -> Result<Vec<CertificateDer<'static>>, TlsError> {
        let chain = CertificateDer::pem_file_iter(&self.cert)
            .map_err(|e| pem_error(&self.cert, e, invalid_certificate))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| pem_error(&self.cert, e, invalid_certificate))?;
        if chain.is_empty() {
            return Err(invalid_certificate(&self.cert, "no PEM certificates found".into()));
        }
        Ok(chain)
    }

    fn load_key(&self) -> Result<PrivateKeyDer<'static>, TlsError> {
        PrivateKeyDer::from_pem_file(&self.key).map_err(|e| pem_error(&self.key, e, invalid_key))
    }
}

impl fmt::Debug for FileCertificateSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCertificateSupplier")
            .field("cert", &self.cert)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl CertificateSupplier for FileCertificateSupplier {
    fn supply(&self) -> Result<Arc<CertifiedKey>, TlsError> {
        let chain = self.load_chain()?;
        let key = self.load_key()?;
        let signing_key = self
            .provider
            .key_provider
            .load_private_key(key)
            .map_err(|e| invalid_key(&self.key, e.to_string()))?;
        Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
    }
}

fn invalid_certificate(path: &Path, reason: String) -> TlsError {
    TlsError::InvalidCertificate {
        path: path.to_path_buf(),
        reason,
    }
}

fn invalid_key(path: &Path, reason: String) -> TlsError {
    TlsError::InvalidKey {
        path: path.to_path_buf(),
        reason,
    }
}

fn pem_error(path: &Path, err: pem::Error, kind: fn(&Path, String) -> TlsError) -> TlsError {
    match err {
        pem::Error::Io(e) if e.kind() == io::ErrorKind::NotFound => TlsError::FileNotFound {
            path: path.to_path_buf(),
        },
        other => kind(path, other.to_string()),
    }
}

/// Presents the key pair loaded for one handshake.
#[derive(Debug)]
pub(crate) struct LoadedCertificate(Arc<CertifiedKey>);

impl LoadedCertificate {
    pub(crate) fn new(key: Arc<CertifiedKey>) -> Self {
        Self(key)
    }
}

impl ResolvesClientCert for LoadedCertificate {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }

    fn has_certs(&self) -> bool {
        true
    }
}
