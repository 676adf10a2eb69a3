//! TLS security context for Redis connections.
//!
//! [`build_security_context`] turns a [`TlsConfig`] into a rustls client
//! configuration: TLS 1.2 floor, hardware-aware AEAD ordering, platform roots
//! augmented with an optional private CA, and a client certificate that is
//! re-read from disk before every handshake. Building performs no network
//! I/O; [`SecurityContext::connect`] runs the handshake.

mod ciphers;
mod supplier;

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use redkv_core::TlsError;
use rustls::client::Resumption;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore, SupportedCipherSuite};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

use crate::config::TlsConfig;

pub use ciphers::{aes_gcm_accelerated, cipher_suites, kx_groups};
pub use supplier::{CertificateSupplier, FileCertificateSupplier};
use supplier::LoadedCertificate;

/// Immutable TLS settings shared by every pooled connection.
#[derive(Clone)]
pub struct SecurityContext {
    config: Arc<ClientConfig>,
    supplier: Option<Arc<dyn CertificateSupplier>>,
    material: TlsConfig,
    aes_gcm_accelerated: bool,
}

impl SecurityContext {
    /// Run a client handshake over `stream`.
    ///
    /// With a client certificate configured, the key pair is loaded first and
    /// a load failure aborts the connection before any TLS record is sent.
    pub async fn connect<IO>(
        &self,
        name: ServerName<'static>,
        stream: IO,
    ) -> io::Result<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let config = match &self.supplier {
            None => Arc::clone(&self.config),
            Some(supplier) => {
                let key = supplier.supply().map_err(|error| {
                    warn!(%error, "failed to load client certificate, aborting handshake");
                    io::Error::other(error)
                })?;
                let mut config = ClientConfig::clone(&self.config);
                config.client_auth_cert_resolver = Arc::new(LoadedCertificate::new(key));
                Arc::new(config)
            }
        };
        TlsConnector::from(config).connect(name, stream).await
    }

    /// Shared client configuration. Client certificates are attached per
    /// handshake by [`connect`](Self::connect).
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    /// Paths the context was built from.
    pub fn material(&self) -> &TlsConfig {
        &self.material
    }

    pub fn has_client_certificate(&self) -> bool {
        self.supplier.is_some()
    }

    /// Offered cipher suites, most preferred first.
    pub fn cipher_suites(&self) -> &[SupportedCipherSuite] {
        &self.config.crypto_provider().cipher_suites
    }

    pub fn aes_gcm_accelerated(&self) -> bool {
        self.aes_gcm_accelerated
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("material", &self.material)
            .field("aes_gcm_accelerated", &self.aes_gcm_accelerated)
            .field("client_certificate", &self.has_client_certificate())
            .finish_non_exhaustive()
    }
}

/// Build the TLS context, or `None` when no TLS material is configured.
pub fn build_security_context(
    tls: Option<&TlsConfig>,
) -> Result<Option<SecurityContext>, TlsError> {
    build_with_acceleration(tls, aes_gcm_accelerated())
}

pub(crate) fn build_with_acceleration(
    tls: Option<&TlsConfig>,
    aes_gcm_accelerated: bool,
) -> Result<Option<SecurityContext>, TlsError> {
    let Some(tls) = tls.filter(|t| !t.is_empty()) else {
        return Ok(None);
    };

    let has_cert = !tls.cert.as_os_str().is_empty();
    let has_key = !tls.key.as_os_str().is_empty();
    if has_cert != has_key {
        return Err(TlsError::Config(
            "client certificate and key must be configured together".into(),
        ));
    }

    let provider = Arc::new(CryptoProvider {
        cipher_suites: cipher_suites(aes_gcm_accelerated),
        kx_groups: kx_groups(),
        ..rustls::crypto::ring::default_provider()
    });

    let mut roots = system_roots();
    if !tls.root_ca.as_os_str().is_empty() {
        let added = add_root_ca(&mut roots, &tls.root_ca)?;
        debug!(path = %tls.root_ca.display(), added, "loaded private root CA");
    }

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_root_certificates(roots);

    let mut config = builder.with_no_client_auth();
    let supplier = if has_cert {
        // A resumed session skips client authentication, so a rotated
        // certificate would never be presented.
        config.resumption = Resumption::disabled();
        let supplier: Arc<dyn CertificateSupplier> =
            Arc::new(FileCertificateSupplier::new(&tls.cert, &tls.key, provider));
        Some(supplier)
    } else {
        None
    };

    Ok(Some(SecurityContext {
        config: Arc::new(config),
        supplier,
        material: tls.clone(),
        aes_gcm_accelerated,
    }))
}

fn system_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!(%error, "unable to load part of the system certificate pool");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if added == 0 {
        warn!("system certificate pool is empty, continuing with an empty pool");
    } else {
        debug!(added, ignored, "loaded system certificate pool");
    }
    roots
}

fn add_root_ca(roots: &mut RootCertStore, path: &Path) -> Result<usize, TlsError> {
    if !path.exists() {
        return Err(TlsError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let invalid = |reason: String| TlsError::InvalidCertificate {
        path: path.to_path_buf(),
        reason,
    };

    let pem = std::fs::read(path).map_err(|e| invalid(e.to_string()))?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid(e.to_string()))?;
    if certs.is_empty() {
        return Err(invalid("file contains no PEM-encoded certificates".into()));
    }

    let (added, _) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(invalid("no certificate could be added to the trust store".into()));
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_ca(dir: &TempDir) -> PathBuf {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["redkv test CA".to_string()]).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        let path = dir.path().join("ca.pem");
        std::fs::write(&path, cert.pem()).unwrap();
        path
    }

    fn root_only(path: impl Into<PathBuf>) -> TlsConfig {
        TlsConfig {
            root_ca: path.into(),
            ..Default::default()
        }
    }

    #[test]
    fn no_tls_fields_means_no_context() {
        assert!(build_security_context(None).unwrap().is_none());
        assert!(
            build_security_context(Some(&TlsConfig::default()))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn missing_root_ca_names_the_path() {
        let cfg = root_only("/nonexistent/redkv/ca.pem");
        match build_security_context(Some(&cfg)) {
            Err(TlsError::FileNotFound { path }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/redkv/ca.pem"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn non_pem_root_ca_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ca.pem");
        std::fs::write(&path, "this is not a certificate").unwrap();
        assert!(matches!(
            build_security_context(Some(&root_only(&path))),
            Err(TlsError::InvalidCertificate { .. })
        ));
    }

    #[test]
    fn valid_root_ca_builds_context() {
        let dir = TempDir::new().unwrap();
        let cfg = root_only(write_ca(&dir));
        let ctx = build_security_context(Some(&cfg)).unwrap().unwrap();
        assert!(!ctx.has_client_certificate());
        assert_eq!(ctx.cipher_suites().len(), 9);
        assert_eq!(ctx.material(), &cfg);
    }

    #[test]
    fn context_follows_acceleration_flag() {
        let dir = TempDir::new().unwrap();
        let cfg = root_only(write_ca(&dir));
        for accelerated in [true, false] {
            let ctx = build_with_acceleration(Some(&cfg), accelerated)
                .unwrap()
                .unwrap();
            assert_eq!(ctx.aes_gcm_accelerated(), accelerated);
            assert_eq!(
                ctx.cipher_suites()[0].suite(),
                cipher_suites(accelerated)[0].suite()
            );
        }
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let cfg = TlsConfig {
            cert: PathBuf::from("client.crt"),
            ..Default::default()
        };
        assert!(matches!(
            build_security_context(Some(&cfg)),
            Err(TlsError::Config(_))
        ));
    }

    #[test]
    fn client_files_are_not_read_at_build_time() {
        let cfg = TlsConfig {
            cert: PathBuf::from("/nonexistent/client.crt"),
            key: PathBuf::from("/nonexistent/client.key"),
            root_ca: PathBuf::new(),
        };
        let ctx = build_security_context(Some(&cfg)).unwrap().unwrap();
        assert!(ctx.has_client_certificate());
    }

    #[tokio::test]
    async fn unloadable_certificate_aborts_before_client_hello() {
        use tokio::io::AsyncReadExt;

        let cfg = TlsConfig {
            cert: PathBuf::from("/nonexistent/client.crt"),
            key: PathBuf::from("/nonexistent/client.key"),
            root_ca: PathBuf::new(),
        };
        let ctx = build_security_context(Some(&cfg)).unwrap().unwrap();
        let (client, mut server) = tokio::io::duplex(4096);
        let name = ServerName::try_from("localhost").unwrap();

        let err = ctx.connect(name, client).await.err().unwrap();
        assert!(err.to_string().contains("client.crt"));

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert!(sent.is_empty());
    }

    #[test]
    fn building_leaves_process_provider_alone() {
        let dir = TempDir::new().unwrap();
        let cfg = root_only(write_ca(&dir));
        build_security_context(Some(&cfg)).unwrap().unwrap();
        assert!(CryptoProvider::get_default().is_none());
    }
}
