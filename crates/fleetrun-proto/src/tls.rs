//! Trust configuration shared by the dispatcher and the agent.
//!
//! Both sides authenticate each other: the agent only accepts clients whose
//! certificate chains to the configured CA, and the dispatcher only accepts
//! agents presenting a certificate from the same CA. Insecure mode disables
//! peer verification entirely and exists for development only; it is never
//! selected implicitly.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::server::{VerifierBuilderError, WebPkiClientVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use thiserror::Error;
use tracing::{debug, warn};

const ALPN_H2: &[u8] = b"h2";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no PEM certificates found in {0}")]
    NoCertificates(PathBuf),
    #[error("no PEM private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("invalid CA certificate in {path}: {source}")]
    InvalidCertificate {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },
    #[error("missing TLS material: {0} path is required unless insecure mode is requested")]
    MissingMaterial(&'static str),
    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("client certificate verifier error: {0}")]
    Verifier(#[from] VerifierBuilderError),
    #[error("failed to generate ephemeral certificate: {0}")]
    SelfSigned(#[from] rcgen::Error),
}

pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Locations of the PEM material for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// How a process establishes trust with its peers.
///
/// Deliberately has no `Default`: callers must either supply certificate
/// paths or explicitly ask for [`TrustMode::Insecure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustMode {
    Mutual(CertificatePaths),
    Insecure,
}

impl TrustMode {
    pub fn resolve(
        insecure: bool,
        ca: Option<PathBuf>,
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
    ) -> TlsResult<Self> {
        if insecure {
            return Ok(TrustMode::Insecure);
        }

        Ok(TrustMode::Mutual(CertificatePaths {
            ca: ca.ok_or(TlsError::MissingMaterial("CA certificate"))?,
            cert: cert.ok_or(TlsError::MissingMaterial("certificate"))?,
            key: key.ok_or(TlsError::MissingMaterial("private key"))?,
        }))
    }

    pub fn is_insecure(&self) -> bool {
        matches!(self, TrustMode::Insecure)
    }

    pub fn server_config(&self) -> TlsResult<Arc<ServerConfig>> {
        match self {
            TrustMode::Mutual(paths) => server_tls(paths),
            TrustMode::Insecure => insecure_server_tls(),
        }
    }

    pub fn client_config(&self) -> TlsResult<Arc<ClientConfig>> {
        match self {
            TrustMode::Mutual(paths) => client_tls(paths),
            TrustMode::Insecure => insecure_client_tls(),
        }
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

/// Agent-side config: presents `cert`/`key` and requires a client
/// certificate signed by `ca`.
pub fn server_tls(paths: &CertificatePaths) -> TlsResult<Arc<ServerConfig>> {
    let provider = crypto_provider();
    let roots = load_roots(&paths.ca)?;
    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone()).build()?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs(&paths.cert)?, load_key(&paths.key)?)?;
    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    debug!(ca = %paths.ca.display(), cert = %paths.cert.display(), "Loaded server TLS configuration");
    Ok(Arc::new(config))
}

/// Dispatcher-side config: trusts only `ca` and authenticates with `cert`/`key`.
pub fn client_tls(paths: &CertificatePaths) -> TlsResult<Arc<ClientConfig>> {
    let roots = load_roots(&paths.ca)?;

    let mut config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_auth_cert(load_certs(&paths.cert)?, load_key(&paths.key)?)?;
    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    debug!(ca = %paths.ca.display(), cert = %paths.cert.display(), "Loaded client TLS configuration");
    Ok(Arc::new(config))
}

/// Agent-side config that accepts any client and presents an ephemeral
/// self-signed certificate.
pub fn insecure_server_tls() -> TlsResult<Arc<ServerConfig>> {
    warn!("Using insecure TLS configuration, this should be avoided in production environments");

    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certified.key_pair.serialize_der(),
    ));

    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)?;
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(Arc::new(config))
}

/// Dispatcher-side config that accepts any server certificate and presents none.
pub fn insecure_client_tls() -> TlsResult<Arc<ClientConfig>> {
    warn!("Using insecure TLS configuration, this should be avoided in production environments");

    let provider = crypto_provider();
    let verifier = Arc::new(NoServerVerification {
        algorithms: provider.signature_verification_algorithms,
    });

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(Arc::new(config))
}

fn open(path: &Path) -> TlsResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

fn load_roots(path: &Path) -> TlsResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|source| TlsError::InvalidCertificate {
                path: path.to_path_buf(),
                source,
            })?;
    }
    Ok(roots)
}

/// Accepts every server certificate; handshake signatures are still checked.
#[derive(Debug)]
struct NoServerVerification {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
pub(crate) mod test_pki {
    use super::CertificatePaths;
    use rcgen::{
        BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
        KeyUsagePurpose,
    };
    use tempfile::TempDir;

    /// A throwaway CA with one leaf usable as both server and client identity.
    pub(crate) struct TestPki {
        pub dir: TempDir,
        pub paths: CertificatePaths,
    }

    pub(crate) fn generate() -> TestPki {
        let dir = tempfile::tempdir().unwrap();

        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "fleetrun test ca");
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
                .unwrap();
        leaf_params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        let paths = CertificatePaths {
            ca: dir.path().join("ca.crt"),
            cert: dir.path().join("portal.crt"),
            key: dir.path().join("portal.key"),
        };
        std::fs::write(&paths.ca, ca_cert.pem()).unwrap();
        std::fs::write(&paths.cert, leaf.pem()).unwrap();
        std::fs::write(&paths.key, leaf_key.serialize_pem()).unwrap();

        TestPki { dir, paths }
    }
}
