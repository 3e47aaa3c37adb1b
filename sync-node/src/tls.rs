//! TLS identity and handshake setup.
//!
//! Every device owns one self-signed certificate. Identity is the SHA-256
//! of that certificate ([`DeviceId`]), so chain validation is replaced by
//! "accept any certificate, verify the handshake signature, and let the
//! supervisor decide who it is". Both sides must present a certificate.
//!
//! ## Certificate names
//!
//! Certificates carry a name (`syncthing` unless configured otherwise) as
//! DNS subject-alternative name and common name. The supervisor checks the
//! name a configured device is expected to use; see
//! [`certificate_matches_name`].

use crate::connection::RawConnection;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_types::DeviceId;
use tokio::net::TcpStream;
use tokio_rustls::{LazyConfigAcceptor, TlsConnector};

/// Application protocol offered during the handshake.
pub const BEP_PROTOCOL: &[u8] = b"bep/1.0";

/// Certificate name used when a device has none configured.
pub const DEFAULT_CERT_NAME: &str = "syncthing";

/// TLS setup errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// rustls rejected the configuration.
    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),

    /// Certificate generation failed.
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    /// A key or certificate file could not be read or written.
    #[error("key file {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A PEM file did not contain what was expected.
    #[error("invalid PEM in {path}: {reason}")]
    Pem {
        /// The file involved.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },
}

/// This device's certificate and private key.
#[derive(Debug)]
pub struct TlsIdentity {
    certificate: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
    device_id: DeviceId,
}

impl TlsIdentity {
    /// Generate a fresh self-signed identity with the given certificate name.
    pub fn generate(name: &str) -> Result<Self, TlsError> {
        let (identity, _, _) = Self::generate_with_pem(name)?;
        Ok(identity)
    }

    /// Load the identity from PEM files, or generate one and write it there.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        if cert_path.exists() && key_path.exists() {
            return Self::load(cert_path, key_path);
        }

        let (identity, cert_pem, key_pem) = Self::generate_with_pem(DEFAULT_CERT_NAME)?;
        write_file(cert_path, cert_pem.as_bytes())?;
        write_file(key_path, key_pem.as_bytes())?;
        tracing::info!(
            "Generated new device certificate {} ({})",
            cert_path.display(),
            identity.device_id
        );
        Ok(identity)
    }

    /// Load the identity from a PEM certificate and a PEM PKCS#8 key.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let cert = read_pem(cert_path, "CERTIFICATE")?;
        let key = read_pem(key_path, "PRIVATE KEY")?;
        Ok(Self::from_der(cert, key))
    }

    /// Build an identity from DER certificate and PKCS#8 key bytes.
    pub fn from_der(certificate: Vec<u8>, pkcs8_key: Vec<u8>) -> Self {
        let device_id = DeviceId::from_certificate(&certificate);
        Self {
            certificate: CertificateDer::from(certificate),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pkcs8_key)),
            device_id,
        }
    }

    /// This device's id.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// DER-encoded certificate.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    fn generate_with_pem(name: &str) -> Result<(Self, String, String), TlsError> {
        use rcgen::{CertificateParams, DnType, DnValue, KeyPair};

        let mut params = CertificateParams::new(vec![name.to_string()])?;
        params
            .distinguished_name
            .push(DnType::CommonName, DnValue::Utf8String(name.to_string()));

        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;

        let identity = Self::from_der(cert.der().to_vec(), key_pair.serialize_der());
        Ok((identity, cert.pem(), key_pair.serialize_pem()))
    }
}

/// Client and server handshake halves for one identity.
#[derive(Clone)]
pub struct TlsSetup {
    /// Used when the client offers `bep/1.0`.
    server: Arc<ServerConfig>,
    /// Used when it offers nothing we speak, so the handshake still completes.
    server_without_alpn: Arc<ServerConfig>,
    connector: TlsConnector,
}

impl std::fmt::Debug for TlsSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSetup").finish_non_exhaustive()
    }
}

impl TlsSetup {
    /// Build both handshake configurations for `identity`.
    pub fn new(identity: &TlsIdentity) -> Result<Self, TlsError> {
        Ok(Self {
            server: server_config(identity)?,
            server_without_alpn: build_server_config(identity, false)?,
            connector: TlsConnector::from(client_config(identity)?),
        })
    }

    /// Run the server-side handshake on an accepted socket.
    ///
    /// `bep/1.0` is selected when the client offers it. A client offering
    /// other protocols still completes the handshake with no protocol
    /// negotiated; the supervisor does not require one.
    pub async fn accept(&self, stream: TcpStream) -> std::io::Result<RawConnection> {
        let local_addr = stream.local_addr().ok();
        let remote_addr = stream.peer_addr().ok();
        let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream).await?;
        let offers_bep = start
            .client_hello()
            .alpn()
            .is_some_and(|mut offered| offered.any(|p| p == BEP_PROTOCOL));
        let config = if offers_bep {
            self.server.clone()
        } else {
            self.server_without_alpn.clone()
        };
        let tls = start.into_stream(config).await?;
        Ok(RawConnection::from_tls(tls.into(), local_addr, remote_addr))
    }

    /// Run the client-side handshake on a dialed (or relayed) socket.
    pub async fn connect(&self, stream: TcpStream) -> std::io::Result<RawConnection> {
        let local_addr = stream.local_addr().ok();
        let remote_addr = stream.peer_addr().ok();
        // Only used for SNI; peers are identified by certificate digest.
        let server_name = ServerName::try_from(DEFAULT_CERT_NAME)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let tls = self.connector.connect(server_name, stream).await?;
        Ok(RawConnection::from_tls(tls.into(), local_addr, remote_addr))
    }
}

/// Server configuration requiring a client certificate.
pub fn server_config(identity: &TlsIdentity) -> Result<Arc<ServerConfig>, TlsError> {
    build_server_config(identity, true)
}

fn build_server_config(identity: &TlsIdentity, alpn: bool) -> Result<Arc<ServerConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(PeerCertVerifier::new(&provider));

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(vec![identity.certificate.clone()], identity.key.clone_key())?;
    if alpn {
        config.alpn_protocols = vec![BEP_PROTOCOL.to_vec()];
    }
    Ok(Arc::new(config))
}

/// Client configuration presenting our certificate.
pub fn client_config(identity: &TlsIdentity) -> Result<Arc<ClientConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(PeerCertVerifier::new(&provider));

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(vec![identity.certificate.clone()], identity.key.clone_key())?;
    config.alpn_protocols = vec![BEP_PROTOCOL.to_vec()];
    Ok(Arc::new(config))
}

/// Check a DER certificate against an expected name.
///
/// DNS subject-alternative names are authoritative when present; otherwise
/// the subject common name is used. Comparison ignores ASCII case.
pub fn certificate_matches_name(der: &[u8], name: &str) -> bool {
    use x509_parser::prelude::*;

    let Ok((_, cert)) = X509Certificate::from_der(der) else {
        return false;
    };

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        let dns_names: Vec<&str> = san
            .value
            .general_names
            .iter()
            .filter_map(|gn| match gn {
                GeneralName::DNSName(dns) => Some(*dns),
                _ => None,
            })
            .collect();
        if !dns_names.is_empty() {
            return dns_names.iter().any(|dns| dns.eq_ignore_ascii_case(name));
        }
    }

    // Bound so the subject borrow ends before `cert` drops.
    let matches = cert
        .subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .any(|cn| cn.eq_ignore_ascii_case(name));
    matches
}

/// Accepts any peer certificate but still verifies handshake signatures.
#[derive(Debug)]
struct PeerCertVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl PeerCertVerifier {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for PeerCertVerifier {
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
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

impl ClientCertVerifier for PeerCertVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

fn read_pem(path: &Path, label: &str) -> Result<Vec<u8>, TlsError> {
    let bytes = std::fs::read(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let (_, pem) = x509_parser::pem::parse_x509_pem(&bytes).map_err(|e| TlsError::Pem {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if pem.label != label {
        return Err(TlsError::Pem {
            path: path.to_path_buf(),
            reason: format!("expected {}, found {}", label, pem.label),
        });
    }
    Ok(pem.contents)
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), TlsError> {
    std::fs::write(path, contents).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })
}
