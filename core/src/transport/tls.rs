//! TLS handshake with certificate pinning.
//!
//! # Design
//! The fingerprint check is installed as the rustls server certificate
//! verifier, so it runs inside the handshake the moment the peer presents its
//! certificate and before any application data can be written. A pin
//! mismatch fails the handshake on the spot. A matching pin is the trust
//! decision for that certificate: the chain is not checked against any root
//! store, but the certificate must still name the server. Unpinned requests
//! get regular WebPKI chain validation.

use std::sync::{Arc, OnceLock};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_name, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result, FINGERPRINT_MISMATCH};
use crate::fingerprint::{self, Fingerprint};

/// Trust anchors and crypto provider, built once per `Client`.
#[derive(Debug, Clone)]
pub struct TrustAnchors {
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

impl TrustAnchors {
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut roots = RootCertStore::empty();
        if config.webpki_roots {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        let (added, ignored) =
            roots.add_parsable_certificates(config.root_certificates.iter().cloned());
        if ignored > 0 {
            warn!(added, ignored, "ignored unparsable root certificates");
        }
        Self {
            roots: Arc::new(roots),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }
}

/// Certificate verifier that lets a matching pin stand in for CA validation.
///
/// One instance per handshake. `rejected` is set at most once, with the
/// fingerprint the peer actually presented.
#[derive(Debug)]
pub struct PeerGate {
    expected: Option<String>,
    rejected: OnceLock<Fingerprint>,
    inner: Arc<WebPkiServerVerifier>,
}

impl PeerGate {
    pub fn new(expected: Option<String>, trust: &TrustAnchors) -> Result<Self> {
        let inner =
            WebPkiServerVerifier::builder_with_provider(trust.roots.clone(), trust.provider.clone())
                .build()
                .map_err(|e| Error::invalid_request(format!("TLS trust configuration: {e}")))?;
        Ok(Self {
            expected,
            rejected: OnceLock::new(),
            inner,
        })
    }

    /// Fingerprint of a peer that failed the pin check, if one did.
    pub fn rejected(&self) -> Option<&Fingerprint> {
        self.rejected.get()
    }
}

impl ServerCertVerifier for PeerGate {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if let Err(actual) = fingerprint::verify(self.expected.as_deref(), end_entity.as_ref()) {
            warn!(
                expected = self.expected.as_deref().unwrap_or_default(),
                %actual,
                "peer fingerprint mismatch, aborting handshake"
            );
            let _ = self.rejected.set(actual);
            return Err(rustls::Error::General(FINGERPRINT_MISMATCH.to_string()));
        }
        if self.expected.is_none() {
            return self.inner.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            );
        }
        verify_server_name(&ParsedCertificate::try_from(end_entity)?, server_name)?;
        debug!("peer fingerprint matches pin");
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Run the client handshake over an open TCP stream.
///
/// A pin mismatch resolves to `PeerFingerprintMismatch`; every other
/// handshake failure is passed through as a transport error.
pub async fn handshake(
    tcp: TcpStream,
    host: &str,
    expected: Option<&str>,
    trust: &TrustAnchors,
) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::invalid_request(format!("invalid TLS server name {host:?}: {e}")))?;

    let gate = Arc::new(PeerGate::new(expected.map(str::to_string), trust)?);
    let config = rustls::ClientConfig::builder_with_provider(trust.provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::invalid_request(format!("TLS protocol versions: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(gate.clone())
        .with_no_client_auth();

    match TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
    {
        Ok(stream) => Ok(stream),
        Err(e) => match gate.rejected() {
            Some(actual) => Err(Error::PeerFingerprintMismatch {
                expected: expected.unwrap_or_default().to_string(),
                actual: actual.to_string(),
            }),
            None => Err(Error::Transport(e)),
        },
    }
}
