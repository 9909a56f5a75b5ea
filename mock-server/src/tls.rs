//! TLS serving for the mock server plus a throwaway test PKI.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// A CA and one leaf certificate signed by it.
#[derive(Debug)]
pub struct TestPki {
    pub ca_der: CertificateDer<'static>,
    pub ca_pem: String,
    pub leaf_der: CertificateDer<'static>,
    pub leaf_key: PrivatePkcs8KeyDer<'static>,
}

impl TestPki {
    /// Generate a fresh CA and a leaf for `host`.
    ///
    /// # Panics
    ///
    /// Panics if key generation or signing fails (test-only).
    pub fn generate(host: &str) -> Self {
        let ca_key = KeyPair::generate().expect("CA key generation should succeed");
        let mut ca_params = CertificateParams::default();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "mock-server test CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .expect("CA self-signing should succeed");

        let leaf_key = KeyPair::generate().expect("leaf key generation should succeed");
        let mut leaf_params = CertificateParams::new(vec![host.to_string()])
            .expect("host should be a valid subject alt name");
        leaf_params.distinguished_name.push(DnType::CommonName, host);
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .expect("leaf signing should succeed");

        Self {
            ca_der: ca_cert.der().clone(),
            ca_pem: ca_cert.pem(),
            leaf_der: leaf_cert.der().clone(),
            leaf_key: PrivatePkcs8KeyDer::from(leaf_key.serialize_der()),
        }
    }

    /// A self-signed leaf for `host`, acting as its own CA.
    ///
    /// # Panics
    ///
    /// Panics if key generation or signing fails (test-only).
    pub fn self_signed(host: &str) -> Self {
        let key = KeyPair::generate().expect("key generation should succeed");
        let mut params = CertificateParams::new(vec![host.to_string()])
            .expect("host should be a valid subject alt name");
        params.distinguished_name.push(DnType::CommonName, host);
        let cert = params
            .self_signed(&key)
            .expect("self-signing should succeed");

        Self {
            ca_der: cert.der().clone(),
            ca_pem: cert.pem(),
            leaf_der: cert.der().clone(),
            leaf_key: PrivatePkcs8KeyDer::from(key.serialize_der()),
        }
    }

    /// Server config presenting the leaf and, when distinct, the CA as its
    /// chain.
    pub fn server_config(&self) -> Result<ServerConfig, rustls::Error> {
        let mut chain = vec![self.leaf_der.clone()];
        if self.ca_der != self.leaf_der {
            chain.push(self.ca_der.clone());
        }
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(chain, PrivateKeyDer::Pkcs8(self.leaf_key.clone_key()))
    }
}

/// A TCP listener that completes a TLS handshake before handing the
/// connection to axum. Failed handshakes are logged and skipped.
pub struct TlsListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub fn new(inner: TcpListener, config: ServerConfig) -> Self {
        Self {
            inner,
            acceptor: TlsAcceptor::from(Arc::new(config)),
        }
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, addr) = match self.inner.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            match self.acceptor.accept(stream).await {
                Ok(tls) => return (tls, addr),
                Err(e) => tracing::info!(%addr, error = %e, "TLS handshake failed"),
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
