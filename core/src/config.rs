//! Client configuration.

use std::time::Duration;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;

use crate::error::{Error, Result};

/// Environment variable holding the request deadline in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "JSONQUEST_TIMEOUT_MS";

/// Environment variable naming a PEM file of extra trust anchors.
pub const ENV_CA_FILE: &str = "JSONQUEST_CA_FILE";

/// Settings shared by every request a `Client` issues.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for the whole exchange. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Extra trust anchors for https requests.
    pub root_certificates: Vec<CertificateDer<'static>>,
    /// Trust the bundled Mozilla root set.
    pub webpki_roots: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            root_certificates: Vec::new(),
            webpki_roots: true,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `JSONQUEST_TIMEOUT_MS` and `JSONQUEST_CA_FILE`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(ms) = std::env::var(ENV_TIMEOUT_MS) {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|e| Error::invalid_request(format!("{ENV_TIMEOUT_MS}={ms:?}: {e}")))?;
            config.timeout = Some(Duration::from_millis(ms));
        }
        if let Ok(path) = std::env::var(ENV_CA_FILE) {
            let pem = std::fs::read(&path)?;
            config = config.add_root_pem(&pem)?;
        }
        Ok(config)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn webpki_roots(mut self, enabled: bool) -> Self {
        self.webpki_roots = enabled;
        self
    }

    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Add every certificate found in a PEM bundle.
    pub fn add_root_pem(mut self, pem: &[u8]) -> Result<Self> {
        let certs = CertificateDer::pem_slice_iter(pem)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::invalid_request(format!("failed to parse certificates: {e}")))?;
        if certs.is_empty() {
            return Err(Error::invalid_request("no certificates found in PEM"));
        }
        self.root_certificates.extend(certs);
        Ok(self)
    }
}
