//! Certificate fingerprints for peer pinning.
//!
//! A fingerprint is the SHA-1 digest of a certificate's DER encoding written
//! as uppercase hex pairs separated by colons, e.g.
//! `6B:32:68:91:B0:2D:01:10:59:DC:6F:2A:49:7C:13:7C:B6:05:68:EE`.

use std::fmt;

use sha1::{Digest, Sha1};

/// Canonical fingerprint of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a DER-encoded certificate.
    pub fn of_der(der: &[u8]) -> Self {
        let digest = Sha1::digest(der);
        let pairs: Vec<String> = digest.iter().map(|b| format!("{b:02X}")).collect();
        Self(pairs.join(":"))
    }

    /// Case-insensitive comparison against an expected value.
    pub fn matches(&self, expected: &str) -> bool {
        self.0.eq_ignore_ascii_case(expected.trim())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check a peer certificate against an optional pin.
///
/// No pin means nothing to check. On mismatch the computed fingerprint is
/// returned so it can be reported.
pub fn verify(expected: Option<&str>, der: &[u8]) -> Result<(), Fingerprint> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = Fingerprint::of_der(der);
    if actual.matches(expected) {
        Ok(())
    } else {
        Err(actual)
    }
}
