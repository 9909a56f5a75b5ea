//! RFC 7617 Basic authentication.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Build the `Authorization` value for a `user:pass` credential.
///
/// The credential is passed through as-is; no character set checks.
pub fn basic_auth(credentials: &str) -> String {
    format!("Basic {}", BASE64.encode(credentials))
}

/// `Authorization` header value for an optional credential.
pub fn authorization(credentials: Option<&str>) -> Option<String> {
    credentials.map(basic_auth)
}
