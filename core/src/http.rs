//! HTTP request and response types.
//!
//! # Design
//! `HttpRequest` describes the wire request as plain data. `Client` builds it
//! from a `RequestSpec` before any socket is opened, so everything that goes
//! on the wire can be inspected and tested without I/O. `ResponseMetadata`
//! is the frozen status + headers of the response.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP/1.1 request described as plain data.
///
/// Built by `Client::build_request`. `headers` holds the final header list in
/// wire order, including `Host`, `Content-Length` and `Connection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Case-insensitive lookup of a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize the request line and header section.
    pub fn encode_head(&self) -> Vec<u8> {
        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(self.method.as_str().as_bytes());
        head.push(b' ');
        head.extend_from_slice(self.path.as_bytes());
        head.extend_from_slice(b" HTTP/1.1\r\n");
        for (name, value) in &self.headers {
            head.extend_from_slice(name.as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        head
    }
}

/// Status and headers of a received response.
///
/// Header names are stored lower-cased. A header repeated in the response is
/// joined into one value with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
}

impl ResponseMetadata {
    pub fn new(status_code: u16, raw_headers: Vec<(String, String)>) -> Self {
        let mut headers: HashMap<String, String> = HashMap::with_capacity(raw_headers.len());
        for (name, value) in raw_headers {
            headers
                .entry(name.to_ascii_lowercase())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        Self {
            status_code,
            headers,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Validate a header name: it must be a non-empty token (RFC 9110 5.1).
pub(crate) fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_request("empty header name"));
    }
    if !name.bytes().all(is_tchar) {
        return Err(Error::invalid_request(format!(
            "invalid character in header name {name:?}"
        )));
    }
    Ok(())
}

/// Reject NUL, CR and LF in header values.
pub(crate) fn validate_header_value(name: &str, value: &str) -> Result<()> {
    if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::invalid_request(format!(
            "invalid character in value of header {name:?}"
        )));
    }
    Ok(())
}

fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_head_writes_request_line_and_headers() {
        let req = HttpRequest {
            method: HttpMethod::Put,
            host: "localhost".to_string(),
            port: 8080,
            path: "/hello".to_string(),
            headers: vec![
                ("Host".to_string(), "localhost:8080".to_string()),
                ("Content-Length".to_string(), "0".to_string()),
            ],
            body: Vec::new(),
        };
        assert_eq!(
            req.encode_head(),
            b"PUT /hello HTTP/1.1\r\nHost: localhost:8080\r\nContent-Length: 0\r\n\r\n".to_vec()
        );
        assert_eq!(req.header("content-length"), Some("0"));
    }

    #[test]
    fn metadata_lowercases_and_joins_repeated_headers() {
        let meta = ResponseMetadata::new(
            200,
            vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Set-Cookie".to_string(), "a=1".to_string()),
                ("set-cookie".to_string(), "b=2".to_string()),
            ],
        );
        assert_eq!(meta.content_type(), Some("application/json"));
        assert_eq!(meta.header("SET-COOKIE"), Some("a=1, b=2"));
        assert_eq!(meta.header("x-missing"), None);
    }

    #[test]
    fn header_validation_rejects_injection() {
        assert!(validate_header_name("X-Trace-Id").is_ok());
        assert!(validate_header_name("").is_err());
        assert!(validate_header_name("Bad Name").is_err());
        assert!(validate_header_value("x", "ok value").is_ok());
        assert!(validate_header_value("x", "evil\r\nInjected: yes").is_err());
    }

    #[test]
    fn method_serializes_uppercase() {
        let method: HttpMethod = serde_json::from_str(r#""PUT""#).unwrap();
        assert_eq!(method, HttpMethod::Put);
        assert_eq!(serde_json::to_string(&HttpMethod::Delete).unwrap(), r#""DELETE""#);
        assert_eq!(HttpMethod::default(), HttpMethod::Get);
    }
}
