//! Error types for the request pipeline.
//!
//! # Design
//! Every failure of a request resolves into exactly one `Error`. Transport
//! failures keep the underlying `io::Error` untouched so callers can inspect
//! the OS-level cause. `InvalidJson` keeps the response metadata because the
//! server did answer; only the decode step failed.

use std::io;
use std::time::Duration;

use crate::client::Stage;
use crate::http::ResponseMetadata;

/// Message reported when a pinned certificate does not match the peer.
pub const FINGERPRINT_MISMATCH: &str = "Peer fingerprint doesn't match!";

/// Result type alias using the crate's `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors a request can resolve with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// DNS, connect, reset or TLS handshake failure from the network layer.
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// The peer certificate did not match the expected fingerprint. The
    /// handshake was aborted before any request byte was written.
    #[error("Peer fingerprint doesn't match!")]
    PeerFingerprintMismatch { expected: String, actual: String },

    /// The response declared `application/json` but the body is not JSON.
    #[error("invalid JSON in response body: {source}")]
    InvalidJson {
        metadata: ResponseMetadata,
        #[source]
        source: serde_json::Error,
    },

    /// The request body could not be encoded.
    #[error("failed to encode request body: {0}")]
    Encode(String),

    /// The request could not be built (bad host, header injection, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server sent something that is not a valid HTTP/1.1 response.
    #[error("malformed HTTP response: {0}")]
    Protocol(String),

    /// The configured deadline expired.
    #[error("request timed out after {elapsed:?} while {stage}")]
    Timeout { stage: Stage, elapsed: Duration },

    /// The caller aborted the request through its handle.
    #[error("request aborted")]
    Aborted,
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Metadata of the response that was received before the failure, if any.
    pub fn response_metadata(&self) -> Option<&ResponseMetadata> {
        match self {
            Self::InvalidJson { metadata, .. } => Some(metadata),
            _ => None,
        }
    }
}
