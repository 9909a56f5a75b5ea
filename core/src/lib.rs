//! Single-shot HTTP/HTTPS request helper with certificate pinning.
//!
//! # Overview
//! A `RequestSpec` describes one request: target, method, an optional JSON
//! or form-encoded body, Basic credentials and an optional SHA-1 pin for the
//! server certificate. `Client::request` connects, runs the pin check inside
//! the TLS handshake, writes the request, reads the response and decodes the
//! body by its content type.
//!
//! # Design
//! - `Client::build_request` / `Client::parse_response` are pure; the wire
//!   request and the decoding step are testable without sockets.
//! - One request owns one connection; nothing is pooled or shared.
//! - Every request resolves exactly once: a single `Result` from the async
//!   call, or a single `FnOnce` callback from `Client::send`.

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod request;
pub mod transport;

pub use client::{Client, RequestHandle, Response, Stage};
pub use codec::{DecodedBody, EncodedPayload, MediaType, RequestEncoding};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use http::{HttpMethod, HttpRequest, ResponseMetadata};
pub use request::{Protocol, RequestSpec};
