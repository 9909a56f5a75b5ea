//! Request orchestration: build, connect, pin, send, receive, decode.
//!
//! # Design
//! `Client::build_request` turns a `RequestSpec` into a plain-data
//! `HttpRequest` and `Client::parse_response` turns a received head + body
//! into a `Response`; neither touches the network. `Client::request` drives
//! the I/O between the two as a straight line of stages:
//!
//! `Connecting → [SecureHandshake] → Sending → AwaitingResponse →
//! ReceivingBody → Decoding`
//!
//! The async call returns a single `Result`, so a request resolves exactly
//! once by construction. `Client::send` is the callback form: the callback
//! is an `FnOnce` invoked from one place in the spawned task.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::auth;
use crate::codec::{self, DecodedBody};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::http::{validate_header_name, validate_header_value, HttpRequest, ResponseMetadata};
use crate::request::RequestSpec;
use crate::transport::h1::{self, ResponseReader};
use crate::transport::tls::{self, TrustAnchors};
use crate::transport::{self as net, Connection};

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connecting,
    SecureHandshake,
    Sending,
    AwaitingResponse,
    ReceivingBody,
    Decoding,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Connecting => "connecting",
            Stage::SecureHandshake => "performing the TLS handshake",
            Stage::Sending => "sending the request",
            Stage::AwaitingResponse => "awaiting the response",
            Stage::ReceivingBody => "receiving the body",
            Stage::Decoding => "decoding the body",
        })
    }
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub metadata: ResponseMetadata,
    pub body: DecodedBody,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.metadata.status_code
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.metadata.header(name)
    }

    /// Deserialize a JSON body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.body {
            DecodedBody::Json(value) => {
                T::deserialize(value).map_err(|source| Error::InvalidJson {
                    metadata: self.metadata.clone(),
                    source,
                })
            }
            DecodedBody::Empty => Err(Error::protocol("response has no body")),
            DecodedBody::Text(_) => Err(Error::protocol(format!(
                "response is not JSON (content-type {:?})",
                self.metadata.content_type().unwrap_or_default()
            ))),
        }
    }
}

/// Issues single requests. Cheap to clone; clones share configuration and
/// trust anchors but never a connection.
#[derive(Debug, Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    trust: TrustAnchors,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let trust = TrustAnchors::from_config(&config);
        Self {
            config: Arc::new(config),
            trust,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build the wire request: encoded body, `Host`, content headers,
    /// `Authorization`, caller extras, `Connection: close`.
    ///
    /// Extras replace computed headers of the same name, except `Host` and
    /// `Content-Length`, which always describe the actual request.
    pub fn build_request(&self, spec: &RequestSpec) -> Result<HttpRequest> {
        if spec.host.is_empty() {
            return Err(Error::invalid_request("host is empty"));
        }
        if !spec.path.starts_with('/') {
            return Err(Error::invalid_request(format!(
                "path {:?} must start with '/'",
                spec.path
            )));
        }
        if spec.path.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(Error::invalid_request(format!(
                "path {:?} contains whitespace or control characters",
                spec.path
            )));
        }

        let port = spec.effective_port();
        let payload = codec::encode(spec.body.as_ref(), spec.request_encoding)?;

        let host_header = if port == spec.protocol.default_port() {
            host_for_header(&spec.host)
        } else {
            format!("{}:{port}", host_for_header(&spec.host))
        };

        let mut headers: Vec<(String, String)> = vec![("Host".to_string(), host_header)];
        if let Some(content_type) = payload.content_type {
            headers.push(("Content-Type".to_string(), content_type.to_string()));
        }
        headers.push(("Content-Length".to_string(), payload.bytes.len().to_string()));
        if let Some(value) = auth::authorization(spec.auth.as_deref()) {
            headers.push(("Authorization".to_string(), value));
        }

        for (name, value) in &spec.extra_headers {
            validate_header_name(name)?;
            validate_header_value(name, value)?;
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("connection")) {
            headers.push(("Connection".to_string(), "close".to_string()));
        }

        Ok(HttpRequest {
            method: spec.method,
            host: spec.host.clone(),
            port,
            path: spec.path.clone(),
            headers,
            body: payload.bytes,
        })
    }

    /// Decode a received body according to the response content type.
    pub fn parse_response(&self, metadata: ResponseMetadata, raw: &[u8]) -> Result<Response> {
        match codec::decode(raw, metadata.content_type()) {
            Ok(body) => Ok(Response { metadata, body }),
            Err(source) => Err(Error::InvalidJson { metadata, source }),
        }
    }

    /// Issue one request and resolve with its decoded response.
    pub async fn request(&self, spec: &RequestSpec) -> Result<Response> {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "request",
            %request_id,
            method = %spec.method,
            host = %spec.host,
            path = %spec.path,
        );

        let started = Instant::now();
        let mut stage = Stage::Connecting;
        let outcome = match self.config.timeout {
            Some(limit) => {
                let attempt = tokio::time::timeout(limit, self.exchange(spec, &mut stage))
                    .instrument(span.clone())
                    .await;
                match attempt {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        stage,
                        elapsed: started.elapsed(),
                    }),
                }
            }
            None => self.exchange(spec, &mut stage).instrument(span.clone()).await,
        };

        span.in_scope(|| match &outcome {
            Ok(response) => debug!(
                status = response.status(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "resolved"
            ),
            Err(e) => debug!(%stage, error = %e, "resolved with error"),
        });
        outcome
    }

    /// Spawn the request and hand its outcome to `callback`, exactly once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send<F>(&self, spec: RequestSpec, callback: F) -> RequestHandle
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        let client = self.clone();
        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                result = client.request(&spec) => result,
                Ok(()) = &mut cancelled => Err(Error::Aborted),
            };
            callback(outcome);
        });
        RequestHandle {
            cancel: Some(cancel),
            task,
        }
    }

    async fn exchange(&self, spec: &RequestSpec, stage: &mut Stage) -> Result<Response> {
        let request = self.build_request(spec)?;

        debug!(port = request.port, "connecting");
        let tcp = net::connect_tcp(&request.host, request.port).await?;
        let mut conn = if spec.protocol.is_secure() {
            *stage = Stage::SecureHandshake;
            debug!(pinned = spec.fingerprint.is_some(), "TLS handshake");
            let stream =
                tls::handshake(tcp, &request.host, spec.fingerprint.as_deref(), &self.trust)
                    .await?;
            Connection::Tls(Box::new(stream))
        } else {
            if spec.fingerprint.is_some() {
                warn!("fingerprint ignored for a plain http request");
            }
            Connection::Plain(tcp)
        };

        *stage = Stage::Sending;
        debug!(body_len = request.body.len(), "sending");
        h1::write_request(&mut conn, &request).await?;

        *stage = Stage::AwaitingResponse;
        let mut reader = ResponseReader::new(conn);
        let head = reader.read_head(request.method).await?;
        debug!(status = head.metadata.status_code, framing = ?head.framing, "response head");

        *stage = Stage::ReceivingBody;
        let raw = reader.read_body(head.framing).await?;

        *stage = Stage::Decoding;
        debug!(body_len = raw.len(), "decoding");
        self.parse_response(head.metadata, &raw)
    }
}

/// Bracket IPv6 literals for the `Host` header.
fn host_for_header(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// Handle to a request started with `Client::send`.
///
/// Dropping the handle detaches the request; it still runs to completion
/// and its callback still fires.
#[derive(Debug)]
pub struct RequestHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RequestHandle {
    /// Tear down the in-flight exchange. The callback receives
    /// `Error::Aborted` unless the request already resolved.
    pub fn abort(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Wait for the callback to have run.
    pub async fn join(self) -> std::result::Result<(), JoinError> {
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec::RequestEncoding;
    use crate::http::HttpMethod;
    use crate::request::Protocol;

    fn client() -> Client {
        Client::new()
    }

    fn spec() -> RequestSpec {
        RequestSpec::new(Protocol::Http, "localhost", "/hello")
            .port(9995)
            .method(HttpMethod::Put)
    }

    #[test]
    fn build_json_request_with_auth() {
        let spec = spec()
            .body(json!({ "hello": "world", "witaj": "świecie" }))
            .auth("user:pass");
        let req = client().build_request(&spec).unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.path, "/hello");
        assert_eq!(req.port, 9995);
        assert_eq!(req.header("host"), Some("localhost:9995"));
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("authorization"), Some("Basic dXNlcjpwYXNz"));
        assert_eq!(req.header("connection"), Some("close"));
        assert_eq!(
            req.header("content-length"),
            Some(req.body.len().to_string().as_str())
        );
        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body["witaj"], "świecie");
    }

    #[test]
    fn build_query_string_request() {
        let spec = spec()
            .body(json!({ "hello": "world" }))
            .encoding(RequestEncoding::QueryString);
        let req = client().build_request(&spec).unwrap();
        assert_eq!(
            req.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(req.body, b"hello=world".to_vec());
    }

    #[test]
    fn build_without_body_or_auth() {
        let req = client()
            .build_request(&RequestSpec::new(Protocol::Https, "example.com", "/"))
            .unwrap();
        assert_eq!(req.port, 443);
        assert_eq!(req.header("host"), Some("example.com"));
        assert_eq!(req.header("content-type"), None);
        assert_eq!(req.header("authorization"), None);
        assert_eq!(req.header("content-length"), Some("0"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn extras_override_computed_headers_except_length_and_host() {
        let spec = spec()
            .body(json!({ "a": 1 }))
            .header("content-type", "application/vnd.custom+json")
            .header("Content-Length", "999")
            .header("Host", "elsewhere")
            .header("X-Request-Source", "tests");
        let req = client().build_request(&spec).unwrap();
        assert_eq!(req.header("content-type"), Some("application/vnd.custom+json"));
        assert_eq!(req.header("content-length"), Some("7"));
        assert_eq!(req.header("host"), Some("localhost:9995"));
        assert_eq!(req.header("x-request-source"), Some("tests"));
        let content_types = req
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("content-type"))
            .count();
        assert_eq!(content_types, 1);
    }

    #[test]
    fn header_injection_is_rejected() {
        let spec = spec().header("X-Evil", "a\r\nInjected: 1");
        assert!(matches!(
            client().build_request(&spec),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn bad_paths_are_rejected() {
        let no_slash = RequestSpec::new(Protocol::Http, "localhost", "hello");
        assert!(client().build_request(&no_slash).is_err());
        let with_space = RequestSpec::new(Protocol::Http, "localhost", "/a b");
        assert!(client().build_request(&with_space).is_err());
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let spec = RequestSpec::new(Protocol::Http, "::1", "/").port(8080);
        let req = client().build_request(&spec).unwrap();
        assert_eq!(req.header("host"), Some("[::1]:8080"));
    }

    #[test]
    fn parse_json_response() {
        let meta = ResponseMetadata::new(
            201,
            vec![("Content-Type".to_string(), "application/json".to_string())],
        );
        let response = client()
            .parse_response(meta, r#"{"world":"hello","świecie":"witaj"}"#.as_bytes())
            .unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(
            response.body,
            DecodedBody::Json(json!({ "world": "hello", "świecie": "witaj" }))
        );
    }

    #[test]
    fn parse_invalid_json_keeps_metadata_in_error() {
        let meta = ResponseMetadata::new(
            201,
            vec![("content-type".to_string(), "application/json".to_string())],
        );
        let err = client()
            .parse_response(meta, b"This is a string")
            .unwrap_err();
        match err {
            Error::InvalidJson { metadata, .. } => assert_eq!(metadata.status_code, 201),
            other => panic!("expected InvalidJson, got {other:?}"),
        }
    }

    #[test]
    fn typed_json_access() {
        #[derive(serde::Deserialize)]
        struct Greeting {
            world: String,
        }
        let meta = ResponseMetadata::new(
            200,
            vec![("content-type".to_string(), "application/json".to_string())],
        );
        let response = client().parse_response(meta, br#"{"world":"hello"}"#).unwrap();
        let greeting: Greeting = response.json().unwrap();
        assert_eq!(greeting.world, "hello");

        let text = client()
            .parse_response(ResponseMetadata::new(200, Vec::new()), b"plain")
            .unwrap();
        assert!(text.json::<Greeting>().is_err());
    }

    #[test]
    fn stage_display_reads_as_activity() {
        assert_eq!(Stage::AwaitingResponse.to_string(), "awaiting the response");
        assert_eq!(Stage::SecureHandshake.to_string(), "performing the TLS handshake");
    }
}
