pub mod tls;

pub use axum::http::StatusCode;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
    Router,
};
use tokio::{net::TcpListener, sync::RwLock};

/// One request as the server saw it.
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What the server answers to every request.
#[derive(Clone, Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn raw(status: StatusCode, content_type: &str, body: &str) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }
}

impl Default for Reply {
    fn default() -> Self {
        Self::json(
            StatusCode::CREATED,
            &serde_json::json!({ "world": "hello", "świecie": "witaj" }),
        )
    }
}

/// Shared server state: the canned reply and every captured request.
#[derive(Clone, Debug, Default)]
pub struct MockState {
    reply: Arc<Reply>,
    captured: Arc<RwLock<Vec<CapturedRequest>>>,
}

impl MockState {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply: Arc::new(reply),
            captured: Arc::default(),
        }
    }

    pub async fn captured(&self) -> Vec<CapturedRequest> {
        self.captured.read().await.clone()
    }
}

pub fn app(state: MockState) -> Router {
    Router::new().fallback(capture).with_state(state)
}

pub async fn run(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

pub async fn run_tls(listener: tls::TlsListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

async fn capture(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let captured = CapturedRequest {
        method: method.to_string(),
        path: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: body.to_vec(),
    };
    tracing::info!(
        method = %captured.method,
        path = %captured.path,
        body_len = captured.body.len(),
        "captured request"
    );
    state.captured.write().await.push(captured);

    let reply = state.reply.as_ref();
    (
        reply.status,
        [(header::CONTENT_TYPE, reply.content_type.clone())],
        reply.body.clone(),
    )
        .into_response()
}
