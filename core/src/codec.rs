//! Request body encoding and response body decoding.
//!
//! # Design
//! Encoding is picked by the caller (`RequestEncoding`); decoding is picked
//! by the response's declared media type. Both are small closed enums so a
//! new format is a new variant, not another string check.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::form_urlencoded;

use crate::error::{Error, Result};

pub const JSON: &str = "application/json";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// How the request body is serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestEncoding {
    #[default]
    Json,
    QueryString,
}

/// A serialized request body and its content type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub content_type: Option<&'static str>,
}

/// Serialize an optional body.
pub fn encode(body: Option<&Value>, encoding: RequestEncoding) -> Result<EncodedPayload> {
    let Some(body) = body else {
        return Ok(EncodedPayload::default());
    };
    match encoding {
        RequestEncoding::Json => {
            let bytes = serde_json::to_vec(body).map_err(|e| Error::Encode(e.to_string()))?;
            Ok(EncodedPayload {
                bytes,
                content_type: Some(JSON),
            })
        }
        RequestEncoding::QueryString => Ok(EncodedPayload {
            bytes: encode_form(body)?.into_bytes(),
            content_type: Some(FORM_URLENCODED),
        }),
    }
}

/// Form-urlencode a flat object. Arrays become repeated keys, `null` an
/// empty value.
fn encode_form(body: &Value) -> Result<String> {
    let Value::Object(fields) = body else {
        return Err(Error::Encode(
            "query string body must be an object".to_string(),
        ));
    };
    let mut form = form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields {
        match value {
            Value::Array(items) => {
                for item in items {
                    form.append_pair(key, &form_scalar(key, item)?);
                }
            }
            other => {
                form.append_pair(key, &form_scalar(key, other)?);
            }
        }
    }
    Ok(form.finish())
}

fn form_scalar(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Array(_) | Value::Object(_) => Err(Error::Encode(format!(
            "query string field {key:?} is not a scalar"
        ))),
    }
}

/// Media types the decoder distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Json,
    Other,
}

impl MediaType {
    /// Classify a `Content-Type` value, ignoring parameters and case.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let essence = content_type
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .unwrap_or_default();
        if essence.eq_ignore_ascii_case(JSON) {
            MediaType::Json
        } else {
            MediaType::Other
        }
    }
}

/// A decoded response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DecodedBody {
    #[default]
    Empty,
    Json(Value),
    Text(String),
}

impl DecodedBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, DecodedBody::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            DecodedBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DecodedBody::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Decode raw body bytes according to the declared content type.
///
/// Only a JSON media type can fail; everything else comes back as text.
pub fn decode(raw: &[u8], content_type: Option<&str>) -> std::result::Result<DecodedBody, serde_json::Error> {
    if raw.is_empty() {
        return Ok(DecodedBody::Empty);
    }
    match MediaType::from_content_type(content_type) {
        MediaType::Json => serde_json::from_slice(raw).map(DecodedBody::Json),
        MediaType::Other => Ok(DecodedBody::Text(String::from_utf8_lossy(raw).into_owned())),
    }
}
