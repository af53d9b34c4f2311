//! Pluggable translator between HTTP bytes and the success/error envelope
//! (spec §6, §9 "Pluggable formatters").
//!
//! Per the Open Question resolution recorded in `SPEC_FULL.md` §4, the
//! active formatter is resolved **per route** (carried on route metadata),
//! not as process-wide mutable state — this avoids the cross-request bleed
//! the source's global formatter switch risked (spec §9).

use std::sync::OnceLock;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// A single field-level error, as returned in the envelope's `fields` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), code: code.into(), message: message.into() }
    }
}

/// The `error` object inside an error envelope (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Not serialized: carries the HTTP status a remote peer reported, so
    /// that a proxied error can be re-surfaced with the same status locally.
    #[serde(skip)]
    pub status: Option<StatusCode>,
}

impl EnvelopeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), fields: None, details: None, status: None }
    }

    pub fn with_fields(mut self, fields: Vec<FieldError>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

/// Optional pagination/meta block attached to a success envelope.
pub type EnvelopeMeta = Value;

/// The decoded shape of an envelope, regardless of which formatter produced
/// the bytes (spec §4.6 step 4: "extract `Data` for success... build a
/// structured `Error`... attach pagination meta when present").
#[derive(Debug, Clone)]
pub enum DecodedEnvelope {
    Success { data: Value, message: Option<String>, meta: Option<EnvelopeMeta> },
    Error(EnvelopeError),
}

impl DecodedEnvelope {
    pub fn into_data(self) -> Result<Value, AppError> {
        match self {
            DecodedEnvelope::Success { data, .. } => Ok(data),
            DecodedEnvelope::Error(e) => Err(AppError::Remote(e)),
        }
    }
}

/// Pluggable translator between HTTP bytes and the envelope (spec §9, §4.6).
///
/// A `Formatter` is responsible both for rendering outgoing responses (the
/// auto-router's job) and for parsing incoming peer responses (the proxy's
/// job), so that a client and server sharing a formatter round-trip cleanly
/// (spec §6: "a client formatter must recover `status`, `data`, `error`").
pub trait Formatter: Send + Sync {
    /// Render a successful handler return value into a response.
    fn render_success(&self, data: Value, message: Option<String>, meta: Option<EnvelopeMeta>) -> Response;

    /// Render an `AppError` into a response with the matching HTTP status.
    fn render_error(&self, status: StatusCode, err: &AppError) -> Response;

    /// Parse response bytes (already read from the wire) into a
    /// [`DecodedEnvelope`], used by the proxy on the client side.
    fn decode(&self, status: StatusCode, body: &[u8]) -> DecodedEnvelope;
}

/// The default JSON envelope described in spec §6.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatter;

#[derive(Serialize)]
struct SuccessEnvelope {
    status: &'static str,
    data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Value>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    status: &'static str,
    error: &'a EnvelopeError,
}

#[derive(Deserialize)]
struct RawEnvelope {
    status: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    meta: Option<Value>,
    #[serde(default)]
    error: Option<RawEnvelopeError>,
}

#[derive(Deserialize)]
struct RawEnvelopeError {
    #[serde(default = "default_error_code")]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    fields: Option<Vec<FieldError>>,
    #[serde(default)]
    details: Option<Value>,
}

fn default_error_code() -> String {
    "unknown".to_string()
}

impl Formatter for DefaultFormatter {
    fn render_success(&self, data: Value, message: Option<String>, meta: Option<EnvelopeMeta>) -> Response {
        let envelope = SuccessEnvelope { status: "success", data, message, meta };
        (StatusCode::OK, axum::Json(envelope)).into_response()
    }

    fn render_error(&self, status: StatusCode, err: &AppError) -> Response {
        let error = err.to_envelope_error();
        let envelope = ErrorEnvelope { status: "error", error: &error };
        (status, axum::Json(envelope)).into_response()
    }

    fn decode(&self, status: StatusCode, body: &[u8]) -> DecodedEnvelope {
        let raw: RawEnvelope = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(_) => {
                return DecodedEnvelope::Error(
                    EnvelopeError::new("malformed_envelope", "could not parse response body")
                        .with_status(status),
                );
            }
        };

        if raw.status == "error" || status.is_client_error() || status.is_server_error() {
            let raw_err = raw.error.unwrap_or(RawEnvelopeError {
                code: default_error_code(),
                message: "unknown error".to_string(),
                fields: None,
                details: None,
            });
            let mut err = EnvelopeError::new(raw_err.code, raw_err.message).with_status(status);
            if let Some(fields) = raw_err.fields {
                err = err.with_fields(fields);
            }
            if let Some(details) = raw_err.details {
                err = err.with_details(details);
            }
            DecodedEnvelope::Error(err)
        } else {
            DecodedEnvelope::Success { data: raw.data.unwrap_or(Value::Null), message: raw.message, meta: raw.meta }
        }
    }
}

static DEFAULT_FORMATTER: OnceLock<DefaultFormatter> = OnceLock::new();

/// The process-wide fallback formatter, used by routes that don't carry a
/// more specific one on their metadata.
pub fn default_formatter() -> &'static DefaultFormatter {
    DEFAULT_FORMATTER.get_or_init(DefaultFormatter::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_round_trips_through_default_formatter() {
        let fmt = default_formatter();
        let resp = fmt.render_success(json!({"id": 1}), None, None);
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn decode_recovers_error_envelope() {
        let fmt = default_formatter();
        let body = br#"{"status":"error","error":{"code":"not_found","message":"missing"}}"#;
        match fmt.decode(StatusCode::NOT_FOUND, body) {
            DecodedEnvelope::Error(e) => {
                assert_eq!(e.code, "not_found");
                assert_eq!(e.message, "missing");
            }
            DecodedEnvelope::Success { .. } => panic!("expected error"),
        }
    }

    #[test]
    fn decode_recovers_success_envelope() {
        let fmt = default_formatter();
        let body = br#"{"status":"success","data":{"id":1},"meta":{"page":1}}"#;
        match fmt.decode(StatusCode::OK, body) {
            DecodedEnvelope::Success { data, meta, .. } => {
                assert_eq!(data, json!({"id": 1}));
                assert_eq!(meta, Some(json!({"page": 1})));
            }
            DecodedEnvelope::Error(_) => panic!("expected success"),
        }
    }
}
