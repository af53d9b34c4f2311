//! The error type returned from handler bodies and proxy calls.
//!
//! `AppError` is what a service method returns on the error side of its
//! `Result`. The auto-router (and the proxy, on the client side) turns it
//! into the standard envelope described in spec §6/§7 via the active
//! [`Formatter`](crate::formatter::Formatter).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::formatter::{EnvelopeError, FieldError};

/// Errors a handler body, guard, or proxy call can produce.
///
/// Maps 1:1 onto spec §7's error kinds except *Config/Registration* and
/// *Infrastructure*, which are fatal at startup and represented by
/// [`RegistryError`](crate::registry::RegistryError) /
/// [`ListenError`](crate::listener::ListenError) instead.
pub enum AppError {
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    Internal(String),
    /// Field-level binding/validation failure (spec §4.5 step 5, §7).
    Validation(Vec<FieldError>),
    /// A remote call's peer envelope reported an error (spec §4.6 step 4, §7).
    Remote(EnvelopeError),
    /// Escape hatch for a handler that wants full control over status + body.
    Custom { status: StatusCode, body: Value },
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Remote(e) => e.status.unwrap_or(StatusCode::BAD_GATEWAY),
            AppError::Custom { status, .. } => *status,
        }
    }

    /// Turn this error into the envelope's `Error` shape (code + message +
    /// optional field errors), independent of any particular formatter.
    pub fn to_envelope_error(&self) -> EnvelopeError {
        match self {
            AppError::NotFound(msg) => EnvelopeError::new("not_found", msg.clone()),
            AppError::Unauthorized(msg) => EnvelopeError::new("unauthorized", msg.clone()),
            AppError::Forbidden(msg) => EnvelopeError::new("forbidden", msg.clone()),
            AppError::BadRequest(msg) => EnvelopeError::new("bad_request", msg.clone()),
            AppError::Internal(msg) => EnvelopeError::new("internal", msg.clone()),
            AppError::Validation(fields) => {
                EnvelopeError::new("validation_failed", "Validation failed".to_string())
                    .with_fields(fields.clone())
            }
            AppError::Remote(e) => e.clone(),
            AppError::Custom { body, .. } => {
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("error")
                    .to_string();
                EnvelopeError::new("custom", message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let AppError::Custom { body, .. } = &self {
            return (status, axum::Json(body.clone())).into_response();
        }
        crate::formatter::default_formatter().render_error(status, &self)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            AppError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            AppError::Internal(msg) => write!(f, "Internal Error: {msg}"),
            AppError::Validation(fields) => write!(f, "Validation Error: {} field(s)", fields.len()),
            AppError::Remote(e) => write!(f, "Remote Error: {} ({})", e.message, e.code),
            AppError::Custom { status, body } => write!(f, "Custom Error ({status}): {body}"),
        }
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Remote(EnvelopeError::new("transport", err.to_string()))
    }
}

/// Generate `From<E> for AppError` implementations that map error types to
/// a specific `AppError` variant.
///
/// ```ignore
/// lokstra_core::map_error! {
///     sqlx::Error => Internal,
///     std::io::Error => Internal,
/// }
/// ```
#[macro_export]
macro_rules! map_error {
    ( $( $err_ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::error::AppError {
                fn from(err: $err_ty) -> Self {
                    $crate::error::AppError::$variant(err.to_string())
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_kind() {
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            AppError::Validation(vec![]).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn display_formatting() {
        assert_eq!(AppError::NotFound("missing".into()).to_string(), "Not Found: missing");
    }
}
