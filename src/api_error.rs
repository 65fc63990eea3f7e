//! The error taxonomy: nine categories and the immutable [`ApiError`] value
//! every non-2xx response is rendered from.
//!
//! Business code builds an `ApiError` with one of the named constructors and
//! returns it; it never needs to know which status code goes with which
//! category.
//!
//! ```rust
//! use vitrine::{ApiError, ErrorKind};
//!
//! let err = ApiError::not_found("Product");
//! assert_eq!(err.kind(), ErrorKind::NotFound);
//! assert_eq!(err.status(), 404);
//! assert_eq!(err.message(), "Product not found");
//! ```

use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};

use crate::method::Method;
use crate::status::Status;

/// The closed set of error categories. Serialises to the wire names
/// (`"VALIDATION_ERROR"`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "AUTHENTICATION_ERROR")]
    Authentication,
    #[serde(rename = "AUTHORIZATION_ERROR")]
    Authorization,
    #[serde(rename = "NOT_FOUND_ERROR")]
    NotFound,
    #[serde(rename = "CONFLICT_ERROR")]
    Conflict,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimit,
    #[serde(rename = "DATABASE_ERROR")]
    Database,
    #[serde(rename = "EXTERNAL_API_ERROR")]
    ExternalApi,
    #[serde(rename = "INTERNAL_SERVER_ERROR")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation     => "VALIDATION_ERROR",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::Authorization  => "AUTHORIZATION_ERROR",
            Self::NotFound       => "NOT_FOUND_ERROR",
            Self::Conflict       => "CONFLICT_ERROR",
            Self::RateLimit      => "RATE_LIMIT_ERROR",
            Self::Database       => "DATABASE_ERROR",
            Self::ExternalApi    => "EXTERNAL_API_ERROR",
            Self::Internal       => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified request failure.
///
/// Immutable once built: created where the failure happens and carried
/// unchanged to the responder. `details` reaches the client only outside
/// production. `retry_after` and `allowed_methods` are protocol hints and
/// are always sent, as headers and body fields.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    message: String,
    status: u16,
    kind: ErrorKind,
    details: Option<Value>,
    retry_after: Option<u64>,
    allowed_methods: Vec<Method>,
}

impl ApiError {
    pub fn new(
        message: impl Into<String>,
        status: impl Into<u16>,
        kind: ErrorKind,
        details: Option<Value>,
    ) -> Self {
        Self {
            message: message.into(),
            status: status.into(),
            kind,
            details,
            retry_after: None,
            allowed_methods: Vec::new(),
        }
    }

    pub fn message(&self) -> &str { &self.message }
    pub fn status(&self) -> u16 { self.status }
    pub fn kind(&self) -> ErrorKind { self.kind }
    pub fn details(&self) -> Option<&Value> { self.details.as_ref() }
    /// Seconds until a rate-limited client may retry.
    pub fn retry_after(&self) -> Option<u64> { self.retry_after }
    /// Methods the route accepts, for 405 responses.
    pub fn allowed_methods(&self) -> &[Method] { &self.allowed_methods }

    // ── Validation ────────────────────────────────────────────────────────────

    /// `400` — `"{field} is required"`.
    pub fn required_field(field: &str) -> Self {
        Self::new(
            format!("{field} is required"),
            Status::BadRequest,
            ErrorKind::Validation,
            Some(json!({ "field": field })),
        )
    }

    /// `400` — malformed e-mail address.
    pub fn invalid_email() -> Self {
        Self::new(
            "Invalid email format",
            Status::BadRequest,
            ErrorKind::Validation,
            Some(json!({ "field": "email" })),
        )
    }

    /// `400` — password below the minimum length.
    pub fn weak_password() -> Self {
        Self::new(
            "Password must be at least 6 characters long",
            Status::BadRequest,
            ErrorKind::Validation,
            Some(json!({ "field": "password" })),
        )
    }

    /// `400` — free-form validation message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message, Status::BadRequest, ErrorKind::Validation, None)
    }

    /// `405` — request method outside the route's allow-list.
    pub fn method_not_allowed(method: impl fmt::Display, allowed: &[Method]) -> Self {
        Self {
            allowed_methods: allowed.to_vec(),
            ..Self::new(
                format!("Method {method} not allowed"),
                Status::MethodNotAllowed,
                ErrorKind::Validation,
                None,
            )
        }
    }

    // ── Authentication / authorization ────────────────────────────────────────

    /// `401` — login with a wrong e-mail or password.
    pub fn invalid_credentials() -> Self {
        Self::new("Invalid email or password", Status::Unauthorized, ErrorKind::Authentication, None)
    }

    /// `401` — no valid session.
    pub fn unauthorized() -> Self {
        Self::new("Access denied", Status::Unauthorized, ErrorKind::Authentication, None)
    }

    /// `403` — authenticated but not allowed.
    pub fn forbidden() -> Self {
        Self::new("Insufficient permissions", Status::Forbidden, ErrorKind::Authorization, None)
    }

    // ── Everything else ───────────────────────────────────────────────────────

    /// `404` — `"{resource} not found"`.
    pub fn not_found(resource: &str) -> Self {
        Self::new(
            format!("{resource} not found"),
            Status::NotFound,
            ErrorKind::NotFound,
            Some(json!({ "resource": resource })),
        )
    }

    /// `413` — request body over the configured limit.
    pub fn payload_too_large(limit_bytes: usize) -> Self {
        Self::new(
            "Request body too large",
            Status::ContentTooLarge,
            ErrorKind::Validation,
            Some(json!({ "limitBytes": limit_bytes })),
        )
    }

    /// `409`
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(message, Status::Conflict, ErrorKind::Conflict, None)
    }

    /// `429` with the number of seconds until the window resets.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            retry_after: Some(retry_after_secs),
            ..Self::new("Too many requests", Status::TooManyRequests, ErrorKind::RateLimit, None)
        }
    }

    /// `500` — a database operation failed for a reason clients cannot fix.
    pub fn database(details: Option<Value>) -> Self {
        Self::new("Database operation failed", Status::InternalServerError, ErrorKind::Database, details)
    }

    /// `502` — an upstream service (image host, messaging API) failed.
    pub fn external_api(service: &str, message: impl Into<String>) -> Self {
        Self::new(
            message,
            Status::BadGateway,
            ErrorKind::ExternalApi,
            Some(json!({ "service": service })),
        )
    }

    /// `500`
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message, Status::InternalServerError, ErrorKind::Internal, None)
    }
}
