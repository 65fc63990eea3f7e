//! Renders an [`ApiError`] as an HTTP response.
//!
//! This is the only place the error body shape is decided:
//!
//! ```text
//! HTTP <status>
//! Content-Type: application/json
//! { "error", "type", "timestamp", "path", "requestId",
//!   "details"?, "retryAfter"?, "allowedMethods"? }
//! ```
//!
//! `details` is dropped in production. `retryAfter` / `allowedMethods` are
//! mirrored into `Retry-After` / `Allow` headers.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::api_error::{ApiError, ErrorKind};
use crate::config::Environment;
use crate::method::Method;
use crate::request_log::RequestId;
use crate::response::Response;

/// Wire body of every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody<'a> {
    pub error: &'a str,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub timestamp: String,
    pub path: &'a str,
    pub request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "no_methods")]
    pub allowed_methods: &'a [Method],
}

fn no_methods(methods: &&[Method]) -> bool {
    methods.is_empty()
}

/// Builds the response for `err`. `path` is the request URL as received.
pub fn error_response(
    err: &ApiError,
    path: &str,
    request_id: &RequestId,
    environment: Environment,
) -> Response {
    let body = ErrorBody {
        error: err.message(),
        kind: err.kind(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        path,
        request_id: request_id.as_str(),
        details: if environment.is_production() { None } else { err.details() },
        retry_after: err.retry_after(),
        allowed_methods: err.allowed_methods(),
    };

    let bytes = match serde_json::to_vec(&body) {
        Ok(bytes) => bytes,
        // Only reachable through a non-string map key inside `details`.
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "failed to serialise error body");
            format!(
                r#"{{"error":"Internal server error","type":"INTERNAL_SERVER_ERROR","requestId":"{request_id}"}}"#
            )
            .into_bytes()
        }
    };

    let mut res = Response::builder().status(err.status());
    if let Some(secs) = err.retry_after() {
        res = res.header("retry-after", &secs.to_string());
    }
    if !err.allowed_methods().is_empty() {
        res = res.header("allow", &Method::join(err.allowed_methods()));
    }
    res.json(bytes)
}
