//! Correlation records for failed requests.
//!
//! Every failure that ends a request gets a fresh [`RequestId`]. The same id
//! is written to the log here and sent to the client in the error body, so
//! a user report can be matched to one log line.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api_error::{ApiError, ErrorKind};
use crate::failure::Failure;
use crate::request::Request;

/// Per-failure identifier: `req_` followed by a UUIDv7 (millisecond
/// timestamp plus random bits), so ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(format!("req_{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the error path needs to know about a request once the handler has
/// consumed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Raw method token; may be one the router does not know.
    pub method: String,
    pub url: String,
    pub user_agent: Option<String>,
    pub client_ip: String,
}

impl RequestContext {
    pub fn from_request(req: &Request) -> Self {
        Self {
            method: req.method().as_str().to_owned(),
            url: req.uri().to_owned(),
            user_agent: req.header("user-agent").map(str::to_owned),
            client_ip: req.client_ip(),
        }
    }
}

/// The raw failure's identity, captured before translation consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cause {
    pub name: &'static str,
    /// The error's message and each of its sources, outermost first.
    pub chain: Vec<String>,
}

impl Cause {
    pub fn of(failure: &Failure) -> Self {
        Self { name: failure.name(), chain: failure.chain() }
    }

    /// For rejections raised directly as [`ApiError`]s by middleware.
    pub fn of_api(err: &ApiError) -> Self {
        Self { name: "ApiError", chain: vec![err.message().to_owned()] }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub name: &'static str,
    pub message: String,
    pub chain: Vec<String>,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// One log entry per failed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationRecord {
    pub request_id: RequestId,
    pub timestamp: String,
    pub method: String,
    pub url: String,
    pub user_agent: Option<String>,
    pub ip: String,
    pub error: ErrorRecord,
}

impl CorrelationRecord {
    pub fn new(request_id: RequestId, ctx: &RequestContext, err: &ApiError, cause: Cause) -> Self {
        Self {
            request_id,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            method: ctx.method.clone(),
            url: ctx.url.clone(),
            user_agent: ctx.user_agent.clone(),
            ip: ctx.client_ip.clone(),
            error: ErrorRecord {
                name: cause.name,
                message: err.message().to_owned(),
                chain: cause.chain,
                kind: err.kind(),
                status_code: err.status(),
                details: err.details().cloned(),
            },
        }
    }
}

/// Writes one record to the tracing sink: `error` for 5xx, `warn` otherwise.
///
/// Never fails. If the record cannot be rendered as JSON the structured
/// fields are still emitted.
pub fn log_failure(record: &CorrelationRecord) {
    let rendered = serde_json::to_string(record)
        .unwrap_or_else(|e| format!("{{\"serialisationError\":\"{e}\"}}"));

    if record.error.status_code >= 500 {
        tracing::error!(
            request_id = %record.request_id,
            method = %record.method,
            url = %record.url,
            status = record.error.status_code,
            kind = %record.error.kind,
            record = %rendered,
            "request failed"
        );
    } else {
        tracing::warn!(
            request_id = %record.request_id,
            method = %record.method,
            url = %record.url,
            status = record.error.status_code,
            kind = %record.error.kind,
            record = %rendered,
            "request rejected"
        );
    }
}
