//! Upstream failure kinds and their translation into [`ApiError`].
//!
//! A handler wrapped by the [`ErrorBoundary`](crate::ErrorBoundary) returns
//! `Result<_, E>` for any `E: Into<Failure>`. `Failure` is a closed set, so
//! [`translate`] is an exhaustive `match`: adding an upstream kind without
//! deciding how it maps is a compile error.
//!
//! | Failure | Category | Status |
//! |---|---|---|
//! | `Api(e)` | unchanged | unchanged |
//! | `Database(UniqueViolation)` | Conflict | 409 |
//! | `Database(RecordNotFound)` | NotFound | 404 |
//! | `Database(ForeignKeyViolation)` | Validation | 400 |
//! | `Database(Other)` | Database | 500 |
//! | `Token(Invalid \| Expired)` | Authentication | 401 |
//! | `Validation(msg)` | Validation | 400 |
//! | `Other(e)` | Internal | 500 |

use serde_json::{Value, json};

use crate::api_error::{ApiError, ErrorKind};
use crate::config::Environment;
use crate::status::Status;

/// Message clients see for unclassified failures in production.
pub const GENERIC_INTERNAL_MESSAGE: &str = "Internal server error";

/// Everything a wrapped handler may fail with.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    /// Already classified by business code; passes through untouched.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Token(#[from] TokenError),

    /// Input rejected by a validator; the message is shown to the client.
    #[error("{0}")]
    Validation(String),

    /// Anything else. Never shown to clients in production.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Failure {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }

    /// Short machine name of the variant, for the correlation record.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Api(_)        => "ApiError",
            Self::Database(_)   => "DatabaseError",
            Self::Token(TokenError::Invalid)  => "InvalidTokenError",
            Self::Token(TokenError::Expired)  => "TokenExpiredError",
            Self::Validation(_) => "ValidationError",
            Self::Other(_)      => "Error",
        }
    }

    /// Display strings of the underlying error and each of its sources,
    /// outermost first.
    pub fn chain(&self) -> Vec<String> {
        let root: &(dyn std::error::Error + 'static) = match self {
            Self::Other(err) => err.as_ref(),
            Self::Api(err) => err,
            Self::Database(err) => err,
            Self::Token(err) => err,
            Self::Validation(_) => return vec![self.to_string()],
        };
        std::iter::successors(Some(root), |e| e.source()).map(ToString::to_string).collect()
    }
}

/// Malformed request bodies are the client's fault.
impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON body: {e}"))
    }
}

impl From<std::io::Error> for Failure {
    fn from(e: std::io::Error) -> Self {
        Self::other(e)
    }
}

// ── Database ──────────────────────────────────────────────────────────────────

/// A failure reported by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    #[error("unique constraint violated on {target:?}")]
    UniqueViolation { target: Vec<String> },

    #[error("record not found")]
    RecordNotFound,

    #[error("foreign key constraint violated on {field:?}")]
    ForeignKeyViolation { field: Option<String> },

    #[error("database error {code}")]
    Other { code: String },
}

impl DatabaseError {
    /// Classifies a driver error code plus its metadata object.
    ///
    /// ORM codes (`P2002`, `P2025`, `P2003`) and PostgreSQL SQLSTATEs
    /// (`23505`, `23503`) are recognised. Constraint columns are read from
    /// `meta.target` (string or array) and `meta.field_name`.
    pub fn from_code(code: &str, meta: &Value) -> Self {
        match code {
            "P2002" | "23505" => Self::UniqueViolation { target: string_list(&meta["target"]) },
            "P2025" => Self::RecordNotFound,
            "P2003" | "23503" => Self::ForeignKeyViolation {
                field: meta["field_name"].as_str().map(str::to_owned),
            },
            other => Self::Other { code: other.to_owned() },
        }
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).map(str::to_owned).collect(),
        _ => Vec::new(),
    }
}

// ── Authentication tokens ─────────────────────────────────────────────────────

/// A failure from the authentication-token verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
}

// ── Translation ───────────────────────────────────────────────────────────────

/// Maps any failure onto exactly one [`ApiError`].
pub fn translate(failure: Failure, environment: Environment) -> ApiError {
    match failure {
        Failure::Api(err) => err,
        Failure::Database(err) => translate_database(err),
        Failure::Token(TokenError::Invalid) => ApiError::new(
            "Invalid authentication token",
            Status::Unauthorized,
            ErrorKind::Authentication,
            None,
        ),
        Failure::Token(TokenError::Expired) => ApiError::new(
            "Authentication token has expired",
            Status::Unauthorized,
            ErrorKind::Authentication,
            None,
        ),
        Failure::Validation(message) => ApiError::validation(message),
        Failure::Other(err) => {
            let message = if environment.is_production() {
                GENERIC_INTERNAL_MESSAGE.to_owned()
            } else {
                err.to_string()
            };
            ApiError::internal(message)
        }
    }
}

fn translate_database(err: DatabaseError) -> ApiError {
    match err {
        DatabaseError::UniqueViolation { target } => ApiError::new(
            "A record with this information already exists",
            Status::Conflict,
            ErrorKind::Conflict,
            Some(json!({ "field": target })),
        ),
        DatabaseError::RecordNotFound => {
            ApiError::new("Record not found", Status::NotFound, ErrorKind::NotFound, None)
        }
        DatabaseError::ForeignKeyViolation { field } => ApiError::new(
            "Foreign key constraint failed",
            Status::BadRequest,
            ErrorKind::Validation,
            Some(json!({ "field": field })),
        ),
        DatabaseError::Other { code } => ApiError::database(Some(json!({ "code": code }))),
    }
}
