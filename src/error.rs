//! Infrastructure error type.

/// The error type returned by vitrine's fallible infrastructure operations.
///
/// Request-level failures (404, 409, 429, …) are not `Error`s: they are
/// [`ApiError`](crate::ApiError) values rendered by the error boundary. This
/// type surfaces what happens outside a request: binding a port, reading
/// configuration, or talking to a rate-limit store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{0}`")]
    InvalidAddress(String),

    #[error("config: {key}: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("rate-limit store: {0}")]
    Store(String),
}
