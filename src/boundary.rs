//! The error boundary: where failures stop propagating and become responses.
//!
//! ```text
//! handler ── Err(Failure) ──▶ translate ──▶ log_failure ──▶ error_response
//!    │                       (failure.rs)  (request_log.rs)  (respond.rs)
//!    └────── Ok(R) ────────▶ R::into_response()
//! ```
//!
//! Each failed request runs the three steps exactly once, in that order.
//! Successful requests never touch the error path.

use std::future::Future;

use crate::api_error::ApiError;
use crate::config::Environment;
use crate::failure::{Failure, translate};
use crate::handler::Endpoint;
use crate::request::Request;
use crate::request_log::{Cause, CorrelationRecord, RequestContext, RequestId, log_failure};
use crate::respond::error_response;
use crate::response::{IntoResponse, Response};

/// Turns failures into logged, correlated JSON responses.
///
/// ```rust
/// use vitrine::{ApiError, Environment, ErrorBoundary, Json, Request};
///
/// async fn show(req: Request) -> Result<Json<String>, ApiError> {
///     let id = req.param("id").ok_or_else(|| ApiError::required_field("id"))?;
///     Ok(Json(id.to_owned()))
/// }
///
/// let endpoint = ErrorBoundary::new(Environment::Production).wrap(show);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorBoundary {
    environment: Environment,
}

impl ErrorBoundary {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    /// Uses [`Environment::from_env`].
    pub fn from_env() -> Self {
        Self::new(Environment::from_env())
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Wraps a fallible handler into an infallible [`Endpoint`].
    ///
    /// The handler sees the request exactly as the wrapper received it and
    /// is called once per request.
    pub fn wrap<F, Fut, R, E>(&self, handler: F) -> Endpoint
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: IntoResponse + Send + 'static,
        E: Into<Failure> + Send + 'static,
    {
        let boundary = *self;
        Endpoint::new(move |req: Request| {
            let ctx = RequestContext::from_request(&req);
            let fut = handler(req);
            async move {
                match fut.await {
                    Ok(value) => value.into_response(),
                    Err(e) => boundary.handle(&ctx, e.into()),
                }
            }
        })
    }

    /// Translates, logs and renders an arbitrary failure.
    pub fn handle(&self, ctx: &RequestContext, failure: Failure) -> Response {
        let cause = Cause::of(&failure);
        let err = translate(failure, self.environment);
        self.finish(ctx, &err, cause)
    }

    /// Logs and renders an error raised before any handler ran (middleware
    /// short-circuits, unknown routes).
    pub fn reject(&self, ctx: &RequestContext, err: ApiError) -> Response {
        let cause = Cause::of_api(&err);
        self.finish(ctx, &err, cause)
    }

    fn finish(&self, ctx: &RequestContext, err: &ApiError, cause: Cause) -> Response {
        let request_id = RequestId::new();
        log_failure(&CorrelationRecord::new(request_id.clone(), ctx, err, cause));
        error_response(err, &ctx.url, &request_id, self.environment)
    }
}
