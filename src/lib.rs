//! # vitrine
//!
//! Error handling and request middleware for storefront-style JSON APIs,
//! with a small hyper host to run them on.
//!
//! ## The contract
//!
//! Every request that does not succeed ends in exactly one JSON body of the
//! same shape, and exactly one log line carrying the same request id:
//!
//! ```text
//! { "error": "...", "type": "NOT_FOUND_ERROR", "timestamp": "...",
//!   "path": "/api/products/7", "requestId": "req_...", "details": {...} }
//! ```
//!
//! Handlers return `Result<_, E>` where `E: Into<`[`Failure`]`>`. The
//! [`ErrorBoundary`] translates the failure into an [`ApiError`], writes a
//! [`CorrelationRecord`] through `tracing` and renders the body. In
//! [`Environment::Production`] `details` are withheld and unclassified
//! failures read `"Internal server error"`.
//!
//! Middleware ([`middleware`]) wraps one [`Endpoint`] in another: rate
//! limiting, CORS and a method allow-list ship with the crate, and
//! [`compose!`] stacks them outermost-first.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use vitrine::middleware::{Cors, MethodGuard, Middleware, RateLimit};
//! use vitrine::{
//!     compose, ApiError, Config, ErrorBoundary, Failure, Json, Method, Request, Router, Server,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vitrine::Error> {
//!     let config = Config::from_env()?;
//!     vitrine::telemetry::init(vitrine::telemetry::TracingConfig::from_env());
//!
//!     let boundary = ErrorBoundary::new(config.environment);
//!     let products = compose![
//!         RateLimit::from_config(&config.rate_limit).with_boundary(boundary),
//!         Cors::new(config.cors_allowed_origins.clone()),
//!         MethodGuard::new(&[Method::Get, Method::Options]).with_boundary(boundary),
//!     ]
//!     .around(boundary.wrap(show_product));
//!
//!     let app = Router::new()
//!         .get("/api/products/{id}", products.clone())
//!         .on(Method::Options, "/api/products/{id}", products)
//!         .get("/api/health", vitrine::health::status);
//!
//!     Server::from_config(&config)?.serve(app).await
//! }
//!
//! async fn show_product(req: Request) -> Result<Json<String>, Failure> {
//!     let id = req.param("id").ok_or_else(|| ApiError::required_field("id"))?;
//!     Ok(Json(format!("product {id}")))
//! }
//! ```

mod api_error;
mod boundary;
mod clock;
mod config;
mod error;
mod failure;
mod handler;
mod method;
mod request;
mod request_log;
mod respond;
mod response;
mod router;
mod server;
mod status;

pub mod health;
pub mod middleware;
pub mod telemetry;

pub use api_error::{ApiError, ErrorKind};
pub use boundary::ErrorBoundary;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, Environment, RateLimitConfig};
pub use error::Error;
pub use failure::{DatabaseError, Failure, GENERIC_INTERNAL_MESSAGE, TokenError, translate};
pub use handler::{BoxFuture, Endpoint, Handler};
pub use method::{Method, UnknownMethod};
pub use request::{Request, RequestBuilder};
pub use request_log::{Cause, CorrelationRecord, ErrorRecord, RequestContext, RequestId, log_failure};
pub use respond::{ErrorBody, error_response};
pub use response::{IntoResponse, Json, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use status::Status;
