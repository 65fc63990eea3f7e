//! Middleware: functions from one [`Endpoint`] to another.
//!
//! Each middleware decides per request to either short-circuit (answer
//! without calling the inner endpoint) or proceed. Layers are stacked with
//! [`Compose`] / [`compose!`](crate::compose); the first one listed is the
//! outermost, so requests pass through layers in the order they are written
//! and a short-circuit stops every later layer and the handler.
//!
//! ```rust
//! use std::time::Duration;
//! use vitrine::middleware::{Cors, Middleware, MethodGuard, RateLimit};
//! use vitrine::{compose, ApiError, ErrorBoundary, Method, Request, Response};
//!
//! async fn list_products(_req: Request) -> Result<Response, ApiError> {
//!     Ok(Response::json(b"[]".to_vec()))
//! }
//!
//! let boundary = ErrorBoundary::default();
//! let endpoint = compose![
//!     RateLimit::in_memory(100, Duration::from_secs(900)),
//!     Cors::new(["https://shop.example"]),
//!     MethodGuard::new(&[Method::Get, Method::Post]),
//! ]
//! .around(boundary.wrap(list_products));
//! ```

mod cors;
mod method_guard;
mod rate_limit;

pub use cors::Cors;
pub use method_guard::MethodGuard;
pub use rate_limit::{Counter, MemoryStore, RateLimit, RateLimitStore};

use crate::handler::{Endpoint, Handler};

/// A request-pipeline stage.
pub trait Middleware: Send + Sync + 'static {
    /// Returns a new endpoint that runs this stage around `inner`.
    fn wrap(&self, inner: Endpoint) -> Endpoint;

    /// Convenience for `wrap(Endpoint::new(handler))`.
    fn around(&self, handler: impl Handler) -> Endpoint
    where
        Self: Sized,
    {
        self.wrap(Endpoint::new(handler))
    }
}

/// An ordered stack of middleware, itself a middleware.
#[derive(Default)]
pub struct Compose {
    layers: Vec<Box<dyn Middleware>>,
}

impl Compose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer inside the ones already added.
    pub fn with(mut self, layer: impl Middleware) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Middleware for Compose {
    /// Applies layers right to left, so the first listed ends up outermost.
    fn wrap(&self, inner: Endpoint) -> Endpoint {
        self.layers.iter().rev().fold(inner, |acc, layer| layer.wrap(acc))
    }
}

/// Builds a [`Compose`] from a list of middleware, outermost first.
#[macro_export]
macro_rules! compose {
    ($($layer:expr),* $(,)?) => {
        $crate::middleware::Compose::new()$(.with($layer))*
    };
}
