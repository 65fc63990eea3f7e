//! Handler trait, type erasure, and [`Endpoint`].
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one map, and every
//! middleware turns one handler into another. Both need a single concrete
//! type, so handlers are erased behind `dyn ErasedHandler`:
//!
//! ```text
//! async fn show(req: Request) -> Response { … }   ← user writes this
//!        ↓ Endpoint::new(show)  /  router.on(.., show)
//! Arc::new(FnHandler(show))                      ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! endpoint.call(req) at request time             ← one vtable dispatch
//!        ↓
//! Box::pin(async { show(req).await.into_response() })
//! ```
//!
//! Per request this costs one `Arc` clone and one virtual call per layer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a [`Response`].
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_endpoint` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// A type-erased, cheaply clonable request handler.
///
/// This is the unit middleware works on: a [`Middleware`](crate::middleware::Middleware)
/// takes an `Endpoint` and returns a new one that wraps it.
///
/// ```rust
/// use vitrine::{Endpoint, Request, Response};
///
/// # async fn demo() {
/// let hello = Endpoint::new(|_req: Request| async { "hello" });
/// let shout = Endpoint::new(move |req: Request| {
///     let inner = hello.clone();
///     async move {
///         let res = inner.call(req).await;
///         let body = String::from_utf8_lossy(res.body()).to_uppercase();
///         Response::text(body)
///     }
/// });
/// # }
/// ```
#[derive(Clone)]
pub struct Endpoint {
    inner: BoxedHandler,
}

impl Endpoint {
    /// Erases any valid handler.
    pub fn new(handler: impl Handler) -> Self {
        handler.into_endpoint()
    }

    /// Invokes the handler once.
    pub fn call(&self, req: Request) -> BoxFuture {
        self.inner.call(req)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Endpoint")
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by [`Endpoint`] and by
/// any `async fn` (or closure) with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// Handlers that return `Result` go through
/// [`ErrorBoundary::wrap`](crate::ErrorBoundary::wrap) first.
///
/// The trait is **sealed** (via the private `Sealed` supertrait).
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_endpoint(self) -> Endpoint;
}

mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_endpoint(self) -> Endpoint {
        Endpoint { inner: Arc::new(FnHandler(self)) }
    }
}

impl private::Sealed for Endpoint {}

impl Handler for Endpoint {
    fn into_endpoint(self) -> Endpoint {
        self
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
