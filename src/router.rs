//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. A path registered under
//! other methods answers `405` with an `Allow` list instead of `404`.

use std::collections::HashMap;

use matchit::Router as MatchitRouter;

use crate::handler::{Endpoint, Handler};
use crate::method::Method;

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Registrations return `self` so they chain.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Endpoint>>,
}

/// Result of routing one request.
pub(crate) enum Route {
    Found(Endpoint, HashMap<String, String>),
    /// The path exists, but not for this method.
    WrongMethod(Vec<Method>),
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use vitrine::{Method, Request, Response, Router};
    /// # async fn show(_: Request) -> Response { Response::text("") }
    /// # async fn create(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::Get,  "/api/products/{id}", show)
    ///     .on(Method::Post, "/api/products",      create);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics on an invalid or conflicting path; routes are fixed at startup.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_endpoint())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Get, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Post, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Put, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Delete, path, handler)
    }

    pub(crate) fn lookup(&self, method: Method, path: &str) -> Route {
        if let Some(matched) = self.routes.get(&method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Route::Found(matched.value.clone(), params);
        }

        let allowed = self.allowed_methods(path);
        if allowed.is_empty() {
            return Route::NotFound;
        }
        Route::WrongMethod(allowed)
    }

    /// Methods registered for `path`, sorted by name. Empty if none match.
    pub(crate) fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut allowed: Vec<Method> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(m, _)| *m)
            .collect();
        allowed.sort_by_key(|m| m.as_str());
        allowed
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
