//! Method allow-list.

use std::sync::Arc;

use crate::api_error::ApiError;
use crate::boundary::ErrorBoundary;
use crate::handler::Endpoint;
use crate::method::Method;
use crate::request::Request;
use crate::request_log::RequestContext;

use super::Middleware;

/// Answers `405` with an `Allow` header for any method outside the list.
#[derive(Debug, Clone)]
pub struct MethodGuard {
    allowed: Arc<[Method]>,
    boundary: ErrorBoundary,
}

impl MethodGuard {
    pub fn new(allowed: &[Method]) -> Self {
        Self { allowed: allowed.into(), boundary: ErrorBoundary::default() }
    }

    pub fn with_boundary(mut self, boundary: ErrorBoundary) -> Self {
        self.boundary = boundary;
        self
    }
}

impl Middleware for MethodGuard {
    fn wrap(&self, inner: Endpoint) -> Endpoint {
        let allowed = Arc::clone(&self.allowed);
        let boundary = self.boundary;
        Endpoint::new(move |req: Request| {
            let inner = inner.clone();
            let allowed = Arc::clone(&allowed);
            async move {
                let method = req.method();
                if !allowed.contains(&method) {
                    let ctx = RequestContext::from_request(&req);
                    return boundary.reject(&ctx, ApiError::method_not_allowed(method, &allowed));
                }
                inner.call(req).await
            }
        })
    }
}
