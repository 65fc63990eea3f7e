//! Cross-origin headers and preflight handling.

use std::sync::Arc;

use crate::handler::Endpoint;
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

use super::Middleware;

const DEFAULT_METHODS: &[Method] =
    &[Method::Get, Method::Post, Method::Put, Method::Delete, Method::Options];
const DEFAULT_HEADERS: &[&str] = &["Content-Type", "Authorization"];

#[derive(Debug, Clone)]
struct Settings {
    origins: Vec<String>,
    methods: String,
    headers: String,
    credentials: bool,
}

/// Adds CORS headers to every response and answers `OPTIONS` preflights
/// with `200` without calling the inner endpoint.
///
/// `Access-Control-Allow-Origin` echoes the request's `Origin` only when it
/// is on the allow-list; the other three headers are always set.
#[derive(Debug, Clone)]
pub struct Cors {
    settings: Arc<Settings>,
}

impl Cors {
    /// Allow-listed origins with `GET, POST, PUT, DELETE, OPTIONS`,
    /// `Content-Type, Authorization` and credentials enabled.
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            settings: Arc::new(Settings {
                origins: origins.into_iter().map(Into::into).collect(),
                methods: Method::join(DEFAULT_METHODS),
                headers: DEFAULT_HEADERS.join(", "),
                credentials: true,
            }),
        }
    }

    pub fn allow_methods(self, methods: &[Method]) -> Self {
        self.update(|s| s.methods = Method::join(methods))
    }

    pub fn allow_headers(self, headers: &[&str]) -> Self {
        self.update(|s| s.headers = headers.join(", "))
    }

    pub fn allow_credentials(self, allow: bool) -> Self {
        self.update(|s| s.credentials = allow)
    }

    fn update(self, f: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = Arc::unwrap_or_clone(self.settings);
        f(&mut settings);
        Self { settings: Arc::new(settings) }
    }
}

impl Settings {
    fn apply(&self, res: &mut Response, origin: Option<&str>) {
        if let Some(origin) = origin {
            res.set_header("access-control-allow-origin", origin);
            res.set_header("vary", "Origin");
        }
        res.set_header("access-control-allow-methods", self.methods.as_str());
        res.set_header("access-control-allow-headers", self.headers.as_str());
        res.set_header("access-control-allow-credentials", self.credentials.to_string());
    }
}

impl Middleware for Cors {
    fn wrap(&self, inner: Endpoint) -> Endpoint {
        let settings = Arc::clone(&self.settings);
        Endpoint::new(move |req: Request| {
            let inner = inner.clone();
            let settings = Arc::clone(&settings);
            async move {
                let origin = req
                    .header("origin")
                    .filter(|o| settings.origins.iter().any(|allowed| allowed == o))
                    .map(str::to_owned);

                let mut res = if req.method() == Method::Options {
                    Response::builder().status(Status::Ok).no_body()
                } else {
                    inner.call(req).await
                };
                settings.apply(&mut res, origin.as_deref());
                res
            }
        })
    }
}
