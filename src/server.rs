//! HTTP host and graceful shutdown.
//!
//! The server owns the outermost error path. Requests that match no route
//! (`404`), match a path under another method (`405`), or carry a body the
//! connection could not deliver (`400`) or that exceeds the body limit
//! (`413`) are rejected through the [`ErrorBoundary`], so they get the same
//! correlated JSON body as handler failures. A handler that runs past the
//! request timeout is answered with `408`.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. Stops `listener.accept()` so no new connections are made.
//! 2. Gives in-flight connection tasks up to ten seconds to finish.
//! 3. Aborts whatever is still open (idle keep-alive connections, stuck
//!    handlers) and returns from [`Server::serve`].

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::api_error::ApiError;
use crate::boundary::ErrorBoundary;
use crate::config::Config;
use crate::error::Error;
use crate::method::Method;
use crate::request::{Request, client_ip, find_header};
use crate::request_log::RequestContext;
use crate::response::Response;
use crate::router::{Route, Router};
use crate::status::Status;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The HTTP server.
#[derive(Debug)]
pub struct Server {
    addr: SocketAddr,
    boundary: ErrorBoundary,
    request_timeout: Duration,
    max_body_bytes: usize,
}

/// Everything a connection task needs, shared behind one `Arc`.
struct App {
    router: Router,
    boundary: ErrorBoundary,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use vitrine::Server;
    /// let server = Server::bind("0.0.0.0:3000")?;
    /// # Ok::<(), vitrine::Error>(())
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| Error::InvalidAddress(addr.to_owned()))?;
        Ok(Self {
            addr,
            boundary: ErrorBoundary::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    /// Address, environment, request timeout and body limit taken from
    /// `config`.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Ok(Self::bind(&config.bind_addr())?
            .with_boundary(ErrorBoundary::new(config.environment))
            .with_request_timeout(config.request_timeout)
            .with_max_body_bytes(config.max_body_bytes))
    }

    pub fn with_boundary(mut self, boundary: ErrorBoundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bodies longer than `limit` bytes are answered with `413`.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Returns after SIGTERM or Ctrl-C, once in-flight connections have
    /// finished or the shutdown grace period has run out.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let app = Arc::new(App {
            router,
            boundary: self.boundary,
            request_timeout: self.request_timeout,
            max_body_bytes: self.max_body_bytes,
        });

        info!(
            addr = %self.addr,
            environment = ?self.boundary.environment(),
            "vitrine listening"
        );

        let mut tasks = JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown first, so a signal stops accepting even with a backlog.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { dispatch(&app, req, remote_addr).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished tasks so the set stays bounded.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        let aborted = drain(&mut tasks, SHUTDOWN_GRACE).await;
        if aborted > 0 {
            warn!(aborted, grace = ?SHUTDOWN_GRACE, "connections still open after grace period, aborted");
        }

        info!("vitrine stopped");
        Ok(())
    }
}

/// Waits up to `grace` for every task, then aborts the rest. Returns how
/// many were aborted.
async fn drain(tasks: &mut JoinSet<()>, grace: Duration) -> usize {
    let finished = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if finished.is_ok() {
        return 0;
    }

    let remaining = tasks.len();
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    remaining
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Converts one hyper request, routes it and converts the answer back.
///
/// Never returns `Err`: every failure becomes a response here.
async fn dispatch<B>(
    app: &App,
    req: http::Request<B>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();

    let uri = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_owned(), |pq| pq.as_str().to_owned());
    let headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();

    let method = match parts.method.as_str().parse::<Method>() {
        Ok(method) => method,
        Err(_) => {
            let ctx = RequestContext {
                method: parts.method.as_str().to_owned(),
                user_agent: find_header(&headers, "user-agent").map(str::to_owned),
                client_ip: client_ip(&headers, Some(remote_addr)),
                url: uri,
            };
            let allowed = app.router.allowed_methods(parts.uri.path());
            let err = if allowed.is_empty() {
                ApiError::not_found("Route")
            } else {
                ApiError::method_not_allowed(parts.method.as_str(), &allowed)
            };
            return Ok(app.boundary.reject(&ctx, err).into_inner());
        }
    };

    let mut request = Request {
        method,
        uri,
        headers,
        body: Vec::new(),
        params: HashMap::new(),
        remote_addr: Some(remote_addr),
    };

    match read_body(body, app.max_body_bytes).await {
        Ok(bytes) => request.body = bytes,
        Err(err) => {
            let ctx = RequestContext::from_request(&request);
            return Ok(app.boundary.reject(&ctx, err).into_inner());
        }
    }

    Ok(respond(app, request).await.into_inner())
}

/// Buffers at most `limit` bytes of `body`.
async fn read_body<B>(body: B, limit: usize) -> Result<Vec<u8>, ApiError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes().to_vec()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ApiError::payload_too_large(limit))
        }
        Err(e) => {
            warn!("failed to read request body: {e}");
            Err(ApiError::validation("Failed to read request body"))
        }
    }
}

/// Routes a fully-read request and runs its endpoint under the timeout.
async fn respond(app: &App, req: Request) -> Response {
    match app.router.lookup(req.method(), req.path()) {
        Route::Found(endpoint, params) => {
            let url = req.uri().to_owned();
            match tokio::time::timeout(app.request_timeout, endpoint.call(req.with_params(params))).await {
                Ok(response) => response,
                Err(_) => {
                    warn!(url = %url, timeout = ?app.request_timeout, "request timed out");
                    timeout_response()
                }
            }
        }
        Route::WrongMethod(allowed) => {
            let ctx = RequestContext::from_request(&req);
            app.boundary.reject(&ctx, ApiError::method_not_allowed(req.method(), &allowed))
        }
        Route::NotFound => {
            let ctx = RequestContext::from_request(&req);
            app.boundary.reject(&ctx, ApiError::not_found("Route"))
        }
    }
}

fn timeout_response() -> Response {
    Response::builder()
        .status(Status::RequestTimeout)
        .json(br#"{"error":"Request timeout"}"#.to_vec())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C only on Windows).
///
/// If a signal handler cannot be installed that arm never fires; the other
/// still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use super::*;
    use crate::failure::{DatabaseError, Failure};

    async fn show(req: Request) -> Result<String, Failure> {
        match req.param("id") {
            Some("42") => Ok("product 42".into()),
            _ => Err(DatabaseError::RecordNotFound.into()),
        }
    }

    async fn slow(_req: Request) -> &'static str {
        tokio::time::sleep(Duration::from_secs(60)).await;
        "late"
    }

    fn app(timeout: Duration) -> App {
        let boundary = ErrorBoundary::default();
        App {
            router: Router::new()
                .get("/api/products/{id}", boundary.wrap(show))
                .get("/slow", slow),
            boundary,
            request_timeout: timeout,
            max_body_bytes: 16,
        }
    }

    fn body(res: &Response) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    fn peer() -> SocketAddr {
        "203.0.113.7:52100".parse().unwrap()
    }

    async fn send(app: &App, method: &str, uri: &str, payload: &'static str) -> http::Response<Full<Bytes>> {
        let req = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from_static(payload.as_bytes())))
            .unwrap();
        dispatch(app, req, peer()).await.unwrap()
    }

    async fn json_of(res: http::Response<Full<Bytes>>) -> Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn routes_with_params() {
        let res = respond(&app(DEFAULT_REQUEST_TIMEOUT), Request::builder(Method::Get, "/api/products/42").build()).await;

        assert_eq!(res.status_code(), 200);
        assert_eq!(res.body(), b"product 42");
    }

    #[tokio::test]
    async fn handler_failure_is_structured() {
        let res = respond(&app(DEFAULT_REQUEST_TIMEOUT), Request::builder(Method::Get, "/api/products/7").build()).await;

        assert_eq!(res.status_code(), 404);
        let body = body(&res);
        assert_eq!(body["type"], json!("NOT_FOUND_ERROR"));
        assert_eq!(body["path"], json!("/api/products/7"));
    }

    #[tokio::test]
    async fn unknown_route_is_404_with_request_id() {
        let res = respond(&app(DEFAULT_REQUEST_TIMEOUT), Request::builder(Method::Get, "/nope?q=1").build()).await;

        assert_eq!(res.status_code(), 404);
        let body = body(&res);
        assert_eq!(body["error"], json!("Route not found"));
        assert!(body["requestId"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow() {
        let res = respond(&app(DEFAULT_REQUEST_TIMEOUT), Request::builder(Method::Delete, "/slow").build()).await;

        assert_eq!(res.status_code(), 405);
        assert_eq!(res.header("allow"), Some("GET"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let res = respond(&app(Duration::from_secs(5)), Request::builder(Method::Get, "/slow").build()).await;

        assert_eq!(res.status_code(), 408);
        assert_eq!(body(&res), json!({ "error": "Request timeout" }));
    }

    #[tokio::test]
    async fn body_within_limit_reaches_the_handler() {
        let res = send(&app(DEFAULT_REQUEST_TIMEOUT), "GET", "/api/products/42", "sixteen bytes!!!").await;
        assert_eq!(res.status(), 200);
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let res = send(&app(DEFAULT_REQUEST_TIMEOUT), "GET", "/api/products/42", "seventeen bytes!!").await;

        assert_eq!(res.status(), 413);
        let body = json_of(res).await;
        assert_eq!(body["type"], json!("VALIDATION_ERROR"));
        assert_eq!(body["error"], json!("Request body too large"));
        assert_eq!(body["details"], json!({ "limitBytes": 16 }));
        assert!(body["requestId"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn unknown_method_token_gets_allow_header() {
        let res = send(&app(DEFAULT_REQUEST_TIMEOUT), "PURGE", "/api/products/42", "").await;

        assert_eq!(res.status(), 405);
        assert_eq!(res.headers().get("allow").unwrap(), "GET");
        let body = json_of(res).await;
        assert_eq!(body["error"], json!("Method PURGE not allowed"));
        assert_eq!(body["allowedMethods"], json!(["GET"]));
    }

    #[tokio::test]
    async fn unknown_method_on_unknown_path_is_404() {
        let res = send(&app(DEFAULT_REQUEST_TIMEOUT), "PURGE", "/nope", "").await;
        assert_eq!(res.status(), 404);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_connections_left_after_grace() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {});
        tasks.spawn(std::future::pending::<()>());

        assert_eq!(drain(&mut tasks, SHUTDOWN_GRACE).await, 1);
        assert!(tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_returns_early_when_idle() {
        let mut tasks = JoinSet::new();
        tasks.spawn(tokio::time::sleep(Duration::from_secs(1)));

        assert_eq!(drain(&mut tasks, SHUTDOWN_GRACE).await, 0);
    }

    #[test]
    fn bind_rejects_bad_address() {
        assert!(matches!(Server::bind("not-an-addr"), Err(Error::InvalidAddress(a)) if a == "not-an-addr"));
    }
}
