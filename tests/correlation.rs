//! Every failed request writes exactly one correlation record, carrying the
//! request id the client sees.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use vitrine::middleware::{MethodGuard, Middleware, RateLimit};
use vitrine::{
    ApiError, DatabaseError, Environment, ErrorBoundary, Failure, Method, Request, RequestContext,
    Response,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    level: Level,
    message: String,
    request_id: Option<String>,
}

/// Layer that keeps every correlation event it sees.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<Record>>>);

impl Capture {
    fn take(&self) -> Vec<Record> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

#[derive(Default)]
struct Fields {
    message: String,
    request_id: Option<String>,
}

impl Visit for Fields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "request_id" => self.request_id = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

impl<S: Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields::default();
        event.record(&mut fields);
        if fields.message == "request failed" || fields.message == "request rejected" {
            self.0.lock().unwrap().push(Record {
                level: *event.metadata().level(),
                message: fields.message,
                request_id: fields.request_id,
            });
        }
    }
}

fn capture() -> (Capture, tracing::subscriber::DefaultGuard) {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    (capture, tracing::subscriber::set_default(subscriber))
}

fn request_id(res: &Response) -> String {
    let body: Value = serde_json::from_slice(res.body()).unwrap();
    body["requestId"].as_str().unwrap().to_owned()
}

/// Asserts one record for `res`, at `level`, with the body's request id.
fn assert_single_record(capture: &Capture, res: &Response, level: Level, message: &str) {
    let records = capture.take();
    assert_eq!(
        records,
        vec![Record { level, message: message.to_owned(), request_id: Some(request_id(res)) }]
    );
}

async fn lookup(req: Request) -> Result<&'static str, Failure> {
    match req.path() {
        "/api/products/1" => Ok("mug"),
        "/api/products/2" => Err(DatabaseError::RecordNotFound.into()),
        _ => Err(Failure::other(std::io::Error::other("connection reset"))),
    }
}

#[tokio::test]
async fn wrapped_handler_failures_log_once() {
    let (capture, _guard) = capture();
    let endpoint = ErrorBoundary::new(Environment::Production).wrap(lookup);

    let ok = endpoint.call(Request::builder(Method::Get, "/api/products/1").build()).await;
    assert_eq!(ok.status_code(), 200);
    assert!(capture.take().is_empty());

    let missing = endpoint.call(Request::builder(Method::Get, "/api/products/2").build()).await;
    assert_eq!(missing.status_code(), 404);
    assert_single_record(&capture, &missing, Level::WARN, "request rejected");

    let broken = endpoint.call(Request::builder(Method::Get, "/api/products/3").build()).await;
    assert_eq!(broken.status_code(), 500);
    assert_single_record(&capture, &broken, Level::ERROR, "request failed");
}

#[tokio::test]
async fn direct_rejection_logs_once() {
    let (capture, _guard) = capture();
    let ctx = RequestContext {
        method: "GET".into(),
        url: "/api/orders/9".into(),
        user_agent: Some("curl/8.5".into()),
        client_ip: "198.51.100.4".into(),
    };

    let res = ErrorBoundary::default().reject(&ctx, ApiError::forbidden());

    assert_eq!(res.status_code(), 403);
    assert_single_record(&capture, &res, Level::WARN, "request rejected");
}

#[tokio::test]
async fn rate_limit_rejection_logs_once() {
    let (capture, _guard) = capture();
    let endpoint = RateLimit::in_memory(1, Duration::from_secs(60))
        .wrap(ErrorBoundary::default().wrap(lookup));
    let req = || Request::builder(Method::Get, "/api/products/1").header("x-forwarded-for", "203.0.113.5").build();

    assert_eq!(endpoint.call(req()).await.status_code(), 200);
    let res = endpoint.call(req()).await;

    assert_eq!(res.status_code(), 429);
    assert_single_record(&capture, &res, Level::WARN, "request rejected");
}

#[tokio::test]
async fn method_guard_rejection_logs_once() {
    let (capture, _guard) = capture();
    let endpoint = MethodGuard::new(&[Method::Get]).wrap(ErrorBoundary::default().wrap(lookup));

    let res = endpoint.call(Request::builder(Method::Delete, "/api/products/1").build()).await;

    assert_eq!(res.status_code(), 405);
    assert_single_record(&capture, &res, Level::WARN, "request rejected");
}
