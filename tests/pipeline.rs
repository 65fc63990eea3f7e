//! End-to-end: middleware stack, error boundary and wire shape together.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::DateTime;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use vitrine::middleware::{Cors, MethodGuard, Middleware, RateLimit};
use vitrine::{
    ApiError, DatabaseError, Endpoint, Environment, ErrorBoundary, Failure, Json, ManualClock,
    Method, Request, Response, compose,
};

const ORIGIN: &str = "https://shop.example";

#[derive(serde::Deserialize)]
struct NewProduct {
    name: Option<String>,
}

async fn create_product(req: Request) -> Result<Json<Value>, Failure> {
    let product: NewProduct = req.json()?;
    match product.name.as_deref() {
        None | Some("") => Err(ApiError::required_field("name").into()),
        Some("Existing Mug") => Err(DatabaseError::UniqueViolation { target: vec!["name".into()] }.into()),
        Some(name) => Ok(Json(json!({ "name": name }))),
    }
}

async fn explode(_req: Request) -> Result<Response, Failure> {
    Err(Failure::other(std::io::Error::other("disk quota exceeded on /var/lib/shop")))
}

struct Stack {
    endpoint: Endpoint,
    calls: Arc<AtomicUsize>,
    clock: ManualClock,
}

fn stack(environment: Environment, max_requests: u32) -> Stack {
    let boundary = ErrorBoundary::new(environment);
    let clock = ManualClock::new(DateTime::from_timestamp_millis(1_700_000_000_000).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = {
        let calls = Arc::clone(&calls);
        let inner = boundary.wrap(create_product);
        Endpoint::new(move |req: Request| {
            calls.fetch_add(1, Ordering::SeqCst);
            inner.call(req)
        })
    };

    let endpoint = compose![
        RateLimit::in_memory(max_requests, Duration::from_secs(60))
            .with_clock(clock.clone())
            .with_boundary(boundary),
        Cors::new([ORIGIN]),
        MethodGuard::new(&[Method::Post, Method::Options]).with_boundary(boundary),
    ]
    .wrap(counted);

    Stack { endpoint, calls, clock }
}

fn post(body: &str) -> Request {
    Request::builder(Method::Post, "/api/products")
        .header("Origin", ORIGIN)
        .header("X-Forwarded-For", "203.0.113.7")
        .body(body.as_bytes().to_vec())
        .build()
}

fn json_body(res: &Response) -> Value {
    serde_json::from_slice(res.body()).unwrap()
}

#[tokio::test]
async fn success_carries_cors_headers() {
    let s = stack(Environment::Development, 10);

    let res = s.endpoint.call(post(r#"{"name":"Poster"}"#)).await;

    assert_eq!(res.status_code(), 200);
    assert_eq!(json_body(&res), json!({ "name": "Poster" }));
    assert_eq!(res.header("access-control-allow-origin"), Some(ORIGIN));
}

#[tokio::test]
async fn handler_failure_has_full_error_shape() {
    let s = stack(Environment::Development, 10);

    let res = s.endpoint.call(post(r#"{"name":"Existing Mug"}"#)).await;

    assert_eq!(res.status_code(), 409);
    assert_eq!(res.header("content-type"), Some("application/json"));
    let body = json_body(&res);
    assert_eq!(body["error"], json!("A record with this information already exists"));
    assert_eq!(body["type"], json!("CONFLICT_ERROR"));
    assert_eq!(body["path"], json!("/api/products"));
    assert_eq!(body["details"], json!({ "field": ["name"] }));
    assert!(body["requestId"].as_str().unwrap().starts_with("req_"));
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    // CORS still decorates error responses from inner layers.
    assert_eq!(res.header("access-control-allow-origin"), Some(ORIGIN));
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let s = stack(Environment::Development, 10);

    let res = s.endpoint.call(post("{not json")).await;

    assert_eq!(res.status_code(), 400);
    assert_eq!(json_body(&res)["type"], json!("VALIDATION_ERROR"));
}

#[tokio::test]
async fn production_hides_details_but_keeps_message() {
    let s = stack(Environment::Production, 10);

    let res = s.endpoint.call(post("{}")).await;

    assert_eq!(res.status_code(), 400);
    let body = json_body(&res);
    assert_eq!(body["error"], json!("name is required"));
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn production_masks_unclassified_failures() {
    let boundary = ErrorBoundary::new(Environment::Production);
    let endpoint = boundary.wrap(explode);

    let res = endpoint.call(Request::builder(Method::Get, "/api/reports").build()).await;

    assert_eq!(res.status_code(), 500);
    let body = json_body(&res);
    assert_eq!(body["error"], json!("Internal server error"));
    assert_eq!(body["type"], json!("INTERNAL_SERVER_ERROR"));
    assert!(!res.body().windows(5).any(|w| w == b"quota"));
}

#[tokio::test]
async fn development_shows_unclassified_message() {
    let endpoint = ErrorBoundary::new(Environment::Development).wrap(explode);

    let res = endpoint.call(Request::builder(Method::Get, "/api/reports").build()).await;

    assert_eq!(json_body(&res)["error"], json!("disk quota exceeded on /var/lib/shop"));
}

#[tokio::test]
async fn rate_limit_short_circuits_every_later_layer() {
    let s = stack(Environment::Development, 2);

    for _ in 0..2 {
        assert_eq!(s.endpoint.call(post(r#"{"name":"Poster"}"#)).await.status_code(), 200);
    }
    let res = s.endpoint.call(post(r#"{"name":"Poster"}"#)).await;

    assert_eq!(res.status_code(), 429);
    assert_eq!(res.header("retry-after"), Some("60"));
    // Rate limiting sits outside CORS, so the rejection is undecorated.
    assert_eq!(res.header("access-control-allow-origin"), None);
    assert_eq!(s.calls.load(Ordering::SeqCst), 2);

    s.clock.advance_millis(60_001);
    assert_eq!(s.endpoint.call(post(r#"{"name":"Poster"}"#)).await.status_code(), 200);
}

#[tokio::test]
async fn preflight_never_reaches_method_guard_or_handler() {
    let s = stack(Environment::Development, 10);

    let req = Request::builder(Method::Options, "/api/products").header("Origin", ORIGIN).build();
    let res = s.endpoint.call(req).await;

    assert_eq!(res.status_code(), 200);
    assert!(res.body().is_empty());
    assert_eq!(res.header("access-control-allow-methods"), Some("GET, POST, PUT, DELETE, OPTIONS"));
    assert_eq!(s.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disallowed_method_is_rejected_inside_cors() {
    let s = stack(Environment::Production, 10);

    let req = Request::builder(Method::Delete, "/api/products").header("Origin", ORIGIN).build();
    let res = s.endpoint.call(req).await;

    assert_eq!(res.status_code(), 405);
    assert_eq!(res.header("allow"), Some("POST, OPTIONS"));
    assert_eq!(res.header("access-control-allow-origin"), Some(ORIGIN));
    let body = json_body(&res);
    assert_eq!(body["error"], json!("Method DELETE not allowed"));
    assert_eq!(body["allowedMethods"], json!(["POST", "OPTIONS"]));
    assert_eq!(s.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn every_failure_gets_a_distinct_request_id() {
    let s = stack(Environment::Development, 10);

    let a = json_body(&s.endpoint.call(post("{}")).await);
    let b = json_body(&s.endpoint.call(post("{}")).await);

    assert_ne!(a["requestId"], b["requestId"]);
}
