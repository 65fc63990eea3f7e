//! A small product catalogue served through the full middleware stack.
//!
//! ```text
//! cargo run --example storefront
//! curl -s localhost:3000/api/products
//! curl -s -XPOST localhost:3000/api/products -d '{"name":"Mug","price":1200}'
//! curl -s -XPOST localhost:3000/api/products -d '{"name":"Mug","price":1200}'   # 409
//! curl -s localhost:3000/api/products/99                                         # 404
//! curl -s -XPATCH localhost:3000/api/products                                    # 405
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use vitrine::middleware::{Cors, MethodGuard, Middleware, RateLimit};
use vitrine::telemetry::{self, TracingConfig};
use vitrine::{
    ApiError, Clock, Config, DatabaseError, Endpoint, ErrorBoundary, Failure, Json, Method,
    Request, Response, Router, Server, Status, SystemClock, compose, health,
};

#[derive(Debug, Clone, Serialize)]
struct Product {
    id: u64,
    name: String,
    price: u64,
}

#[derive(Debug, Deserialize)]
struct NewProduct {
    name: Option<String>,
    price: Option<u64>,
}

#[derive(Default)]
struct Catalogue {
    next_id: AtomicU64,
    products: Mutex<HashMap<u64, Product>>,
}

impl Catalogue {
    fn list(&self) -> Vec<Product> {
        let products = self.products.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Product> = products.values().cloned().collect();
        all.sort_by_key(|p| p.id);
        all
    }

    fn find(&self, id: u64) -> Result<Product, DatabaseError> {
        let products = self.products.lock().unwrap_or_else(PoisonError::into_inner);
        products.get(&id).cloned().ok_or(DatabaseError::RecordNotFound)
    }

    fn insert(&self, name: String, price: u64) -> Result<Product, DatabaseError> {
        let mut products = self.products.lock().unwrap_or_else(PoisonError::into_inner);
        if products.values().any(|p| p.name.eq_ignore_ascii_case(&name)) {
            return Err(DatabaseError::UniqueViolation { target: vec!["name".into()] });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let product = Product { id, name, price };
        products.insert(id, product.clone());
        Ok(product)
    }
}

async fn list_products(catalogue: Arc<Catalogue>) -> Result<Json<Vec<Product>>, Failure> {
    Ok(Json(catalogue.list()))
}

async fn show_product(catalogue: Arc<Catalogue>, req: Request) -> Result<Json<Product>, Failure> {
    let id = req
        .param("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| ApiError::validation("Product id must be a number"))?;
    Ok(Json(catalogue.find(id)?))
}

async fn create_product(catalogue: Arc<Catalogue>, req: Request) -> Result<Response, Failure> {
    let input: NewProduct = req.json()?;
    let name = input
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::required_field("name"))?;
    let price = input.price.ok_or_else(|| ApiError::required_field("price"))?;

    let product = catalogue.insert(name, price)?;
    let body = serde_json::to_vec(&product).map_err(Failure::other)?;
    Ok(Response::builder()
        .status(Status::Created)
        .header("location", &format!("/api/products/{}", product.id))
        .json(body))
}

#[tokio::main]
async fn main() -> Result<(), vitrine::Error> {
    let config = Config::from_env()?;
    telemetry::init(TracingConfig::from_env());

    let boundary = ErrorBoundary::new(config.environment);
    let catalogue = Arc::new(Catalogue::default());

    let limiter = RateLimit::from_config(&config.rate_limit).with_boundary(boundary);
    let store = Arc::clone(limiter.store());
    let stack = compose![
        limiter,
        Cors::new(config.cors_allowed_origins.clone()),
        MethodGuard::new(&[Method::Get, Method::Post, Method::Options]).with_boundary(boundary),
    ];

    // Expired counters are otherwise only dropped when the store fills up.
    let sweep_every = config.rate_limit.window;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            let swept = store.sweep_expired(SystemClock.now_millis());
            if swept > 0 {
                tracing::debug!(swept, "dropped expired rate-limit counters");
            }
        }
    });

    let collection: Endpoint = stack.wrap(Endpoint::new({
        let list = {
            let catalogue = Arc::clone(&catalogue);
            boundary.wrap(move |_req: Request| list_products(Arc::clone(&catalogue)))
        };
        let create = {
            let catalogue = Arc::clone(&catalogue);
            boundary.wrap(move |req: Request| create_product(Arc::clone(&catalogue), req))
        };
        move |req: Request| match req.method() {
            Method::Post => create.call(req),
            _ => list.call(req),
        }
    }));

    let item: Endpoint = stack.wrap({
        let catalogue = Arc::clone(&catalogue);
        boundary.wrap(move |req: Request| show_product(Arc::clone(&catalogue), req))
    });

    let mut app = Router::new().get("/api/health", health::status);
    for method in [Method::Get, Method::Post, Method::Options, Method::Put, Method::Delete, Method::Patch] {
        app = app
            .on(method, "/api/products", collection.clone())
            .on(method, "/api/products/{id}", item.clone());
    }

    Server::from_config(&config)?.serve(app).await
}
