//! Built-in health-check handlers.
//!
//! | Handler | Typical path | Answer |
//! |---|---|---|
//! | [`status`] | `/api/health` | `{"message":"Server is running!","timestamp":…}` |
//! | [`liveness`] | `/healthz` | `ok` while the process can answer HTTP |
//! | [`readiness`] | `/readyz` | `ready`; replace it to gate on dependencies |
//!
//! ```rust,no_run
//! use vitrine::{Router, health};
//!
//! let app = Router::new()
//!     .get("/api/health", health::status)
//!     .get("/healthz", health::liveness)
//!     .get("/readyz", health::readiness);
//! ```

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::request::Request;
use crate::response::{Json, Response};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub message: &'static str,
    pub timestamp: String,
}

/// JSON status probe with the current server time.
pub async fn status(_req: Request) -> Json<HealthStatus> {
    Json(HealthStatus {
        message: "Server is running!",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Always `200 ok`. No dependencies, so it only fails if the process does.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

pub async fn readiness(_req: Request) -> Response {
    Response::text("ready")
}
