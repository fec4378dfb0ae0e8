use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::ApiContextRef;

pub fn router() -> Router<ApiContextRef> {
    Router::new().route("/", get(liveness))
}

/// Liveness payload for container orchestration.
#[derive(Serialize)]
struct Liveness {
    status: &'static str,
    /// Unix seconds with sub-second precision.
    timestamp: f64,
}

async fn liveness() -> Json<Liveness> {
    let timestamp = Utc::now().timestamp_micros() as f64 / 1_000_000.0;

    Json(Liveness {
        status: "healthy",
        timestamp,
    })
}
