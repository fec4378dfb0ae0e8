use axum::{extract::DefaultBodyLimit, Router};
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use crate::ApiContextRef;

mod auth;
mod extract;
mod health;
mod jobs;
mod legacy;
mod tools;
mod uploads;

/// Largest accepted request body; image uploads dominate.
const BODY_LIMIT_BYTES: usize = 1024 * 1024 * 1024;

pub fn router(context: ApiContextRef) -> Router<ApiContextRef> {
    let public_routes = Router::new().nest("/api/health", health::router());

    let protected_routes = Router::new()
        .merge(tools::router())
        .merge(jobs::router())
        .merge(uploads::router())
        .nest("/legacy", legacy::router())
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(axum::middleware::from_fn_with_state(
            context,
            auth::require_api_key,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http().on_failure(DefaultOnFailure::new().level(Level::ERROR)))
}
