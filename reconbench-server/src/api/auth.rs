use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::{error::ApiError, ApiContextRef};

/// The custom header for API key authentication
const X_API_KEY_HEADER: &str = "X-API-Key";

/// Reject requests without the configured API key. Open when no key is configured.
pub async fn require_api_key(
    State(context): State<ApiContextRef>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = context.config.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(X_API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if provided == Some(expected) {
        debug!("API key authentication successful via X-API-Key header");
        return Ok(next.run(req).await);
    }

    warn!(path = %req.uri().path(), "Authentication failed: No valid API key provided");
    Err(ApiError::AuthenticationFailed)
}
