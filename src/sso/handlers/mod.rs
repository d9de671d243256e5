pub mod gateway;
pub mod health;
pub mod login;
pub mod logout;

use axum::{
    extract::{Request, State},
    http::{header::LOCATION, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use super::state::GatewayState;

pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Redirect plain HTTP to the public URL when it is served over HTTPS.
pub async fn require_tls(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let config = state.config();
    if config.requires_tls() && !is_https(&request) {
        debug!("redirecting insecure request to {}", config.public_url());
        return found(config.public_url().as_str());
    }
    next.run(request).await
}

fn is_https(request: &Request) -> bool {
    request.uri().scheme_str() == Some("https")
        || request
            .headers()
            .get("x-forwarded-proto")
            .is_some_and(|value| value.as_bytes() == b"https")
}
