//! Catch-all handler: proxy with a session, handshake without one.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method},
    response::{Html, IntoResponse, Response},
    Extension,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::sso::{
    cookies::{clear_session_cookie, set_cookie, SESSION_COOKIE_NAME},
    csrf::CsrfToken,
    error::Error,
    render::{LoginParams, LOGIN_TEMPLATE},
    session::Session,
    state::GatewayState,
};

pub const STATIC_BASE_PATH: &str = "/sso/static";

#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn handle_request(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    Extension(csrf): Extension<CsrfToken>,
    request: Request,
) -> Response {
    let Some(cookie) = jar.get(SESSION_COOKIE_NAME) else {
        return handshake(&state, &csrf, request).await.into_response();
    };

    match state.codec().open(cookie.value()) {
        Ok(session) => proxy(&state, &session, request).await.into_response(),
        Err(err) => {
            // A cookie we cannot read is dropped so the next visit starts over.
            match set_cookie(&clear_session_cookie(state.config())) {
                Ok(clear) => (clear, Error::from(err)).into_response(),
                Err(header_err) => header_err.into_response(),
            }
        }
    }
}

async fn proxy(state: &GatewayState, session: &Session, request: Request) -> Result<Response, Error> {
    debug!("proxying request for {}", session.identity.login);

    let json = serde_json::to_vec(session).map_err(|err| Error::Codec(err.into()))?;
    let value = HeaderValue::from_bytes(&json).map_err(Error::StateHeader)?;

    state.forwarder().forward(request, value).await
}

async fn handshake(
    state: &GatewayState,
    csrf: &CsrfToken,
    request: Request,
) -> Result<Html<String>, Error> {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return Err(Error::MethodNotAllowed(request.uri().to_string()));
    }

    let config = state.config();
    let params = LoginParams {
        static_base_path: STATIC_BASE_PATH.to_string(),
        identity_endpoint: without_trailing_slash(config.api_url().as_str()),
        origin_url: without_trailing_slash(config.public_url().as_str()),
        csrf_token: csrf.as_str().to_string(),
    };

    let html = state.renderer().render(LOGIN_TEMPLATE, &params).await?;
    Ok(Html(html))
}

fn without_trailing_slash(url: &str) -> String {
    url.strip_suffix('/').unwrap_or(url).to_string()
}
