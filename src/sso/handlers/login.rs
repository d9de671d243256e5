use axum::{
    extract::{Form, State},
    http::{HeaderName, HeaderValue, Method},
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

use super::found;
use crate::sso::{
    cookies::{session_cookie, set_cookie},
    error::Error,
    session::Session,
    state::GatewayState,
};

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    sso_token: String,
}

/// Exchange an API token for a session cookie.
///
/// Only `POST` bodies are read; any other method, or an empty token, sends
/// the browser back to `/` for another handshake.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    form: Option<Form<LoginForm>>,
) -> Response {
    let token = match (method, form) {
        (Method::POST, Some(Form(form))) => form.sso_token,
        _ => String::new(),
    };

    if token.is_empty() {
        info!("no token found, try again");
        return found("/");
    }

    match authenticate(&state, token).await {
        Ok(cookie) => {
            info!("cookies set, redirecting back");
            (cookie, found("/")).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn authenticate(
    state: &GatewayState,
    token: String,
) -> Result<AppendHeaders<[(HeaderName, HeaderValue); 1]>, Error> {
    let identity = state.identity().resolve(&token).await?;

    if !state.policy().is_authorized(&identity) {
        return Err(Error::Unauthorized(identity.login));
    }

    let session = Session { identity, token };
    let sealed = state.codec().seal(&session)?;
    set_cookie(&session_cookie(state.config(), sealed))
}
