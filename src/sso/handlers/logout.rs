use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, Method},
    response::{IntoResponse, Response},
    Extension,
};
use std::sync::Arc;
use tracing::info;

use crate::sso::{
    cookies::{clear_session_cookie, set_cookie},
    csrf::{CsrfToken, FIELD_NAME},
    render::escape_html,
    state::GatewayState,
};

/// `GET` shows a one-button form, `POST` drops the session cookie.
pub async fn logout(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    Extension(csrf): Extension<CsrfToken>,
) -> Response {
    if method != Method::POST {
        return (
            [(CONTENT_TYPE, "text/html; charset=utf-8")],
            logout_form(&csrf),
        )
            .into_response();
    }

    match set_cookie(&clear_session_cookie(state.config())) {
        Ok(clear) => {
            info!("session cookie cleared");
            (clear, "logged out").into_response()
        }
        Err(err) => err.into_response(),
    }
}

fn logout_form(csrf: &CsrfToken) -> String {
    format!(
        concat!(
            r#"<form method="POST" action="/sso/logout">"#,
            r#"<input type="hidden" name="{}" value="{}">"#,
            r#"<input type="submit" value="logout">"#,
            "</form>"
        ),
        FIELD_NAME,
        escape_html(csrf.as_str())
    )
}
