//! Request-level errors and their HTTP mapping.

use axum::{
    http::{
        header::{ALLOW, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use super::{
    csrf::CsrfError, identity::IdentityError, render::escape_html, render::RenderError,
    session::CodecError,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("access denied for user {0}")]
    Unauthorized(String),
    #[error("Forbidden - {0}")]
    CsrfRejected(#[from] CsrfError),
    #[error("must be <a href=\"{}\">GET</a> request", escape_html(.0))]
    MethodNotAllowed(String),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("invalid Set-Cookie header value")]
    Cookie(#[source] axum::http::header::InvalidHeaderValue),
    #[error("request body too large")]
    PayloadTooLarge,
    #[error("invalid Travis-State header value")]
    StateHeader(#[source] axum::http::header::InvalidHeaderValue),
    #[error("upstream request failed: {0}")]
    Forward(#[source] reqwest::Error),
    #[error("failed to relay message body")]
    Body,
}

impl Error {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) | Self::CsrfRejected(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Forward(_) => StatusCode::BAD_GATEWAY,
            Self::Codec(_)
            | Self::Identity(_)
            | Self::Render(_)
            | Self::Cookie(_)
            | Self::StateHeader(_)
            | Self::Body => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        } else {
            warn!("{self}");
        }

        let mut response = (status, format!("{self}\n")).into_response();
        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        if matches!(self, Self::MethodNotAllowed(_)) {
            headers.insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}
