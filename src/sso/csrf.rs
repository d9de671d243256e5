//! Double-submit CSRF protection.
//!
//! A random 32-byte token lives in the `travis.csrf` cookie, sealed with
//! HMAC-SHA256 under the CSRF key together with its issue time. Pages get a
//! masked copy (`otp || otp ^ token`) so the value embedded in HTML changes on
//! every response. Unsafe methods must send the masked token back in the
//! `authenticity_token` form field or the `X-CSRF-Token` header.

use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Request, State},
    http::{
        header::{CONTENT_TYPE, SET_COOKIE, VARY},
        HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretSlice};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use super::{error::Error, state::GatewayState};

pub const COOKIE_NAME: &str = "travis.csrf";
pub const FIELD_NAME: &str = "authenticity_token";
pub const HEADER_NAME: &str = "x-csrf-token";

const TOKEN_LEN: usize = 32;
const TIMESTAMP_LEN: usize = 8;
const TAG_LEN: usize = 32;
const MAX_AGE_SECONDS: i64 = 12 * 60 * 60;

/// Largest urlencoded body the guard buffers to look for the token.
pub const MAX_FORM_BYTES: usize = 10 * 1024 * 1024;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum CsrfError {
    #[error("CSRF cookie invalid")]
    InvalidCookie,
    #[error("CSRF cookie expired")]
    Expired,
    #[error("CSRF token not found in request")]
    TokenMissing,
    #[error("CSRF token invalid")]
    TokenMismatch,
    #[error("request body could not be read")]
    Body,
    #[error("CSRF key rejected")]
    Key,
    #[error("failed to read from the system random source")]
    Entropy,
}

/// Masked token for the current request, placed in request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrfToken(String);

impl CsrfToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
pub struct CsrfGuard {
    key: SecretSlice<u8>,
    domain: String,
    secure: bool,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(key: &[u8], domain: String, secure: bool) -> Self {
        Self {
            key: SecretSlice::from(key.to_vec()),
            domain,
            secure,
        }
    }

    fn mac(&self, issued_at: i64, token: &[u8]) -> Result<HmacSha256, CsrfError> {
        let mut mac =
            HmacSha256::new_from_slice(self.key.expose_secret()).map_err(|_| CsrfError::Key)?;
        mac.update(COOKIE_NAME.as_bytes());
        mac.update(&issued_at.to_be_bytes());
        mac.update(token);
        Ok(mac)
    }

    /// Cookie value: `base64(issued_at || token || hmac)`.
    ///
    /// # Errors
    /// Returns an error if the MAC cannot be keyed.
    pub fn seal(&self, token: &[u8; TOKEN_LEN], issued_at: i64) -> Result<String, CsrfError> {
        let tag = self.mac(issued_at, token)?.finalize().into_bytes();

        let mut raw = Vec::with_capacity(TIMESTAMP_LEN + TOKEN_LEN + TAG_LEN);
        raw.extend_from_slice(&issued_at.to_be_bytes());
        raw.extend_from_slice(token);
        raw.extend_from_slice(&tag);
        Ok(Base64::encode_string(&raw))
    }

    /// Verify a cookie value and return the real token.
    ///
    /// # Errors
    /// Returns [`CsrfError::InvalidCookie`] on bad encoding or MAC, and
    /// [`CsrfError::Expired`] once the token is older than 12 hours.
    pub fn open(&self, value: &str, now: i64) -> Result<[u8; TOKEN_LEN], CsrfError> {
        let raw = Base64::decode_vec(value).map_err(|_| CsrfError::InvalidCookie)?;
        if raw.len() != TIMESTAMP_LEN + TOKEN_LEN + TAG_LEN {
            return Err(CsrfError::InvalidCookie);
        }

        let (timestamp, rest) = raw.split_at(TIMESTAMP_LEN);
        let (token_bytes, tag) = rest.split_at(TOKEN_LEN);

        let mut issued = [0u8; TIMESTAMP_LEN];
        issued.copy_from_slice(timestamp);
        let issued_at = i64::from_be_bytes(issued);

        self.mac(issued_at, token_bytes)?
            .verify_slice(tag)
            .map_err(|_| CsrfError::InvalidCookie)?;

        if now.saturating_sub(issued_at) > MAX_AGE_SECONDS || issued_at > now + 60 {
            return Err(CsrfError::Expired);
        }

        let mut token = [0u8; TOKEN_LEN];
        token.copy_from_slice(token_bytes);
        Ok(token)
    }

    /// Cookie carrying the sealed token, scoped like the session cookie.
    #[must_use]
    pub fn cookie(&self, sealed: String) -> Cookie<'static> {
        Cookie::build((COOKIE_NAME, sealed))
            .path("/")
            .domain(self.domain.clone())
            .secure(self.secure)
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(MAX_AGE_SECONDS))
            .build()
    }
}

/// Fresh random token.
///
/// # Errors
/// Returns [`CsrfError::Entropy`] if the random source fails.
pub fn random_bytes() -> Result<[u8; TOKEN_LEN], CsrfError> {
    let mut bytes = [0u8; TOKEN_LEN];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| CsrfError::Entropy)?;
    Ok(bytes)
}

/// Mask the real token with a one-time pad.
///
/// # Errors
/// Returns [`CsrfError::Entropy`] if the random source fails.
pub fn mask(token: &[u8; TOKEN_LEN]) -> Result<String, CsrfError> {
    let otp = random_bytes()?;
    let mut raw = Vec::with_capacity(TOKEN_LEN * 2);
    raw.extend_from_slice(&otp);
    raw.extend(otp.iter().zip(token.iter()).map(|(pad, byte)| pad ^ byte));
    Ok(Base64::encode_string(&raw))
}

#[must_use]
pub fn unmask(masked: &str) -> Option<[u8; TOKEN_LEN]> {
    let raw = Base64::decode_vec(masked.trim()).ok()?;
    if raw.len() != TOKEN_LEN * 2 {
        return None;
    }
    let (otp, sealed) = raw.split_at(TOKEN_LEN);
    let mut token = [0u8; TOKEN_LEN];
    for (slot, (pad, byte)) in token.iter_mut().zip(otp.iter().zip(sealed.iter())) {
        *slot = pad ^ byte;
    }
    Some(token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn is_form(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

/// Pull the submitted token from the header or the urlencoded body. Form
/// bodies are buffered up to the request's body limit and put back so
/// handlers can still read them; anything else streams through untouched.
async fn submitted_token(request: Request) -> Result<(Request, Option<String>), Error> {
    if let Some(token) = request
        .headers()
        .get(HEADER_NAME)
        .and_then(|value| value.to_str().ok())
    {
        let token = token.to_string();
        return Ok((request, Some(token)));
    }

    if !is_form(&request) {
        return Ok((request, None));
    }

    let (parts, body) = request.into_parts();
    let bytes = Bytes::from_request(Request::from_parts(parts.clone(), body), &())
        .await
        .map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                Error::PayloadTooLarge
            } else {
                Error::from(CsrfError::Body)
            }
        })?;
    let token = url::form_urlencoded::parse(&bytes)
        .find(|(name, _)| name == FIELD_NAME)
        .map(|(_, value)| value.into_owned());

    Ok((Request::from_parts(parts, Body::from(bytes)), token))
}

/// CSRF middleware wrapping every gateway route.
pub async fn protect(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    match check(&state, &jar, request).await {
        Ok((request, issued)) => {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .append(VARY, HeaderValue::from_static("Cookie"));
            if let Some(cookie) = issued {
                if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                    response.headers_mut().append(SET_COOKIE, value);
                }
            }
            response
        }
        Err(err) => err.into_response(),
    }
}

async fn check(
    state: &GatewayState,
    jar: &CookieJar,
    request: Request,
) -> Result<(Request, Option<Cookie<'static>>), Error> {
    let guard = state.csrf();
    let now = OffsetDateTime::now_utc().unix_timestamp();

    let existing = jar.get(COOKIE_NAME).and_then(|cookie| {
        guard
            .open(cookie.value(), now)
            .map_err(|err| debug!("discarding CSRF cookie: {err}"))
            .ok()
    });

    let (real, issued) = match existing {
        Some(token) => (token, None),
        None => {
            let token = random_bytes()?;
            let cookie = guard.cookie(guard.seal(&token, now)?);
            (token, Some(cookie))
        }
    };

    let mut request = if is_safe_method(request.method()) {
        request
    } else {
        if issued.is_some() {
            // No usable cookie means nothing to compare against.
            return Err(CsrfError::InvalidCookie.into());
        }
        let (request, submitted) = submitted_token(request).await?;
        let submitted = submitted.ok_or(CsrfError::TokenMissing)?;
        let candidate = unmask(&submitted).ok_or(CsrfError::TokenMismatch)?;
        if !constant_time_eq(&candidate, &real) {
            return Err(CsrfError::TokenMismatch.into());
        }
        request
    };

    request.extensions_mut().insert(CsrfToken(mask(&real)?));

    Ok((request, issued))
}
