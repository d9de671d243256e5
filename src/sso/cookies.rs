//! Session cookie construction.

use axum::{
    http::{header::SET_COOKIE, HeaderName, HeaderValue},
    response::AppendHeaders,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::{Duration, OffsetDateTime};

use super::{config::Config, error::Error};

pub const SESSION_COOKIE_NAME: &str = "travis.sso";

const SESSION_LIFETIME_DAYS: i64 = 365;

fn scoped(config: &Config, value: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, value))
        .path("/")
        .domain(config.cookie_domain())
        .http_only(true)
        .secure(config.requires_tls())
        .same_site(SameSite::Lax)
        .build()
}

/// Session cookie valid for a year.
#[must_use]
pub fn session_cookie(config: &Config, value: String) -> Cookie<'static> {
    let mut cookie = scoped(config, value);
    cookie.set_expires(OffsetDateTime::now_utc() + Duration::days(SESSION_LIFETIME_DAYS));
    cookie
}

/// Empty session cookie with the same scope, expired at the Unix epoch.
#[must_use]
pub fn clear_session_cookie(config: &Config) -> Cookie<'static> {
    let mut cookie = scoped(config, String::new());
    cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
    cookie
}

/// `Set-Cookie` header with the value written verbatim.
///
/// `CookieJar` percent-encodes values, which turns the base64 `/` and `=`
/// into escapes the codec cannot read back.
///
/// # Errors
/// Returns [`Error::Cookie`] if the cookie is not a valid header value.
pub fn set_cookie(
    cookie: &Cookie<'_>,
) -> Result<AppendHeaders<[(HeaderName, HeaderValue); 1]>, Error> {
    let value = HeaderValue::from_str(&cookie.to_string()).map_err(Error::Cookie)?;
    Ok(AppendHeaders([(SET_COOKIE, value)]))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sso::session::KEY_LEN;
    use url::Url;

    fn config(public: &str) -> Config {
        Config::new(
            Url::parse("http://127.0.0.1:8899").unwrap(),
            Url::parse("https://api.travis-ci.org").unwrap(),
            Url::parse(public).unwrap(),
            vec![1u8; KEY_LEN],
            vec![2u8; KEY_LEN],
            vec!["alice".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn session_cookie_scope() {
        let cookie = session_cookie(&config("https://sso.example.com:8443"), "v".to_string());
        assert_eq!(cookie.name(), SESSION_COOKIE_NAME);
        assert_eq!(cookie.value(), "v");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("sso.example.com"));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));

        let expires = cookie.expires_datetime().unwrap();
        assert!(expires > OffsetDateTime::now_utc() + Duration::days(364));
    }

    #[test]
    fn set_cookie_keeps_base64_verbatim() {
        let cookie = session_cookie(&config("http://localhost:8888"), "a+b/c==".to_string());
        let AppendHeaders([(name, value)]) = set_cookie(&cookie).unwrap();
        assert_eq!(name, SET_COOKIE);
        let value = value.to_str().unwrap();
        assert!(value.starts_with("travis.sso=a+b/c==; "));
        assert!(!value.contains('%'));
    }

    #[test]
    fn clear_cookie_expires_in_the_past() {
        let cookie = clear_session_cookie(&config("http://localhost:8888"));
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.domain(), Some("localhost"));
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(
            cookie.expires_datetime(),
            Some(OffsetDateTime::UNIX_EPOCH)
        );
    }
}
