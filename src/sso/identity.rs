//! Identity provider client.
//!
//! Exchanges the token posted by the login page for the user record of the
//! Travis CI API (`GET /users?access_token=...`). One attempt per login.

use reqwest::{header::ACCEPT, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use super::session::Identity;

const API_V2_MEDIA_TYPE: &str = "application/vnd.travis-ci.2+json";
const USERS_PATH: &str = "/users";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider unavailable: {0}")]
    UpstreamUnavailable(#[source] reqwest::Error),
    #[error("upstream error, code={status}, body={body}")]
    UpstreamRejected { status: u16, body: String },
    #[error("malformed identity provider response: {0}")]
    MalformedResponse(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct ApiMessage {
    user: Identity,
}

#[derive(Clone, Debug)]
pub struct IdentityClient {
    client: Client,
    api_url: Url,
}

impl IdentityClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, api_url })
    }

    fn users_url(&self, token: &str) -> Url {
        let mut url = self.api_url.clone();
        url.set_path(USERS_PATH);
        url.query_pairs_mut().append_pair("access_token", token);
        url
    }

    /// Resolve `token` into the identity it belongs to.
    ///
    /// # Errors
    /// Returns [`IdentityError`] on transport failure or timeout, a non-200
    /// status, or an undecodable body.
    #[instrument(skip_all)]
    pub async fn resolve(&self, token: &str) -> Result<Identity, IdentityError> {
        let response = self
            .client
            .get(self.users_url(token))
            .header(ACCEPT, API_V2_MEDIA_TYPE)
            .send()
            .await
            .map_err(|err| {
                warn!("identity provider request failed: {err}");
                IdentityError::UpstreamUnavailable(err)
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!("identity provider returned {status}");
            return Err(IdentityError::UpstreamRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(IdentityError::UpstreamUnavailable)?;
        let message: ApiMessage =
            serde_json::from_slice(&body).map_err(IdentityError::MalformedResponse)?;

        debug!(login = %message.user.login, "identity resolved");

        Ok(message.user)
    }
}
