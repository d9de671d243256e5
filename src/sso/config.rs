//! Gateway configuration, validated once and read-only afterwards.

use secrecy::{ExposeSecret, SecretSlice};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::session::KEY_LEN;

const DEFAULT_STATIC_PATH: &str = "./static";
const DEFAULT_TEMPLATE_PATH: &str = "./template";
const DEFAULT_IDENTITY_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must include a host: {url}")]
    MissingHost { name: &'static str, url: String },
    #[error("{name} must be 32 bytes, got {len}")]
    InvalidKeyLength { name: &'static str, len: usize },
    #[error("at least one authorized user is required")]
    EmptyAllowList,
}

#[derive(Debug)]
pub struct Config {
    upstream_url: Url,
    api_url: Url,
    public_url: Url,
    static_path: PathBuf,
    template_path: PathBuf,
    encryption_key: SecretSlice<u8>,
    csrf_key: SecretSlice<u8>,
    authorized_users: Vec<String>,
    identity_timeout: Duration,
}

impl Config {
    /// # Errors
    /// Returns [`ConfigError`] if a URL has no host, a key is not 32 bytes or
    /// the allow-list is empty.
    pub fn new(
        upstream_url: Url,
        api_url: Url,
        public_url: Url,
        encryption_key: Vec<u8>,
        csrf_key: Vec<u8>,
        authorized_users: Vec<String>,
    ) -> Result<Self, ConfigError> {
        for (name, url) in [
            ("upstream URL", &upstream_url),
            ("API URL", &api_url),
            ("public URL", &public_url),
        ] {
            if url.host_str().is_none() {
                return Err(ConfigError::MissingHost {
                    name,
                    url: url.to_string(),
                });
            }
        }

        for (name, key) in [("encryption key", &encryption_key), ("CSRF key", &csrf_key)] {
            if key.len() != KEY_LEN {
                return Err(ConfigError::InvalidKeyLength {
                    name,
                    len: key.len(),
                });
            }
        }

        let authorized_users: Vec<String> = authorized_users
            .into_iter()
            .map(|login| login.trim().to_string())
            .filter(|login| !login.is_empty())
            .collect();
        if authorized_users.is_empty() {
            return Err(ConfigError::EmptyAllowList);
        }

        Ok(Self {
            upstream_url,
            api_url,
            public_url,
            static_path: PathBuf::from(DEFAULT_STATIC_PATH),
            template_path: PathBuf::from(DEFAULT_TEMPLATE_PATH),
            encryption_key: SecretSlice::from(encryption_key),
            csrf_key: SecretSlice::from(csrf_key),
            authorized_users,
            identity_timeout: Duration::from_secs(DEFAULT_IDENTITY_TIMEOUT_SECONDS),
        })
    }

    #[must_use]
    pub fn with_static_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.static_path = path.into();
        self
    }

    #[must_use]
    pub fn with_template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = path.into();
        self
    }

    #[must_use]
    pub fn with_identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    #[must_use]
    pub fn upstream_url(&self) -> &Url {
        &self.upstream_url
    }

    #[must_use]
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    #[must_use]
    pub fn public_url(&self) -> &Url {
        &self.public_url
    }

    #[must_use]
    pub fn static_path(&self) -> &Path {
        &self.static_path
    }

    #[must_use]
    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    #[must_use]
    pub fn encryption_key(&self) -> &[u8] {
        self.encryption_key.expose_secret()
    }

    #[must_use]
    pub fn csrf_key(&self) -> &[u8] {
        self.csrf_key.expose_secret()
    }

    #[must_use]
    pub fn authorized_users(&self) -> &[String] {
        &self.authorized_users
    }

    #[must_use]
    pub fn identity_timeout(&self) -> Duration {
        self.identity_timeout
    }

    /// Cookie domain: the public host without its port.
    #[must_use]
    pub fn cookie_domain(&self) -> String {
        domain_from_host(self.public_url.host_str().unwrap_or_default())
    }

    /// Whether the public URL demands HTTPS.
    #[must_use]
    pub fn requires_tls(&self) -> bool {
        self.public_url.scheme() == "https"
    }
}

/// Strip an optional `:port` suffix from a host.
#[must_use]
pub fn domain_from_host(host: &str) -> String {
    // Bracketed IPv6 literals carry colons of their own.
    if host.starts_with('[') {
        return host
            .split_once(']')
            .map_or_else(|| host.to_string(), |(addr, _)| format!("{addr}]"));
    }
    match host.find(':') {
        Some(index) if index > 0 => host[..index].to_string(),
        _ => host.to_string(),
    }
}
