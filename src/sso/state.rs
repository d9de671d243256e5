//! Shared, immutable gateway state.

use anyhow::{Context, Result};
use std::sync::Arc;

use super::{
    config::Config,
    csrf::CsrfGuard,
    forward::{Forwarder, HttpForwarder},
    identity::IdentityClient,
    policy::AuthorizationPolicy,
    render::{Renderer, TemplateRenderer},
    session::SessionCodec,
};

pub struct GatewayState {
    config: Config,
    codec: SessionCodec,
    identity: IdentityClient,
    policy: AuthorizationPolicy,
    csrf: CsrfGuard,
    renderer: Arc<dyn Renderer>,
    forwarder: Arc<dyn Forwarder>,
}

impl GatewayState {
    /// Build the state with the disk-backed renderer and the HTTP forwarder.
    ///
    /// # Errors
    /// Returns an error if a key is rejected or an HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let renderer = Arc::new(TemplateRenderer::new(config.template_path()));
        let forwarder = Arc::new(
            HttpForwarder::new(config.upstream_url().clone())
                .context("Failed to build upstream client")?,
        );
        Self::with_collaborators(config, renderer, forwarder)
    }

    /// # Errors
    /// Returns an error if a key is rejected or the identity client cannot be
    /// built.
    pub fn with_collaborators(
        config: Config,
        renderer: Arc<dyn Renderer>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Result<Self> {
        let codec = SessionCodec::new(config.encryption_key().to_vec())
            .context("Invalid encryption key")?;
        let identity = IdentityClient::new(config.api_url().clone(), config.identity_timeout())
            .context("Failed to build identity provider client")?;
        let policy = AuthorizationPolicy::new(config.authorized_users());
        let csrf = CsrfGuard::new(
            config.csrf_key(),
            config.cookie_domain(),
            config.requires_tls(),
        );

        Ok(Self {
            config,
            codec,
            identity,
            policy,
            csrf,
            renderer,
            forwarder,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityClient {
        &self.identity
    }

    #[must_use]
    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    #[must_use]
    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    #[must_use]
    pub fn forwarder(&self) -> &dyn Forwarder {
        self.forwarder.as_ref()
    }
}
