use crate::{
    cli::telemetry,
    sso::{
        self, config::Config, forward::HttpForwarder, render::TemplateRenderer,
        state::GatewayState,
    },
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretSlice};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub listen: SocketAddr,
    pub upstream: Url,
    pub api_url: Url,
    pub public_url: Url,
    pub static_path: String,
    pub template_path: String,
    pub authorized_users: Vec<String>,
    pub identity_timeout: Duration,
    pub encryption_key: SecretSlice<u8>,
    pub csrf_key: SecretSlice<u8>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is rejected, the login template
/// cannot be loaded or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let listen = args.listen;
    let config = build_config(args)?;

    info!(
        "Proxying {} for {} authorized user(s), public URL {}",
        config.upstream_url(),
        config.authorized_users().len(),
        config.public_url()
    );

    // A broken template is fatal here instead of on the first visitor.
    let renderer = TemplateRenderer::new(config.template_path());
    renderer
        .init()
        .await
        .context("Failed to load login template")?;
    debug!(
        "login template loaded from {}",
        config.template_path().display()
    );

    let forwarder = HttpForwarder::new(config.upstream_url().clone())
        .context("Failed to build upstream client")?;

    let state = GatewayState::with_collaborators(config, Arc::new(renderer), Arc::new(forwarder))?;

    let result = sso::new(listen, Arc::new(state)).await;

    telemetry::shutdown_tracer();

    result
}

fn build_config(args: Args) -> Result<Config> {
    let config = Config::new(
        args.upstream,
        args.api_url,
        args.public_url,
        args.encryption_key.expose_secret().to_vec(),
        args.csrf_key.expose_secret().to_vec(),
        args.authorized_users,
    )
    .context("Invalid configuration")?;

    Ok(config
        .with_static_path(args.static_path)
        .with_template_path(args.template_path)
        .with_identity_timeout(args.identity_timeout))
}
