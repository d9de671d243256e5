//! Command-line argument dispatch.
//!
//! Validated CLI matches are mapped to the action that starts the gateway.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{gateway, keys};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let gateway_opts = gateway::Options::parse(matches)?;
    let keys_opts = keys::Options::parse(matches)?;

    Ok(Action::Server(Args {
        listen: gateway_opts.listen,
        upstream: gateway_opts.upstream,
        api_url: gateway_opts.api_url,
        public_url: gateway_opts.public_url,
        static_path: gateway_opts.static_path,
        template_path: gateway_opts.template_path,
        authorized_users: gateway_opts.authorized_users,
        identity_timeout: gateway_opts.identity_timeout,
        encryption_key: keys_opts.encryption_key,
        csrf_key: keys_opts.csrf_key,
    }))
}
