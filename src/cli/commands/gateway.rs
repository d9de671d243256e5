use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::{net::SocketAddr, time::Duration};
use url::Url;

pub const ARG_LISTEN: &str = "listen";
pub const ARG_UPSTREAM: &str = "upstream";
pub const ARG_API_URL: &str = "api-url";
pub const ARG_PUBLIC_URL: &str = "public-url";
pub const ARG_STATIC_PATH: &str = "static";
pub const ARG_TEMPLATE_PATH: &str = "template";
pub const ARG_AUTHORIZED_USERS: &str = "authorized-users";
pub const ARG_IDENTITY_TIMEOUT: &str = "identity-timeout";

#[derive(Debug, Clone)]
pub struct Options {
    pub listen: SocketAddr,
    pub upstream: Url,
    pub api_url: Url,
    pub public_url: Url,
    pub static_path: String,
    pub template_path: String,
    pub authorized_users: Vec<String>,
    pub identity_timeout: Duration,
}

impl Options {
    /// Parse gateway arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing or a URL is invalid.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let read_required = |id: &str| -> Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("missing required argument: --{id}"))
        };
        let read_url = |id: &str| -> Result<Url> {
            let raw = read_required(id)?;
            Url::parse(&raw).with_context(|| format!("invalid --{id}: {raw}"))
        };

        let listen = matches
            .get_one::<SocketAddr>(ARG_LISTEN)
            .copied()
            .context("missing required argument: --listen")?;

        let authorized_users = read_required(ARG_AUTHORIZED_USERS)?
            .split(',')
            .map(str::trim)
            .filter(|login| !login.is_empty())
            .map(ToString::to_string)
            .collect();

        let identity_timeout = Duration::from_secs(
            matches
                .get_one::<u64>(ARG_IDENTITY_TIMEOUT)
                .copied()
                .unwrap_or(10),
        );

        Ok(Self {
            listen,
            upstream: read_url(ARG_UPSTREAM)?,
            api_url: read_url(ARG_API_URL)?,
            public_url: read_url(ARG_PUBLIC_URL)?,
            static_path: read_required(ARG_STATIC_PATH)?,
            template_path: read_required(ARG_TEMPLATE_PATH)?,
            authorized_users,
            identity_timeout,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LISTEN)
                .short('l')
                .long(ARG_LISTEN)
                .help("Address to listen on")
                .default_value("0.0.0.0:8888")
                .env("TRAVIS_SSO_LISTEN")
                .value_parser(clap::value_parser!(SocketAddr)),
        )
        .arg(
            Arg::new(ARG_UPSTREAM)
                .short('u')
                .long(ARG_UPSTREAM)
                .help("Upstream URL that authenticated requests are proxied to")
                .env("TRAVIS_SSO_UPSTREAM")
                .required(true),
        )
        .arg(
            Arg::new(ARG_API_URL)
                .long(ARG_API_URL)
                .help("Travis CI API URL used to resolve tokens")
                .default_value("https://api.travis-ci.org")
                .env("TRAVIS_SSO_API_URL"),
        )
        .arg(
            Arg::new(ARG_PUBLIC_URL)
                .long(ARG_PUBLIC_URL)
                .help("Public URL of this gateway, example: https://sso.example.com")
                .env("TRAVIS_SSO_PUBLIC_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_STATIC_PATH)
                .long(ARG_STATIC_PATH)
                .help("Directory served under /sso/static")
                .default_value("./static")
                .env("TRAVIS_SSO_STATIC_PATH"),
        )
        .arg(
            Arg::new(ARG_TEMPLATE_PATH)
                .long(ARG_TEMPLATE_PATH)
                .help("Directory containing login.html")
                .default_value("./template")
                .env("TRAVIS_SSO_TEMPLATE_PATH"),
        )
        .arg(
            Arg::new(ARG_AUTHORIZED_USERS)
                .long(ARG_AUTHORIZED_USERS)
                .help("Comma-separated list of logins allowed through")
                .env("TRAVIS_SSO_AUTHORIZED_USERS")
                .required(true),
        )
        .arg(
            Arg::new(ARG_IDENTITY_TIMEOUT)
                .long(ARG_IDENTITY_TIMEOUT)
                .help("Timeout in seconds for identity provider requests")
                .default_value("10")
                .env("TRAVIS_SSO_IDENTITY_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
