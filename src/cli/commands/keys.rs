use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Encoding};
use clap::{Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretSlice, SecretString};

pub const ARG_ENCRYPTION_KEY: &str = "encryption-key";
pub const ARG_CSRF_KEY: &str = "csrf-key";

#[derive(Debug)]
pub struct Options {
    pub encryption_key: SecretSlice<u8>,
    pub csrf_key: SecretSlice<u8>,
}

impl Options {
    /// Parse and base64-decode the key arguments.
    ///
    /// # Errors
    /// Returns an error if a key is missing or not valid base64.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let read_key = |id: &str| -> Result<SecretSlice<u8>> {
            let encoded = matches
                .get_one::<String>(id)
                .map(|value| SecretString::from(value.trim().to_string()))
                .filter(|value| !value.expose_secret().is_empty())
                .ok_or_else(|| anyhow!("missing required argument: --{id}"))?;
            let decoded = Base64::decode_vec(encoded.expose_secret())
                .map_err(|_| anyhow!("invalid base64"))
                .with_context(|| format!("failed to decode --{id}"))?;
            Ok(SecretSlice::from(decoded))
        };

        Ok(Self {
            encryption_key: read_key(ARG_ENCRYPTION_KEY)?,
            csrf_key: read_key(ARG_CSRF_KEY)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ENCRYPTION_KEY)
                .long(ARG_ENCRYPTION_KEY)
                .help("Base64-encoded 32-byte key sealing the session cookie")
                .env("TRAVIS_SSO_ENCRYPTION_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_CSRF_KEY)
                .long(ARG_CSRF_KEY)
                .help("Base64-encoded 32-byte key signing the CSRF cookie")
                .env("TRAVIS_SSO_CSRF_KEY")
                .hide_env_values(true)
                .required(true),
        )
}
