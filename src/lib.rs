//! # travis-sso (Single Sign-On Gateway)
//!
//! `travis-sso` sits in front of an internal service and only lets through
//! browsers that have signed in with a Travis CI account on the allow-list.
//!
//! ## Sessions
//!
//! There is no server-side session store. After a successful login the
//! verified user and the API token are serialized to JSON, sealed with
//! AES-256-GCM and handed to the browser as the `travis.sso` cookie:
//!
//! ```text
//! base64( nonce (12 bytes) || ciphertext )
//! ```
//!
//! A cookie that fails to decode or authenticate is cleared and the request
//! fails with `500`, so corrupt cookies are visible instead of silently
//! bouncing the user back to the login page.
//!
//! ## Upstream contract
//!
//! Authenticated requests are relayed to the upstream unchanged except for the
//! target host and a `Travis-State` header carrying the session JSON. Any
//! `Travis-State` header sent by the client is dropped first.
//!
//! ## CSRF
//!
//! Every request goes through a double-submit CSRF guard. State-changing
//! requests must echo the masked token in the `authenticity_token` form field
//! or the `X-CSRF-Token` header.

pub mod cli;
pub mod sso;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
