//! Allow-list authorization.

use std::collections::HashSet;

use super::session::Identity;

/// Logins permitted through the gateway, fixed at startup.
#[derive(Clone, Debug)]
pub struct AuthorizationPolicy {
    logins: HashSet<String>,
}

impl AuthorizationPolicy {
    /// Builds the allow-list, trimming whitespace and skipping empty entries.
    pub fn new<I, S>(logins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            logins: logins
                .into_iter()
                .map(|login| login.as_ref().trim().to_string())
                .filter(|login| !login.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn is_authorized(&self, identity: &Identity) -> bool {
        self.logins.contains(&identity.login)
    }
}
