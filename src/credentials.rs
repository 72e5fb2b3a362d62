//! Credential store seam.
//!
//! Credentials are provisioned externally and seeded from configuration
//! at startup.  The gateway only ever reads them, so the store is a
//! simple synchronous lookup behind a trait.

use std::collections::HashMap;

use crate::config::CredentialConfig;

/// A resolved credential: secret key plus the account it authenticates as.
#[derive(Debug, Clone)]
pub struct Credential {
    /// AWS-style access key ID.
    pub access_key: String,
    /// Secret key used for HMAC signing.
    pub secret_key: String,
    /// Canonical account ID.
    pub account_id: String,
    /// Display name shown in owner fields.
    pub display_name: String,
}

/// Credential lookup contract: access key to credential, or none.
pub trait CredentialStore: Send + Sync + 'static {
    /// Resolve an access key. Returns `None` for unknown keys.
    fn lookup(&self, access_key: &str) -> Option<Credential>;
}

/// Credential store seeded from the configuration file.
pub struct StaticCredentialStore {
    by_access_key: HashMap<String, Credential>,
}

impl StaticCredentialStore {
    /// Build the store from the configured credential list.
    ///
    /// Missing account IDs default to the access key; missing display
    /// names default to the account ID.
    pub fn from_config(entries: &[CredentialConfig]) -> Self {
        let mut by_access_key = HashMap::new();
        for entry in entries {
            let account_id = entry
                .account_id
                .clone()
                .unwrap_or_else(|| entry.access_key.clone());
            let display_name = entry.display_name.clone().unwrap_or_else(|| account_id.clone());
            by_access_key.insert(
                entry.access_key.clone(),
                Credential {
                    access_key: entry.access_key.clone(),
                    secret_key: entry.secret_key.clone(),
                    account_id,
                    display_name,
                },
            );
        }
        Self { by_access_key }
    }
}

impl CredentialStore for StaticCredentialStore {
    fn lookup(&self, access_key: &str) -> Option<Credential> {
        self.by_access_key.get(access_key).cloned()
    }
}
