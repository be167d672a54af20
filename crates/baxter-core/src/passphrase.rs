//! Passphrase resolution: `BAXTER_PASSPHRASE` overrides OS keychain lookup.
//!
//! The underlying keychain integration is treated as an external
//! collaborator; this module is the typed seam the rest of the engine calls
//! through, so swapping the backend never touches call sites.

use keyring::Entry;

use crate::error::{Error, Result};

const ENV_OVERRIDE: &str = "BAXTER_PASSPHRASE";

pub struct PassphraseProvider {
    service: String,
    account: String,
}

impl PassphraseProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    /// Resolve the backup passphrase: environment override first, then the
    /// configured keychain entry.
    pub fn resolve(&self) -> Result<String> {
        if let Ok(value) = std::env::var(ENV_OVERRIDE) {
            if !value.is_empty() {
                return Ok(value);
            }
        }
        let entry = Entry::new(&self.service, &self.account)
            .map_err(|e| Error::Passphrase(format!("keychain entry: {e}")))?;
        entry
            .get_password()
            .map_err(|e| Error::Passphrase(format!("keychain lookup failed: {e}")))
    }

    /// Persist a passphrase to the keychain (used by onboarding / `init`).
    pub fn store(&self, passphrase: &str) -> Result<()> {
        let entry = Entry::new(&self.service, &self.account)
            .map_err(|e| Error::Passphrase(format!("keychain entry: {e}")))?;
        entry
            .set_password(passphrase)
            .map_err(|e| Error::Passphrase(format!("keychain store failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_over_keychain() {
        std::env::set_var(ENV_OVERRIDE, "from-env");
        let provider = PassphraseProvider::new("baxter-test-service", "baxter-test-account");
        assert_eq!(provider.resolve().unwrap(), "from-env");
        std::env::remove_var(ENV_OVERRIDE);
    }
}
