use anyhow::{Context, Result};
use keyring::Entry;
use tracing::debug;

const SERVICE_NAME: &str = "farmsync";

/// Bearer tokens in the OS keychain, one entry per username.
pub struct CredentialStore;

impl CredentialStore {
    pub fn store_token(username: &str, token: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, username)
            .context("Failed to create keyring entry")?;
        entry
            .set_password(token)
            .context("Failed to store token in keychain")?;
        Ok(())
    }

    pub fn get_token(username: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, username)
            .context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve token from keychain")
    }

    /// Delete the stored token. A missing entry is not an error.
    pub fn delete(username: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, username)
            .context("Failed to create keyring entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

/// Supplies the current bearer token, if any.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;

    /// Forget the token (logout). Default: nothing to forget.
    fn forget(&self) {}
}

/// Reads the token for `username` from the keychain on every call, so a
/// token stored mid-session is picked up by the next drain.
pub struct KeyringToken {
    username: String,
}

impl KeyringToken {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

impl TokenProvider for KeyringToken {
    fn token(&self) -> Option<String> {
        match CredentialStore::get_token(&self.username) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(username = %self.username, error = %e, "No stored token");
                None
            }
        }
    }

    fn forget(&self) {
        if let Err(e) = CredentialStore::delete(&self.username) {
            debug!(username = %self.username, error = %e, "Failed to delete stored token");
        }
    }
}

/// A token held in memory (environment override, tests).
pub struct StaticToken {
    token: std::sync::RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: std::sync::RwLock::new(Some(token.into())),
        }
    }

    pub fn none() -> Self {
        Self {
            token: std::sync::RwLock::new(None),
        }
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn forget(&self) {
        *self.token.write().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token_forget() {
        let tokens = StaticToken::new("abc");
        assert_eq!(tokens.token().as_deref(), Some("abc"));
        tokens.forget();
        assert!(tokens.token().is_none());
        assert!(StaticToken::none().token().is_none());
    }
}
