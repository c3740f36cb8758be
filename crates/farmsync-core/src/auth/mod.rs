//! Bearer token storage.
//!
//! - `CredentialStore`: OS keychain access via keyring
//! - `TokenProvider`: how the sync engine and data service obtain the current
//!   token (`KeyringToken` in the app, `StaticToken` for overrides and tests)

pub mod credentials;

pub use credentials::{CredentialStore, KeyringToken, StaticToken, TokenProvider};
