//! Broker session token store.
//!
//! The access token is short-lived broker session state, held behind an
//! explicit capability that is injected into the client — never a
//! process-wide mutable. The login callback refreshes it through
//! `KiteClient::generate_session`.

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// Shared, refreshable holder for the broker access token.
#[derive(Default)]
pub struct TokenStore {
    token: RwLock<Option<SecretString>>,
}

impl TokenStore {
    /// An empty store; calls requiring auth fail until a session exists.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with an existing access token.
    #[must_use]
    pub fn with_token(token: String) -> Self {
        Self {
            token: RwLock::new(Some(SecretString::from(token))),
        }
    }

    /// Replace the stored token (session refresh).
    pub fn set(&self, token: String) {
        *self.token.write() = Some(SecretString::from(token));
    }

    /// Drop the stored token (logout / session invalidated).
    pub fn clear(&self) {
        *self.token.write() = None;
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.token.read().is_some()
    }

    /// `Authorization` header value, `token {api_key}:{access_token}`.
    /// `None` until a session exists.
    #[must_use]
    pub fn authorization(&self, api_key: &str) -> Option<String> {
        self.token
            .read()
            .as_ref()
            .map(|t| format!("token {api_key}:{}", t.expose_secret()))
    }
}

/// Checksum for the token exchange: SHA-256 over
/// api_key + request_token + api_secret, hex-encoded.
#[must_use]
pub fn session_checksum(api_key: &str, request_token: &str, api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(request_token.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}
