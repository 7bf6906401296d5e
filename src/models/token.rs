use serde::{Deserialize, Serialize};

/// One stored credential binding: `(provider, account)` → tokens.
///
/// The refresh token is decrypted; values of this type live in memory only
/// and are never serialized.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub provider: String,
    pub account: String,
    pub refresh_token: String,
    pub access_token: Option<String>,
    /// Absolute unix-seconds expiry of the access token. `None` means the
    /// expiry was never recorded and the token is treated as already stale.
    pub expires_at: Option<i64>,
    /// Space-delimited granted scopes, as reported by the provider.
    pub scopes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Listing projection of a [`TokenRecord`]: everything except the refresh
/// token, which never leaves the store through this type.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub id: String,
    pub provider: String,
    pub account: String,
    pub status: String,
    pub expires_at: Option<i64>,
    pub scopes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Token endpoint response for both the authorization-code exchange and
/// the refresh grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}
