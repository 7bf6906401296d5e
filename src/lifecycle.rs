//! Token lifecycle: account resolution and access-token refresh.
//!
//! All writes go through the store's narrow update operations; nothing here
//! persists directly. Refreshes are single-shot: a failed exchange is
//! reported to the caller, which either surfaces it (proxy path) or logs
//! and moves on (scheduler path).

use chrono::Utc;

use crate::errors::AppError;
use crate::models::provider::ProviderConfig;
use crate::models::token::{TokenRecord, TokenResponse};
use crate::store::{sqlite::DEFAULT_ACCOUNT, TokenStore};

/// Reactive buffer: a token expiring within this window is refreshed before
/// the request is forwarded, so it cannot lapse mid-upstream-call.
pub const REFRESH_BUFFER_SECS: i64 = 300;

/// Proactive buffer used by the background sweep. Wider than the reactive
/// one so the sweep usually wins the race against inbound traffic.
pub const SWEEP_BUFFER_SECS: i64 = 600;

/// Providers that omit `expires_in` get this lifetime.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Clone)]
pub struct TokenManager {
    store: TokenStore,
    http: reqwest::Client,
}

impl TokenManager {
    pub fn new(store: TokenStore, http: reqwest::Client) -> Self {
        Self { store, http }
    }

    /// Resolve a connection for `provider`. An explicit account must match
    /// exactly; with no account the `"default"` name wins, then the store's
    /// single-connection fallback.
    pub async fn resolve(
        &self,
        provider: &str,
        account: Option<&str>,
    ) -> Result<(TokenRecord, String), AppError> {
        if let Some(account) = account {
            let record = self
                .store
                .get_token(provider, account)
                .await?
                .ok_or_else(|| AppError::NoConnection {
                    provider: provider.to_string(),
                })?;
            return Ok((record, account.to_string()));
        }

        if let Some(record) = self.store.get_token(provider, DEFAULT_ACCOUNT).await? {
            return Ok((record, DEFAULT_ACCOUNT.to_string()));
        }

        match self.store.get_default_token(provider).await? {
            Some(record) => {
                let account = record.account.clone();
                Ok((record, account))
            }
            None => Err(AppError::NoConnection {
                provider: provider.to_string(),
            }),
        }
    }

    /// Whether a record must be refreshed before use. A missing access
    /// token or a missing expiry both count as stale.
    pub fn needs_refresh(record: &TokenRecord, buffer_secs: i64) -> bool {
        if record.access_token.is_none() {
            return true;
        }
        match record.expires_at {
            None => true,
            Some(at) => at - Utc::now().timestamp() < buffer_secs,
        }
    }

    /// Return a record that is valid for at least [`REFRESH_BUFFER_SECS`],
    /// refreshing it first if necessary.
    pub async fn ensure_fresh(
        &self,
        provider: &ProviderConfig,
        record: TokenRecord,
    ) -> Result<TokenRecord, AppError> {
        if !Self::needs_refresh(&record, REFRESH_BUFFER_SECS) {
            return Ok(record);
        }
        tracing::debug!(
            provider = %record.provider,
            account = %record.account,
            "access token stale, refreshing"
        );
        self.refresh(provider, record).await
    }

    /// Run the refresh grant and persist the result. Exactly one attempt;
    /// nothing is written on failure.
    pub async fn refresh(
        &self,
        provider: &ProviderConfig,
        record: TokenRecord,
    ) -> Result<TokenRecord, AppError> {
        let token = self
            .refresh_exchange(provider, &record.refresh_token)
            .await?;
        let expires_at = Self::expiry_from_now(token.expires_in);

        let mut updated = record;
        updated.access_token = Some(token.access_token.clone());
        updated.expires_at = Some(expires_at);

        match token.refresh_token {
            // Provider rotated the refresh token: full upsert so the new
            // secret is kept and createdAt survives.
            Some(rotated) if rotated != updated.refresh_token => {
                updated.refresh_token = rotated;
                if let Some(scope) = token.scope {
                    updated.scopes = Some(scope);
                }
                self.store
                    .store_token(
                        &updated.provider,
                        &updated.account,
                        &updated.refresh_token,
                        updated.access_token.as_deref(),
                        updated.expires_at,
                        updated.scopes.as_deref(),
                    )
                    .await?;
            }
            _ => {
                self.store
                    .update_access_token(
                        &updated.provider,
                        &updated.account,
                        &token.access_token,
                        expires_at,
                    )
                    .await?;
            }
        }

        Ok(updated)
    }

    async fn refresh_exchange(
        &self,
        provider: &ProviderConfig,
        refresh_token: &str,
    ) -> Result<TokenResponse, AppError> {
        let resp = self
            .http
            .post(&provider.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", provider.client_id.as_str()),
                ("client_secret", provider.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::RefreshFailed {
                status: None,
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::RefreshFailed {
                status: Some(status),
                detail: snippet(&detail),
            });
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|_| AppError::RefreshFailed {
                status: None,
                detail: "malformed token response".to_string(),
            })
    }

    /// Exchange an authorization code for tokens (callback path).
    pub async fn code_exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AppError> {
        let resp = self
            .http
            .post(&provider.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", provider.client_id.as_str()),
                ("client_secret", provider.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::OAuthExchangeFailed {
                status: None,
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::OAuthExchangeFailed {
                status: Some(status),
                detail: snippet(&detail),
            });
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|_| AppError::OAuthExchangeFailed {
                status: None,
                detail: "malformed token response".to_string(),
            })
    }

    /// Absolute expiry for a token response received now.
    pub fn expiry_from_now(expires_in: Option<u64>) -> i64 {
        Utc::now().timestamp()
            + expires_in
                .map(|s| s as i64)
                .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
    }
}

/// Upstream error bodies can be arbitrarily large; keep log-safe prefixes.
fn snippet(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    if body.chars().count() <= MAX_CHARS {
        body.to_string()
    } else {
        body.chars().take(MAX_CHARS).collect::<String>() + "..."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(access_token: Option<&str>, expires_at: Option<i64>) -> TokenRecord {
        TokenRecord {
            provider: "oura".to_string(),
            account: "default".to_string(),
            refresh_token: "r1".to_string(),
            access_token: access_token.map(String::from),
            expires_at,
            scopes: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn expiring_soon_needs_refresh() {
        let now = Utc::now().timestamp();
        assert!(TokenManager::needs_refresh(
            &record(Some("a1"), Some(now + 100)),
            REFRESH_BUFFER_SECS
        ));
    }

    #[test]
    fn fresh_token_does_not_need_refresh() {
        let now = Utc::now().timestamp();
        assert!(!TokenManager::needs_refresh(
            &record(Some("a1"), Some(now + 3600)),
            REFRESH_BUFFER_SECS
        ));
    }

    #[test]
    fn missing_access_token_always_needs_refresh() {
        let now = Utc::now().timestamp();
        assert!(TokenManager::needs_refresh(
            &record(None, Some(now + 3600)),
            REFRESH_BUFFER_SECS
        ));
    }

    #[test]
    fn missing_expiry_counts_as_stale() {
        assert!(TokenManager::needs_refresh(
            &record(Some("a1"), None),
            REFRESH_BUFFER_SECS
        ));
    }

    #[test]
    fn already_expired_needs_refresh() {
        let now = Utc::now().timestamp();
        assert!(TokenManager::needs_refresh(
            &record(Some("a1"), Some(now - 100)),
            REFRESH_BUFFER_SECS
        ));
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "e".repeat(500);
        let s = snippet(&long);
        assert!(s.len() < 500);
        assert!(s.ends_with("..."));
        assert_eq!(snippet("short"), "short");
    }
}
