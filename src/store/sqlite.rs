//! SQLite-backed token store.
//!
//! Owns the persistence and encryption boundary: refresh tokens are
//! encrypted before they hit disk and decrypted on the way out. No other
//! component touches the database directly.

use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::crypto::Cipher;
use crate::models::token::{Connection, TokenRecord};
use crate::store::StoreError;

/// Handshake states older than this are invalid even if not yet swept.
const STATE_TTL_SECS: i64 = 600;

pub const DEFAULT_ACCOUNT: &str = "default";

#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
    cipher: Cipher,
}

impl TokenStore {
    pub async fn connect(database_url: &str, cipher: Cipher) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Self { pool, cipher })
    }

    /// Wrap an existing pool. Tests use this with a single-connection
    /// in-memory pool.
    pub fn new(pool: SqlitePool, cipher: Cipher) -> Self {
        Self { pool, cipher }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotent schema setup; safe to call on every startup.
    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                id            TEXT PRIMARY KEY,
                provider      TEXT NOT NULL,
                account       TEXT NOT NULL DEFAULT 'default',
                refresh_token TEXT NOT NULL,
                access_token  TEXT,
                expires_at    INTEGER,
                scopes        TEXT,
                created_at    INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL,
                UNIQUE (provider, account)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_states (
                state      TEXT PRIMARY KEY,
                provider   TEXT NOT NULL,
                account    TEXT NOT NULL DEFAULT 'default',
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -- Token Operations --

    /// Upsert a connection. Replaces tokens, expiry and scopes; bumps
    /// `updated_at`, never `created_at`.
    pub async fn store_token(
        &self,
        provider: &str,
        account: &str,
        refresh_token: &str,
        access_token: Option<&str>,
        expires_at: Option<i64>,
        scopes: Option<&str>,
    ) -> Result<(), StoreError> {
        let encrypted = self.cipher.encrypt(refresh_token)?;
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO connections (id, provider, account, refresh_token, access_token, expires_at, scopes, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT (provider, account) DO UPDATE SET
                refresh_token = excluded.refresh_token,
                access_token  = excluded.access_token,
                expires_at    = excluded.expires_at,
                scopes        = excluded.scopes,
                updated_at    = excluded.updated_at
            "#,
        )
        .bind(connection_id(provider, account))
        .bind(provider)
        .bind(account)
        .bind(encrypted)
        .bind(access_token)
        .bind(expires_at)
        .bind(scopes)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_token(
        &self,
        provider: &str,
        account: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            "SELECT provider, account, refresh_token, access_token, expires_at, scopes, created_at, updated_at
             FROM connections WHERE provider = ?1 AND account = ?2",
        )
        .bind(provider)
        .bind(account)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.decrypt_row(r)).transpose()
    }

    /// Account-resolution fallback: the sole connection for a provider
    /// regardless of its name, or the one named `"default"`. With several
    /// connections and no `"default"` among them there is nothing sensible
    /// to pick, so the lookup reports absent rather than guessing.
    pub async fn get_default_token(
        &self,
        provider: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let mut rows = sqlx::query_as::<_, ConnectionRow>(
            "SELECT provider, account, refresh_token, access_token, expires_at, scopes, created_at, updated_at
             FROM connections WHERE provider = ?1 ORDER BY account ASC",
        )
        .bind(provider)
        .fetch_all(&self.pool)
        .await?;

        let chosen = if rows.len() == 1 {
            rows.pop()
        } else {
            rows.into_iter().find(|r| r.account == DEFAULT_ACCOUNT)
        };

        chosen.map(|r| self.decrypt_row(r)).transpose()
    }

    /// Partial update after an access-token refresh. Leaves the refresh
    /// token and `created_at` untouched.
    pub async fn update_access_token(
        &self,
        provider: &str,
        account: &str,
        access_token: &str,
        expires_at: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE connections SET access_token = ?1, expires_at = ?2, updated_at = ?3
             WHERE provider = ?4 AND account = ?5",
        )
        .bind(access_token)
        .bind(expires_at)
        .bind(Utc::now().timestamp())
        .bind(provider)
        .bind(account)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Idempotent delete; returns whether a record was actually removed.
    pub async fn delete_token(&self, provider: &str, account: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM connections WHERE provider = ?1 AND account = ?2")
            .bind(provider)
            .bind(account)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All connections ordered by `(provider, account)`. Refresh tokens are
    /// not part of the projection and never leave the store here.
    pub async fn list_connections(&self) -> Result<Vec<Connection>, StoreError> {
        let rows = sqlx::query_as::<_, ConnectionListRow>(
            "SELECT provider, account, access_token IS NOT NULL AS has_access_token, expires_at, scopes, created_at, updated_at
             FROM connections ORDER BY provider ASC, account ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Connection {
                id: connection_id(&r.provider, &r.account),
                status: if r.has_access_token { "active" } else { "pending" }.to_string(),
                provider: r.provider,
                account: r.account,
                expires_at: r.expires_at,
                scopes: r.scopes,
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
            .collect())
    }

    /// Every record whose access token is missing an expiry or expires
    /// within `threshold_secs`. Refresh tokens come back decrypted; this
    /// feeds the refresh sweep directly.
    pub async fn tokens_needing_refresh(
        &self,
        threshold_secs: i64,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        let cutoff = Utc::now().timestamp() + threshold_secs;

        let rows = sqlx::query_as::<_, ConnectionRow>(
            "SELECT provider, account, refresh_token, access_token, expires_at, scopes, created_at, updated_at
             FROM connections WHERE expires_at IS NULL OR expires_at < ?1
             ORDER BY provider ASC, account ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| self.decrypt_row(r)).collect()
    }

    // -- OAuth Handshake State --

    pub async fn save_oauth_state(
        &self,
        state: &str,
        provider: &str,
        account: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO oauth_states (state, provider, account, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (state) DO UPDATE SET
                provider   = excluded.provider,
                account    = excluded.account,
                created_at = excluded.created_at
            "#,
        )
        .bind(state)
        .bind(provider)
        .bind(account)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomic read-and-delete: the single DELETE..RETURNING statement
    /// guarantees a state is consumed at most once, even under concurrent
    /// callbacks. Entries past their TTL report absent (and are removed).
    pub async fn consume_oauth_state(
        &self,
        state: &str,
    ) -> Result<Option<(String, String)>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "DELETE FROM oauth_states WHERE state = ?1 RETURNING provider, account, created_at",
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(provider, account, created_at)| {
            if Utc::now().timestamp() - created_at > STATE_TTL_SECS {
                None
            } else {
                Some((provider, account))
            }
        }))
    }

    /// Sweep handshake states past their TTL. Returns how many were removed.
    pub async fn clean_oauth_states(&self) -> Result<u64, StoreError> {
        let cutoff = Utc::now().timestamp() - STATE_TTL_SECS;
        let result = sqlx::query("DELETE FROM oauth_states WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn decrypt_row(&self, row: ConnectionRow) -> Result<TokenRecord, StoreError> {
        let refresh_token = self.cipher.decrypt(&row.refresh_token)?;
        Ok(TokenRecord {
            provider: row.provider,
            account: row.account,
            refresh_token,
            access_token: row.access_token,
            expires_at: row.expires_at,
            scopes: row.scopes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Stable row id, also the externally visible connection id.
fn connection_id(provider: &str, account: &str) -> String {
    format!("{}:{}", provider, account)
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
    provider: String,
    account: String,
    refresh_token: String,
    access_token: Option<String>,
    expires_at: Option<i64>,
    scopes: Option<String>,
    created_at: i64,
    updated_at: i64,
}

#[derive(sqlx::FromRow)]
struct ConnectionListRow {
    provider: String,
    account: String,
    has_access_token: bool,
    expires_at: Option<i64>,
    scopes: Option<String>,
    created_at: i64,
    updated_at: i64,
}
