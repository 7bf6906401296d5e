use std::path::PathBuf;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// sqlx connection string, e.g. `sqlite:tokenrelay.db`.
    pub database_url: String,
    /// 64-char hex AES-256 key. Required; there is no insecure fallback.
    pub master_key: String,
    pub providers_file: PathBuf,
    /// Externally reachable base URL, used to build OAuth redirect URIs.
    pub public_url: String,
    /// Total upstream request timeout (transport default, overridable).
    pub upstream_timeout_secs: u64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let master_key = std::env::var("TOKENRELAY_MASTER_KEY").map_err(|_| {
        anyhow::anyhow!(
            "TOKENRELAY_MASTER_KEY is not set. Generate one with `openssl rand -hex 32`."
        )
    })?;

    let port: u16 = std::env::var("TOKENRELAY_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8787);

    Ok(Config {
        port,
        database_url: std::env::var("TOKENRELAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:tokenrelay.db".into()),
        master_key,
        providers_file: std::env::var("TOKENRELAY_PROVIDERS_FILE")
            .unwrap_or_else(|_| "providers.yaml".into())
            .into(),
        public_url: std::env::var("TOKENRELAY_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port)),
        upstream_timeout_secs: std::env::var("TOKENRELAY_UPSTREAM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30),
    })
}
