//! HTTP client for forwarding requests to upstream provider APIs.

use std::time::Duration;

use bytes::Bytes;

use crate::errors::AppError;

pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self { client })
    }

    /// The shared client, reused for token-endpoint calls so the whole
    /// process keeps one connection pool.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Exactly one attempt; a transport failure maps straight to
    /// [`AppError::Upstream`], never a retry.
    pub async fn forward(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: reqwest::header::HeaderMap,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response, AppError> {
        let mut req = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            req = req.body(body);
        }

        req.send().await.map_err(|e| {
            tracing::warn!("upstream request failed: {}", e);
            AppError::Upstream(e.to_string())
        })
    }
}
