//! OAuth authorization-code flow: the `start` and `callback` endpoints
//! that mint stored connections.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::lifecycle::TokenManager;
use crate::store::sqlite::DEFAULT_ACCOUNT;
use crate::AppState;

#[derive(Deserialize)]
pub struct StartParams {
    pub account: Option<String>,
}

#[derive(Serialize)]
pub struct StartResponse {
    pub authorize_url: String,
    pub provider: String,
    pub account: String,
}

/// POST /auth/:provider/start — produce an authorization URL and persist
/// the handshake state binding it to `(provider, account)`.
pub async fn start(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<StartParams>,
) -> Result<Json<StartResponse>, AppError> {
    let cfg = state
        .registry
        .get(&provider)
        .ok_or_else(|| AppError::UnknownProvider(provider.clone()))?;

    let account = params
        .account
        .unwrap_or_else(|| DEFAULT_ACCOUNT.to_string());
    let handshake = Uuid::new_v4().simple().to_string();

    state
        .store
        .save_oauth_state(&handshake, &provider, &account)
        .await?;

    let redirect_uri = callback_uri(&state.config.public_url, &provider);
    let mut authorize_url = url::Url::parse(&cfg.auth_url)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("bad auth_url in registry: {}", e)))?;
    {
        let mut qs = authorize_url.query_pairs_mut();
        qs.append_pair("response_type", "code");
        qs.append_pair("client_id", &cfg.client_id);
        qs.append_pair("redirect_uri", &redirect_uri);
        if !cfg.scopes.is_empty() {
            qs.append_pair("scope", &cfg.scopes.join(" "));
        }
        qs.append_pair("state", &handshake);
        for (k, v) in &cfg.extra_params {
            qs.append_pair(k, v);
        }
    }

    tracing::info!(provider = %provider, account = %account, "authorization flow started");

    Ok(Json(StartResponse {
        authorize_url: authorize_url.into(),
        provider,
        account,
    }))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /auth/:provider/callback — consume the handshake state, run the
/// code exchange, and store the resulting connection.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<Value>, AppError> {
    let cfg = state
        .registry
        .get(&provider)
        .ok_or_else(|| AppError::UnknownProvider(provider.clone()))?;

    // The provider reported a denial before any exchange could happen.
    if let Some(err) = params.error {
        return Err(AppError::OAuthExchangeFailed {
            status: None,
            detail: err,
        });
    }

    let handshake = params.state.ok_or(AppError::InvalidState)?;
    let (bound_provider, account) = state
        .store
        .consume_oauth_state(&handshake)
        .await?
        .ok_or(AppError::InvalidState)?;
    if bound_provider != provider {
        return Err(AppError::InvalidState);
    }

    let code = params.code.ok_or(AppError::InvalidState)?;
    let redirect_uri = callback_uri(&state.config.public_url, &provider);
    let token = state.tokens.code_exchange(cfg, &code, &redirect_uri).await?;

    let refresh_token = token.refresh_token.ok_or(AppError::MissingRefreshToken)?;
    let expires_at = TokenManager::expiry_from_now(token.expires_in);

    state
        .store
        .store_token(
            &provider,
            &account,
            &refresh_token,
            Some(&token.access_token),
            Some(expires_at),
            token.scope.as_deref(),
        )
        .await?;

    tracing::info!(provider = %provider, account = %account, "connection established");

    Ok(Json(json!({
        "status": "connected",
        "provider": provider,
        "account": account,
    })))
}

fn callback_uri(public_url: &str, provider: &str) -> String {
    format!(
        "{}/auth/{}/callback",
        public_url.trim_end_matches('/'),
        provider
    )
}
