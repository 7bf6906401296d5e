use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::crypto::CipherError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("no stored connection for provider '{provider}'")]
    NoConnection { provider: String },

    /// The provider rejected the refresh grant, or the token endpoint was
    /// unreachable. `status` is the upstream HTTP status when there was one.
    #[error("token refresh failed: {detail}")]
    RefreshFailed {
        status: Option<u16>,
        detail: String,
    },

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("oauth state missing, expired, or bound to a different provider")]
    InvalidState,

    #[error("provider did not return a refresh token")]
    MissingRefreshToken,

    #[error("authorization code exchange failed: {detail}")]
    OAuthExchangeFailed {
        status: Option<u16>,
        detail: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CipherError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::UnknownProvider(slug) => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "unknown_provider",
                format!("no provider registered under '{}'", slug),
            ),
            AppError::NoConnection { provider } => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "no_connection",
                format!(
                    "no stored connection for provider '{}'; complete the auth flow first",
                    provider
                ),
            ),
            AppError::RefreshFailed { status, detail } => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "token_refresh_failed",
                match status {
                    Some(s) => format!("provider rejected the token refresh ({}): {}", s, detail),
                    None => format!("token refresh failed: {}", detail),
                },
            ),
            AppError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_failed",
                e.clone(),
            ),
            AppError::InvalidState => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_state",
                "oauth state missing, expired, or bound to a different provider".to_string(),
            ),
            AppError::MissingRefreshToken => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "missing_refresh_token",
                "provider did not return a refresh token; re-authorize requesting offline access"
                    .to_string(),
            ),
            AppError::OAuthExchangeFailed { status, detail } => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "oauth_exchange_failed",
                match status {
                    Some(s) => format!("authorization code exchange failed ({}): {}", s, detail),
                    None => format!("authorization code exchange failed: {}", detail),
                },
            ),
            AppError::Store(StoreError::Unavailable(e)) => {
                tracing::error!("storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "storage_unavailable",
                    "storage unavailable".to_string(),
                )
            }
            AppError::Store(StoreError::Crypto(e)) | AppError::Crypto(e) => {
                tracing::error!("credential decryption error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "decryption_failed",
                    "stored credential could not be decrypted".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
