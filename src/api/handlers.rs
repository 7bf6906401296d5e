use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::token::Connection;
use crate::AppState;

#[derive(Serialize)]
pub struct ProviderSummary {
    pub slug: String,
    pub display_name: String,
    pub scopes: Vec<String>,
}

/// GET /providers — providers available in the registry. Credentials are
/// not part of the projection.
pub async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderSummary>> {
    Json(
        state
            .registry
            .iter()
            .map(|p| ProviderSummary {
                slug: p.slug.clone(),
                display_name: p.display_name.clone(),
                scopes: p.scopes.clone(),
            })
            .collect(),
    )
}

/// GET /connections — all stored connections, refresh tokens omitted.
pub async fn list_connections(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Connection>>, AppError> {
    Ok(Json(state.store.list_connections().await?))
}

/// DELETE /connections/:provider/:account — revoke a stored connection.
/// Deleting an absent record is not an error.
pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Path((provider, account)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let removed = state.store.delete_token(&provider, &account).await?;

    tracing::info!(provider = %provider, account = %account, removed, "connection revoked");

    Ok(Json(json!({
        "provider": provider,
        "account": account,
        "removed": removed,
    })))
}
