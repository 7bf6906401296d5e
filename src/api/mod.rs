use std::sync::Arc;

use axum::{
    routing::{any, delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::proxy::forward;
use crate::AppState;

pub mod auth;
pub mod handlers;

/// Build the full application router. The binary serves exactly this;
/// integration tests drive it directly.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/providers", get(handlers::list_providers))
        .route("/connections", get(handlers::list_connections))
        .route(
            "/connections/:provider/:account",
            delete(handlers::delete_connection),
        )
        .route("/auth/:provider/start", post(auth::start))
        .route("/auth/:provider/callback", get(auth::callback))
        .route("/proxy/:provider/*path", any(forward::proxy_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
