//! tokenrelay — reach any OAuth2-protected API through one long-lived
//! credential instead of managing per-provider token refresh.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! drive the same router through [`api::router`].

pub mod api;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod jobs;
pub mod lifecycle;
pub mod models;
pub mod proxy;
pub mod registry;
pub mod store;

use config::Config;
use lifecycle::TokenManager;
use proxy::upstream::UpstreamClient;
use registry::ProviderRegistry;
use store::TokenStore;

/// Shared application state passed to handlers and jobs. Constructed once
/// at process start; every long-lived collaborator lives here.
pub struct AppState {
    pub store: TokenStore,
    pub registry: ProviderRegistry,
    pub tokens: TokenManager,
    pub upstream: UpstreamClient,
    pub config: Config,
}
