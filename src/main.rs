use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokenrelay::cli::{Cli, Commands, ConnectionCommands};
use tokenrelay::config::{self, Config};
use tokenrelay::crypto::Cipher;
use tokenrelay::lifecycle::TokenManager;
use tokenrelay::proxy::upstream::UpstreamClient;
use tokenrelay::registry::{self, ProviderRegistry};
use tokenrelay::store::TokenStore;
use tokenrelay::{api, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tokenrelay=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Cli::parse();
    let cfg = config::load()?;

    match args.command {
        Some(Commands::Serve { port }) => run_server(cfg, port).await,
        Some(Commands::Connections { command }) => {
            let store = open_store(&cfg).await?;
            handle_connections_command(&store, command).await
        }
        Some(Commands::Providers) => {
            let registry = load_registry(&cfg)?;
            if registry.is_empty() {
                println!("No providers configured.");
            } else {
                println!("{:<16} {:<24} SCOPES", "SLUG", "NAME");
                for p in registry.iter() {
                    println!("{:<16} {:<24} {}", p.slug, p.display_name, p.scopes.join(" "));
                }
            }
            Ok(())
        }
        None => run_server(cfg, None).await,
    }
}

async fn run_server(cfg: Config, port_override: Option<u16>) -> anyhow::Result<()> {
    let port = port_override.unwrap_or(cfg.port);

    let registry = load_registry(&cfg)?;
    if registry.is_empty() {
        tracing::warn!("provider registry is empty; only the management API will be useful");
    }

    tracing::info!("opening token store...");
    let store = open_store(&cfg).await?;

    let upstream = UpstreamClient::new(cfg.upstream_timeout_secs)?;
    let tokens = TokenManager::new(store.clone(), upstream.inner().clone());

    let state = Arc::new(AppState {
        store: store.clone(),
        registry: registry.clone(),
        tokens: tokens.clone(),
        upstream,
        config: cfg,
    });

    // Proactive refresh sweep; the first pass runs right away so tokens
    // that went stale while the process was down recover without traffic.
    let sweeper = jobs::refresh::spawn(store, registry, tokens);
    tracing::info!("background refresh sweep started (every 5m)");

    let app = api::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("tokenrelay listening on {}", addr);
    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}

fn load_registry(cfg: &Config) -> anyhow::Result<ProviderRegistry> {
    let raw = registry::load_file(&cfg.providers_file)?;
    let registry::RegistryLoad { registry, skipped } = registry::build(raw, &registry::env_snapshot());

    for s in &skipped {
        tracing::warn!(provider = %s.slug, reason = %s.reason, "provider excluded from registry");
    }
    tracing::info!(count = registry.len(), "provider registry loaded");

    Ok(registry)
}

/// The cipher is constructed before anything else touches the database:
/// a missing or malformed master key aborts startup here, before the
/// listener binds.
async fn open_store(cfg: &Config) -> anyhow::Result<TokenStore> {
    let cipher = Cipher::from_hex(&cfg.master_key)?;
    let store = TokenStore::connect(&cfg.database_url, cipher).await?;
    store.init().await?;
    Ok(store)
}

async fn handle_connections_command(
    store: &TokenStore,
    cmd: ConnectionCommands,
) -> anyhow::Result<()> {
    match cmd {
        ConnectionCommands::List => {
            let connections = store.list_connections().await?;
            if connections.is_empty() {
                println!("No connections stored.");
                return Ok(());
            }

            println!("{:<28} {:<10} {:<12} EXPIRES", "ID", "STATUS", "SCOPES");
            for c in connections {
                let expires = c
                    .expires_at
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<28} {:<10} {:<12} {}",
                    c.id,
                    c.status,
                    c.scopes.as_deref().unwrap_or("-"),
                    expires
                );
            }
        }
        ConnectionCommands::Revoke { provider, account } => {
            let removed = store.delete_token(&provider, &account).await?;
            if removed {
                println!("Connection {}:{} revoked.", provider, account);
            } else {
                println!("Connection {}:{} not found.", provider, account);
            }
        }
    }
    Ok(())
}
