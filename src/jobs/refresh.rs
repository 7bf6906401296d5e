//! Background job: proactive access-token refresh.
//!
//! Sweeps every 5 minutes for connections expiring within the next 10
//! minutes and refreshes them ahead of inbound traffic. Expired OAuth
//! handshake states are pruned on the same tick.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::{TokenManager, SWEEP_BUFFER_SECS};
use crate::registry::ProviderRegistry;
use crate::store::{StoreError, TokenStore};

const SWEEP_PERIOD: Duration = Duration::from_secs(300);

/// Spawn the refresh sweep. The first tick fires immediately. The loop
/// awaits each sweep before asking for the next tick and missed ticks are
/// skipped, so two sweeps can never run concurrently. Abort the handle at
/// shutdown.
pub fn spawn(
    store: TokenStore,
    registry: ProviderRegistry,
    manager: TokenManager,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(SWEEP_PERIOD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = run_sweep(&store, &registry, &manager).await {
                tracing::error!("refresh sweep failed: {}", e);
            }
        }
    })
}

/// Run one sweep. Per-record failures are logged and never abort the pass;
/// only the initial candidate query can fail the sweep as a whole.
pub async fn run_sweep(
    store: &TokenStore,
    registry: &ProviderRegistry,
    manager: &TokenManager,
) -> Result<(), StoreError> {
    let due = store.tokens_needing_refresh(SWEEP_BUFFER_SECS).await?;
    if !due.is_empty() {
        tracing::debug!(count = due.len(), "refresh sweep: tokens nearing expiry");
    }

    for record in due {
        let provider = record.provider.clone();
        let account = record.account.clone();

        let Some(cfg) = registry.get(&provider) else {
            tracing::warn!(
                provider = %provider,
                account = %account,
                "refresh sweep: provider not in registry, skipping"
            );
            continue;
        };

        match manager.refresh(cfg, record).await {
            Ok(_) => tracing::info!(
                provider = %provider,
                account = %account,
                "refresh sweep: token refreshed"
            ),
            Err(e) => tracing::warn!(
                provider = %provider,
                account = %account,
                "refresh sweep: refresh failed: {}",
                e
            ),
        }
    }

    match store.clean_oauth_states().await {
        Ok(0) => {}
        Ok(n) => tracing::debug!(count = n, "refresh sweep: pruned expired oauth states"),
        Err(e) => tracing::warn!("refresh sweep: state cleanup failed: {}", e),
    }

    Ok(())
}
