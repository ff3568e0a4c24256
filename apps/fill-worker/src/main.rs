use std::sync::Arc;
use std::time::Duration;

use core_lib::adapters::{InMemoryStorage, SyncedStorage};
use core_lib::domain::Tenant;
use core_lib::services::{ProcTenantFn, TableService, TenantService};
use core_lib::Storage;
use dotenvy::dotenv;
use futures_util::FutureExt;
use gateway::in_memory::InMemoryGatewayHub;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::Config;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize tracing (logging)
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()) // Allow RUST_LOG
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting Fill Worker v{}...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    info!(?config, "Configuration loaded");

    // --- Wiring ---
    // Single-executable mode: in-memory store and gateway hub. Swapping in
    // persistent adapters only changes this block.
    let hub = Arc::new(InMemoryGatewayHub::default());
    let backing = Arc::new(InMemoryStorage::new());
    let storage = SyncedStorage::with_staleness(backing, config.cache_staleness);
    storage.sync().await?;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let tenant_service = TenantService::new(Arc::clone(&storage), hub.clone());
    let table_service = TableService::new(Arc::clone(&storage), hub.clone());

    if let Some((id, credential)) = &config.seed_tenant {
        hub.add_credential(credential).await;
        let tenant = Tenant::new(id, credential)?;
        tenant_service.register(tenant).await?;
        info!(tenant = %id, "Seed tenant registered");
    }

    let proc_tenant: ProcTenantFn = {
        let table_service = table_service.clone();
        Arc::new(move |tenant| {
            let table_service = table_service.clone();
            async move { table_service.proc_tenant(tenant).await }.boxed()
        })
    };

    run(
        tenant_service,
        proc_tenant,
        config.proc_tenant_count,
        config.tick_pause,
        async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(%err, "Couldn't listen for the shutdown signal");
            }
        },
    )
    .await;

    info!("Fill Worker shut down.");
    Ok(())
}

/// Scheduling loop: one claim cycle per tick until `shutdown` resolves.
///
/// The shutdown future is polled by reference across ticks, so a signal
/// arriving mid-cycle is picked up at the next await point instead of
/// being dropped with a per-tick listener.
async fn run(
    tenants: TenantService,
    proc_tenant: ProcTenantFn,
    count: usize,
    tick_pause: Duration,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal.");
                return;
            }
            _ = tokio::time::sleep(tick_pause) => {
                if let Err(err) = tenants.process_oldest(count, Arc::clone(&proc_tenant)).await {
                    // A failed claim leaves every cursor unstamped; the next
                    // tick retries the same batch.
                    error!(%err, "Scheduling cycle failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway::RateLimiter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn loop_runs_cycles_until_shutdown_resolves() {
        let hub = Arc::new(InMemoryGatewayHub::new(Arc::new(RateLimiter::new(
            10_000, 10_000,
        ))));
        hub.add_credential("secret").await;
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let tenants = TenantService::new(Arc::clone(&storage), hub.clone());
        tenants
            .register(Tenant::new("ws-1", "secret").unwrap())
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let proc: ProcTenantFn = {
            let calls = Arc::clone(&calls);
            Arc::new(move |tenant| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(tenant)
                }
                .boxed()
            })
        };

        // Three ticks elapse, then the shutdown resolves between ticks.
        // The single pinned shutdown future must end the loop even though
        // cycles ran in between.
        run(
            tenants,
            proc,
            10,
            Duration::from_millis(1000),
            tokio::time::sleep(Duration::from_millis(3500)),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
