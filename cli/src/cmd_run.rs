//! `chainhook run`: the poller and the delivery worker on their own schedules,
//! sharing one store, until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use chainhook_core::clock::{Clock, SystemClock};
use chainhook_core::config::ChainhookConfig;
use chainhook_core::scheduler::Scheduler;
use chainhook_core::store::Store;
use chainhook_delivery::{DeliveryWorker, HttpWebhookSender};
use chainhook_evm::chains::resolve_endpoints;
use chainhook_evm::{ChainClientPool, Poller};
use chainhook_storage::SqliteStorage;

pub async fn run(config: ChainhookConfig) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(
        SqliteStorage::open(&config.database_url)
            .await
            .with_context(|| format!("opening {}", config.database_url))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let endpoints = resolve_endpoints(&config.chains);
    info!(chains = endpoints.len(), database = %config.database_url, "starting chainhook");
    let pool = Arc::new(ChainClientPool::http(endpoints, config.rpc_timeout()));
    let poller = Poller::new(pool, store.clone(), config.poller.clone(), clock.clone());

    let sender = Arc::new(HttpWebhookSender::new(
        config.delivery.timeout(),
        config.delivery.response_body_limit,
    )?);
    let worker = DeliveryWorker::new(store, sender, &config.delivery, clock.clone());
    worker.recover_interrupted().await?;

    let shutdown = CancellationToken::new();
    let poll_schedule = Scheduler::new(config.poller.interval(), clock.clone());
    let delivery_schedule = Scheduler::new(config.delivery.interval(), clock);

    let signal = {
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "could not listen for Ctrl-C");
            }
            info!("shutting down after the current cycles");
            shutdown.cancel();
        }
    };

    tokio::join!(
        poll_schedule.run(&poller, shutdown.clone()),
        delivery_schedule.run(&worker, shutdown.clone()),
        signal,
    );
    info!("stopped");
    Ok(())
}
