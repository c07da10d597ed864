use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::services::channel_registry::ChannelRegistry;
use crate::services::distributor::Distributor;
use crate::store::Store;

pub fn start_health_probe_job(
    store: Arc<dyn Store>,
    registry: ChannelRegistry,
    distributor: Distributor,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let hotels = match store.list_hotels().await {
                Ok(hotels) => hotels,
                Err(e) => {
                    tracing::warn!(error = %e, "Health probe could not list hotels");
                    continue;
                }
            };
            for hotel in hotels {
                if let Err(e) = probe_unhealthy(&registry, &distributor, &hotel.id).await {
                    tracing::warn!(hotel_id = %hotel.id, error = %e, "Health probe failed");
                }
            }
        }
    })
}

/// Probe every unhealthy channel of the hotel. Returns how many recovered.
pub async fn probe_unhealthy(registry: &ChannelRegistry, distributor: &Distributor, hotel_id: &str) -> CoreResult<usize> {
    let mut recovered = 0;
    for config in registry.list(hotel_id).await? {
        if config.is_unhealthy() && config.lifecycle.can_send() && distributor.probe(&config).await? {
            recovered += 1;
        }
    }
    Ok(recovered)
}
