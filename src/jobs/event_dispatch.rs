//! Workers draining the event queue, and the reaper reclaiming leases of
//! crashed or stuck deliveries.

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::services::distributor::Distributor;
use crate::services::event_bus::EventBus;

pub fn start_dispatch_workers(
    distributor: Distributor,
    workers: usize,
    batch: usize,
    poll: Duration,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|worker| {
            let distributor = distributor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tracing::info!(worker, "Dispatch worker started");
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let leased = match distributor.dispatch_due(batch).await {
                        Ok(leased) => leased,
                        Err(e) => {
                            tracing::warn!(worker, error = %e, "Dispatch round failed");
                            0
                        }
                    };
                    // full batches go straight to the next round
                    if leased < batch {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = sleep(poll) => {}
                        }
                    }
                }
                tracing::info!(worker, "Dispatch worker stopped");
            })
        })
        .collect()
}

pub fn start_lease_reaper(bus: EventBus, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if let Err(e) = bus.reclaim_expired().await {
                tracing::warn!(error = %e, "Lease reaper failed");
            }
        }
    })
}
