pub mod availability_rollout;
pub mod credential_expiry_scan;
pub mod event_dispatch;
pub mod forecast_refresh;
pub mod health_probe;
pub mod job_status;
pub mod rate_plan_rollover;

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::services::clock::Clock;
use crate::store::Store;

/// Run `run` for every hotel each `every`, skipping hotels whose last
/// success is younger than `min_interval_secs`. The first tick fires at
/// startup.
pub fn spawn_per_hotel<F, Fut>(
    job_name: &'static str,
    every: Duration,
    min_interval_secs: u64,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    run: F,
) -> JoinHandle<()>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoreResult<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(job = job_name, "Job stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let hotels = match store.list_hotels().await {
                Ok(hotels) => hotels,
                Err(e) => {
                    tracing::warn!(job = job_name, error = %e, "Failed to list hotels");
                    continue;
                }
            };

            for hotel in hotels {
                let now = clock.now();
                match job_status::should_run(&store, job_name, &hotel.id, now).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::warn!(job = job_name, hotel_id = %hotel.id, error = %e, "Failed to check job status, running anyway");
                    }
                }

                let recorded = match run(hotel.id.clone()).await {
                    Ok(count) => {
                        tracing::info!(job = job_name, hotel_id = %hotel.id, count, "Job run complete");
                        job_status::record_success(&store, job_name, &hotel.id, min_interval_secs, clock.now()).await
                    }
                    Err(e) => {
                        tracing::error!(job = job_name, hotel_id = %hotel.id, error = %e, "Job run failed");
                        job_status::record_failure(
                            &store,
                            job_name,
                            &hotel.id,
                            min_interval_secs,
                            clock.now(),
                            &e.to_string(),
                        )
                        .await
                    }
                };
                if let Err(e) = recorded {
                    tracing::warn!(job = job_name, hotel_id = %hotel.id, error = %e, "Failed to record job status");
                }
            }
        }
    })
}
