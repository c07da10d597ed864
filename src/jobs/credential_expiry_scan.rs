use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::jobs::job_status::{intervals, jobs};
use crate::jobs::spawn_per_hotel;
use crate::services::alerts::{Alert, AlertKind, AlertLog};
use crate::services::channel_registry::ChannelRegistry;
use crate::services::clock::Clock;
use crate::store::Store;

pub fn start_credential_expiry_scan_job(
    store: Arc<dyn Store>,
    registry: ChannelRegistry,
    alerts: AlertLog,
    clock: Arc<dyn Clock>,
    alert_days: i64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let job_clock = clock.clone();
    spawn_per_hotel(
        jobs::CREDENTIAL_EXPIRY_SCAN,
        Duration::from_secs(3600),
        intervals::CREDENTIAL_EXPIRY_SCAN,
        store,
        clock,
        cancel,
        move |hotel_id| {
            let registry = registry.clone();
            let alerts = alerts.clone();
            let clock = job_clock.clone();
            async move { run_credential_expiry_scan(&registry, &alerts, clock.as_ref(), alert_days, &hotel_id).await }
        },
    )
}

/// Alert on every active credential expiring within `alert_days`. Returns
/// the number of alerts raised.
pub async fn run_credential_expiry_scan(
    registry: &ChannelRegistry,
    alerts: &AlertLog,
    clock: &dyn Clock,
    alert_days: i64,
    hotel_id: &str,
) -> CoreResult<usize> {
    let now = clock.now();
    let expiring = registry
        .expiring_credentials(hotel_id, ChronoDuration::days(alert_days))
        .await?;

    for (config, credential) in &expiring {
        let Some(expires_at) = credential.expires_at else { continue };
        let message = if expires_at <= now {
            format!("credential {} expired at {}", credential.id, expires_at)
        } else {
            format!(
                "credential {} expires in {} days at {}",
                credential.id,
                (expires_at - now).num_days(),
                expires_at
            )
        };
        tracing::warn!(hotel_id, channel_id = %config.channel_id, credential_id = %credential.id, %expires_at, "Channel credential expiring");
        alerts.raise(Alert::new(AlertKind::CredentialExpiring, hotel_id, message, now).channel(&config.channel_id));
    }
    Ok(expiring.len())
}
