use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::jobs::job_status::{intervals, jobs};
use crate::jobs::spawn_per_hotel;
use crate::models::availability::AvailabilityRow;
use crate::services::clock::{date_range, hotel_today, Clock};
use crate::store::Store;

pub fn start_availability_rollout_job(
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    horizon_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let job_store = store.clone();
    let job_clock = clock.clone();
    spawn_per_hotel(
        jobs::AVAILABILITY_ROLLOUT,
        Duration::from_secs(3600),
        intervals::AVAILABILITY_ROLLOUT,
        store,
        clock,
        cancel,
        move |hotel_id| {
            let store = job_store.clone();
            let clock = job_clock.clone();
            async move { run_availability_rollout(&store, clock.as_ref(), horizon_days, &hotel_id).await }
        },
    )
}

/// Seed missing availability rows from today to the horizon. Existing rows
/// are left untouched. Returns the number of rows created.
pub async fn run_availability_rollout(
    store: &Arc<dyn Store>,
    clock: &dyn Clock,
    horizon_days: u32,
    hotel_id: &str,
) -> CoreResult<usize> {
    let hotel = store
        .get_hotel(hotel_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("hotel {}", hotel_id)))?;
    let today = hotel_today(clock, hotel.tz());
    let until = today + ChronoDuration::days(horizon_days as i64);
    let now = clock.now();

    let mut seeded = 0;
    for room_type in store.list_room_types(hotel_id).await? {
        let rows: Vec<AvailabilityRow> = date_range(today, until)
            .into_iter()
            .map(|date| AvailabilityRow::seeded(hotel_id, &room_type.code, date, room_type.total_rooms, now))
            .collect();
        seeded += store.seed_availability(rows).await?;
    }
    Ok(seeded)
}
