use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::jobs::job_status::{intervals, jobs};
use crate::jobs::spawn_per_hotel;
use crate::services::clock::{hotel_today, Clock};
use crate::services::rate_plans::RatePlanService;
use crate::store::Store;

pub const ROLLOVER_REASON: &str = "rate_plan_rollover";

pub fn start_rate_plan_rollover_job(
    store: Arc<dyn Store>,
    plans: RatePlanService,
    clock: Arc<dyn Clock>,
    publish_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let job_store = store.clone();
    let job_clock = clock.clone();
    spawn_per_hotel(
        jobs::RATE_PLAN_ROLLOVER,
        Duration::from_secs(3600),
        intervals::RATE_PLAN_ROLLOVER,
        store,
        clock,
        cancel,
        move |hotel_id| {
            let store = job_store.clone();
            let plans = plans.clone();
            let clock = job_clock.clone();
            async move { run_rate_plan_rollover(&store, &plans, clock.as_ref(), publish_days, &hotel_id).await }
        },
    )
}

/// Deactivate plans that ended before today and publish the next
/// `publish_days` of rates for every room type. Returns how many plans were
/// deactivated.
pub async fn run_rate_plan_rollover(
    store: &Arc<dyn Store>,
    plans: &RatePlanService,
    clock: &dyn Clock,
    publish_days: u32,
    hotel_id: &str,
) -> CoreResult<usize> {
    let hotel = store
        .get_hotel(hotel_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("hotel {}", hotel_id)))?;
    let today = hotel_today(clock, hotel.tz());

    let mut deactivated = 0;
    for plan in store.list_rate_plans(hotel_id, None).await? {
        if plan.active && plan.valid_to < today {
            plans.deactivate_rate_plan(hotel_id, plan.id).await?;
            deactivated += 1;
        }
    }

    let until = today + ChronoDuration::days(publish_days.saturating_sub(1) as i64);
    for room_type in store.list_room_types(hotel_id).await? {
        plans
            .publish_rates(hotel_id, &room_type.code, today, until, ROLLOVER_REASON)
            .await?;
    }

    tracing::info!(hotel_id, %today, deactivated, "Rate plan rollover complete");
    Ok(deactivated)
}
