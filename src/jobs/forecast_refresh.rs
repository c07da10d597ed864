use chrono::Duration as ChronoDuration;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::jobs::job_status::{intervals, jobs};
use crate::jobs::spawn_per_hotel;
use crate::models::rate_plan::{RateUpdate, DYNAMIC_PRICING_REASON};
use crate::services::clock::{hotel_today, Clock};
use crate::services::forecast::{ForecastCache, ForecastProvider};
use crate::services::pricing::PricingEngine;
use crate::store::{OutboxSpec, Store};

const DYNAMIC_PRIORITY: u8 = 3;
const SYSTEM_ACTOR: &str = "system";

/// Everything one refresh needs
#[derive(Clone)]
pub struct ForecastRefresh {
    pub store: Arc<dyn Store>,
    pub provider: Arc<dyn ForecastProvider>,
    pub forecasts: ForecastCache,
    pub pricing: PricingEngine,
    pub clock: Arc<dyn Clock>,
    pub horizon_days: u32,
    pub auto_apply: bool,
    pub max_attempts: u32,
}

impl ForecastRefresh {
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.store.clone();
        let clock = self.clock.clone();
        spawn_per_hotel(
            jobs::FORECAST_REFRESH,
            Duration::from_secs(600),
            intervals::FORECAST_REFRESH,
            store,
            clock,
            cancel,
            move |hotel_id| {
                let job = self.clone();
                async move { job.run(&hotel_id).await }
            },
        )
    }

    /// Refresh demand for every room type across the horizon. With auto
    /// apply on, rule-driven prices are written as overrides. Returns the
    /// number of forecasts cached.
    pub async fn run(&self, hotel_id: &str) -> CoreResult<usize> {
        let hotel = self
            .store
            .get_hotel(hotel_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("hotel {}", hotel_id)))?;
        let from = hotel_today(self.clock.as_ref(), hotel.tz());
        let to = from + ChronoDuration::days(self.horizon_days as i64);

        let mut cached = 0;
        for room_type in self.store.list_room_types(hotel_id).await? {
            let forecasts = self.provider.forecast(hotel_id, &room_type.code, from, to).await?;
            for forecast in forecasts {
                self.forecasts.put(hotel_id, &room_type.code, forecast).await;
                cached += 1;
            }

            if self.auto_apply {
                self.apply_suggestions(hotel_id, &room_type.code, from, to).await?;
            }
        }
        Ok(cached)
    }

    async fn apply_suggestions(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    ) -> CoreResult<()> {
        // hand-set overrides win over suggestions
        let pinned: HashSet<_> = self
            .store
            .list_rate_overrides(hotel_id, room_type_id, from, to)
            .await?
            .into_iter()
            .filter(|o| o.active && o.reason != DYNAMIC_PRICING_REASON)
            .map(|o| o.date)
            .collect();

        let updates: Vec<RateUpdate> = self
            .pricing
            .dynamic_rate_suggestions(hotel_id, room_type_id, from, to)
            .await?
            .into_iter()
            .filter(|r| !pinned.contains(&r.date))
            .map(|r| RateUpdate {
                hotel_id: hotel_id.to_string(),
                room_type_id: r.room_type_id,
                rate_plan_id: r.rate_plan_id,
                date: r.date,
                rate: r.amount,
                currency: r.currency,
                reason: DYNAMIC_PRICING_REASON.to_string(),
                approved_by: SYSTEM_ACTOR.to_string(),
            })
            .collect();
        if updates.is_empty() {
            return Ok(());
        }

        let outbox = OutboxSpec::new(DYNAMIC_PRIORITY, self.max_attempts).with_reason(DYNAMIC_PRICING_REASON);
        let summary = self
            .store
            .commit_rates(hotel_id, &updates, outbox, self.clock.now())
            .await?;
        tracing::info!(
            hotel_id,
            room_type_id,
            upserted = summary.upserted,
            modified = summary.modified,
            "Applied dynamic rate suggestions"
        );
        Ok(())
    }
}
