//! Rate store commands: hotels, room types, plans, seasonal rates, overrides,
//! dynamic rules and promo codes.
//!
//! Commands that change a sellable price publish a `rate_update` for the
//! affected dates inside the distribution horizon.

use chrono::{Duration as ChronoDuration, NaiveDate};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::event::{EventPayload, EventType, NewEvent};
use crate::models::hotel::{Hotel, RoomType};
use crate::models::rate_plan::{
    DynamicRule, NewDynamicRule, NewRateOverride, NewRatePlan, NewSeasonalRate, PromoCode, PromoDiscount, RateOverride,
    RatePlan, RatePlanPatch, RateUpdate, SeasonalAdjustment, SeasonalRate,
};
use crate::services::clock::{hotel_today, Clock};
use crate::services::currency::validate_code;
use crate::services::event_bus::EventBus;
use crate::services::pricing::PricingEngine;
use crate::store::{OutboxSpec, Store};

pub const PLAN_CHANGE_PRIORITY: u8 = 3;
pub const OVERRIDE_PRIORITY: u8 = 2;

#[derive(Clone)]
pub struct RatePlanService {
    store: Arc<dyn Store>,
    pricing: PricingEngine,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    horizon_days: u32,
}

impl RatePlanService {
    pub fn new(
        store: Arc<dyn Store>,
        pricing: PricingEngine,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        horizon_days: u32,
    ) -> Self {
        Self {
            store,
            pricing,
            bus,
            clock,
            horizon_days,
        }
    }

    pub async fn upsert_hotel(&self, hotel: Hotel) -> CoreResult<Hotel> {
        if hotel.id.trim().is_empty() {
            return Err(CoreError::Validation("hotel id cannot be empty".to_string()));
        }
        if hotel.timezone.parse::<Tz>().is_err() {
            return Err(CoreError::Validation(format!("unknown timezone {}", hotel.timezone)));
        }
        validate_code(&hotel.base_currency)?;
        let saved = self.store.upsert_hotel(hotel).await?;
        tracing::info!(hotel_id = %saved.id, "Hotel saved");
        Ok(saved)
    }

    pub async fn upsert_room_type(&self, hotel_id: &str, mut room_type: RoomType) -> CoreResult<RoomType> {
        self.hotel(hotel_id).await?;
        room_type.hotel_id = hotel_id.to_string();
        if room_type.code.trim().is_empty() {
            return Err(CoreError::Validation("room type code cannot be empty".to_string()));
        }
        if room_type.max_occupancy == 0 {
            return Err(CoreError::Validation("maxOccupancy must be at least 1".to_string()));
        }
        if room_type.base_rate <= Decimal::ZERO {
            return Err(CoreError::Validation("baseRate must be positive".to_string()));
        }
        validate_code(&room_type.base_currency)?;
        let saved = self.store.upsert_room_type(room_type).await?;
        tracing::info!(hotel_id, room_type_id = %saved.code, "Room type saved");
        Ok(saved)
    }

    pub async fn create_rate_plan(&self, hotel_id: &str, input: NewRatePlan) -> CoreResult<RatePlan> {
        self.room_type(hotel_id, &input.room_type_id).await?;
        validate_code(&input.base_currency)?;
        let now = self.clock.now();
        let plan = RatePlan {
            id: Uuid::new_v4(),
            hotel_id: hotel_id.to_string(),
            room_type_id: input.room_type_id,
            name: input.name,
            plan_type: input.plan_type,
            base_rate: input.base_rate,
            base_currency: input.base_currency,
            valid_from: input.valid_from,
            valid_to: input.valid_to,
            day_of_week_rates: input.day_of_week_rates,
            priority: input.priority,
            active: true,
            blackout_dates: input.blackout_dates,
            created_at: now,
            updated_at: now,
        };
        plan.validate().map_err(CoreError::Validation)?;

        let saved = self.store.save_rate_plan(plan).await?;
        tracing::info!(hotel_id, plan_id = %saved.id, room_type_id = %saved.room_type_id, "Rate plan created");
        self.publish(hotel_id, &saved.room_type_id, saved.valid_from, saved.valid_to, "rate_plan_created")
            .await;
        Ok(saved)
    }

    pub async fn update_rate_plan(&self, hotel_id: &str, plan_id: Uuid, patch: RatePlanPatch) -> CoreResult<RatePlan> {
        let current = self.plan(hotel_id, plan_id).await?;
        let updated = patch.apply(&current, self.clock.now());
        updated.validate().map_err(CoreError::Validation)?;

        let saved = self.store.save_rate_plan(updated).await?;
        tracing::info!(hotel_id, %plan_id, "Rate plan updated");
        let from = current.valid_from.min(saved.valid_from);
        let to = current.valid_to.max(saved.valid_to);
        self.publish(hotel_id, &saved.room_type_id, from, to, "rate_plan_updated").await;
        Ok(saved)
    }

    pub async fn deactivate_rate_plan(&self, hotel_id: &str, plan_id: Uuid) -> CoreResult<RatePlan> {
        let mut plan = self.plan(hotel_id, plan_id).await?;
        if !plan.active {
            return Ok(plan);
        }
        plan.active = false;
        plan.updated_at = self.clock.now();

        let saved = self.store.save_rate_plan(plan).await?;
        tracing::info!(hotel_id, %plan_id, "Rate plan deactivated");
        self.publish(hotel_id, &saved.room_type_id, saved.valid_from, saved.valid_to, "rate_plan_deactivated")
            .await;
        Ok(saved)
    }

    /// Date override, written with its `rate_update` in one transaction
    pub async fn override_rate(&self, hotel_id: &str, input: NewRateOverride) -> CoreResult<RateOverride> {
        self.room_type(hotel_id, &input.room_type_id).await?;
        validate_code(&input.currency)?;
        if let Some(plan_id) = input.rate_plan_id {
            self.plan(hotel_id, plan_id).await?;
        }
        let update = RateUpdate {
            hotel_id: hotel_id.to_string(),
            room_type_id: input.room_type_id.clone(),
            rate_plan_id: input.rate_plan_id,
            date: input.date,
            rate: input.rate,
            currency: input.currency,
            reason: input.reason,
            approved_by: input.approved_by,
        };
        update.validate_shape().map_err(CoreError::Validation)?;

        let outbox = OutboxSpec::new(OVERRIDE_PRIORITY, self.bus.config().max_attempts).with_reason("rate_override");
        self.store
            .commit_rates(hotel_id, std::slice::from_ref(&update), outbox, self.clock.now())
            .await?;

        let saved = self
            .store
            .list_rate_overrides(hotel_id, &update.room_type_id, update.date, update.date)
            .await?
            .into_iter()
            .find(|o| o.active && o.rate_plan_id == update.rate_plan_id)
            .ok_or_else(|| CoreError::Internal("override missing after commit".to_string()))?;
        tracing::info!(
            hotel_id,
            override_id = %saved.id,
            room_type_id = %saved.room_type_id,
            date = %saved.date,
            approved_by = %saved.approved_by,
            "Rate override saved"
        );
        Ok(saved)
    }

    pub async fn delete_rate_override(&self, hotel_id: &str, override_id: Uuid) -> CoreResult<RateOverride> {
        let mut rate_override = self
            .store
            .get_rate_override(hotel_id, override_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("rate override {}", override_id)))?;
        rate_override.active = false;

        let saved = self.store.save_rate_override(rate_override).await?;
        tracing::info!(hotel_id, %override_id, "Rate override removed");
        self.publish(hotel_id, &saved.room_type_id, saved.date, saved.date, "rate_override_removed")
            .await;
        Ok(saved)
    }

    pub async fn create_seasonal_rate(&self, hotel_id: &str, input: NewSeasonalRate) -> CoreResult<SeasonalRate> {
        self.hotel(hotel_id).await?;
        if let Some(room_type_id) = &input.room_type_id {
            self.room_type(hotel_id, room_type_id).await?;
        }
        if input.start_date > input.end_date {
            return Err(CoreError::Validation(format!(
                "startDate {} is after endDate {}",
                input.start_date, input.end_date
            )));
        }
        match input.adjustment {
            SeasonalAdjustment::Rate(rate) if rate <= Decimal::ZERO => {
                return Err(CoreError::Validation("seasonal rate must be positive".to_string()))
            }
            SeasonalAdjustment::DiscountPct(pct) if pct >= Decimal::ONE_HUNDRED => {
                return Err(CoreError::Validation("discountPct must be below 100".to_string()))
            }
            _ => {}
        }

        let rate = SeasonalRate {
            id: Uuid::new_v4(),
            hotel_id: hotel_id.to_string(),
            room_type_id: input.room_type_id,
            season: input.season,
            start_date: input.start_date,
            end_date: input.end_date,
            adjustment: input.adjustment,
            active: true,
        };
        let saved = self.store.save_seasonal_rate(rate).await?;
        tracing::info!(hotel_id, season = %saved.season, "Seasonal rate saved");

        let room_types = match &saved.room_type_id {
            Some(room_type_id) => vec![room_type_id.clone()],
            None => self
                .store
                .list_room_types(hotel_id)
                .await?
                .into_iter()
                .map(|rt| rt.code)
                .collect(),
        };
        for room_type_id in room_types {
            self.publish(hotel_id, &room_type_id, saved.start_date, saved.end_date, "seasonal_rate_created")
                .await;
        }
        Ok(saved)
    }

    pub async fn upsert_dynamic_rule(&self, hotel_id: &str, input: NewDynamicRule) -> CoreResult<DynamicRule> {
        self.hotel(hotel_id).await?;
        if input.name.trim().is_empty() {
            return Err(CoreError::Validation("rule name cannot be empty".to_string()));
        }
        let c = &input.conditions;
        if let (Some(from), Some(to)) = (c.date_from, c.date_to) {
            if from > to {
                return Err(CoreError::Validation("dateFrom is after dateTo".to_string()));
            }
        }
        if let (Some(min), Some(max)) = (c.min_occupancy_pct, c.max_occupancy_pct) {
            if min > max {
                return Err(CoreError::Validation("minOccupancyPct exceeds maxOccupancyPct".to_string()));
            }
        }

        let rule = DynamicRule {
            id: input.id.unwrap_or_else(Uuid::new_v4),
            hotel_id: hotel_id.to_string(),
            room_type_id: input.room_type_id,
            name: input.name,
            rule_type: input.rule_type,
            priority: input.priority,
            conditions: input.conditions,
            adjustment: input.adjustment,
            active: input.active,
        };
        let saved = self.store.save_dynamic_rule(rule).await?;
        tracing::info!(hotel_id, rule_id = %saved.id, rule_type = ?saved.rule_type, "Dynamic rule saved");
        Ok(saved)
    }

    pub async fn upsert_promo_code(&self, hotel_id: &str, mut promo: PromoCode) -> CoreResult<PromoCode> {
        self.hotel(hotel_id).await?;
        promo.hotel_id = hotel_id.to_string();
        promo.code = promo.code.trim().to_uppercase();
        if promo.code.is_empty() {
            return Err(CoreError::Validation("promo code cannot be empty".to_string()));
        }
        if promo.valid_from > promo.valid_to {
            return Err(CoreError::Validation("validFrom is after validTo".to_string()));
        }
        match promo.discount {
            PromoDiscount::Percent(p) if p <= Decimal::ZERO || p > Decimal::ONE_HUNDRED => {
                return Err(CoreError::Validation("percent discount must be in (0, 100]".to_string()))
            }
            PromoDiscount::Fixed(amount) if amount <= Decimal::ZERO => {
                return Err(CoreError::Validation("fixed discount must be positive".to_string()))
            }
            _ => {}
        }
        let saved = self.store.save_promo_code(promo).await?;
        tracing::info!(hotel_id, code = %saved.code, "Promo code saved");
        Ok(saved)
    }

    /// Publish current sellable rates for `from..=to`, clipped to today and
    /// the horizon. Returns the event id when anything was published.
    pub async fn publish_rates(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        reason: &str,
    ) -> CoreResult<Option<Uuid>> {
        let tz = self
            .store
            .get_hotel(hotel_id)
            .await?
            .map(|h| h.tz())
            .unwrap_or(Tz::UTC);
        let today = hotel_today(self.clock.as_ref(), tz);
        let from = from.max(today);
        let to = to.min(today + ChronoDuration::days(self.horizon_days as i64));
        if from > to {
            return Ok(None);
        }

        let rates = self.pricing.nightly_rates(hotel_id, room_type_id, from, to).await?;
        if rates.is_empty() {
            return Ok(None);
        }
        let event = NewEvent::new(
            EventType::RateUpdate,
            hotel_id,
            EventPayload::Rates { rates },
            PLAN_CHANGE_PRIORITY,
        )
        .with_reason(reason);
        Ok(Some(self.bus.enqueue(event).await?.id))
    }

    async fn publish(&self, hotel_id: &str, room_type_id: &str, from: NaiveDate, to: NaiveDate, reason: &str) {
        if let Err(e) = self.publish_rates(hotel_id, room_type_id, from, to, reason).await {
            tracing::warn!(hotel_id, room_type_id, reason, error = %e, "Could not publish rates");
        }
    }

    async fn hotel(&self, hotel_id: &str) -> CoreResult<Hotel> {
        self.store
            .get_hotel(hotel_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("hotel {}", hotel_id)))
    }

    async fn room_type(&self, hotel_id: &str, room_type_id: &str) -> CoreResult<RoomType> {
        self.store
            .get_room_type(hotel_id, room_type_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("room type {} of hotel {}", room_type_id, hotel_id)))
    }

    async fn plan(&self, hotel_id: &str, plan_id: Uuid) -> CoreResult<RatePlan> {
        self.store
            .get_rate_plan(hotel_id, plan_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("rate plan {}", plan_id)))
    }
}
