//! Rate store records: plans, seasonal rates, date overrides, dynamic rules
//! and promo codes.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_PLAN_PRIORITY: u8 = 10;

/// Override reason written by the dynamic pricing path
pub const DYNAMIC_PRICING_REASON: &str = "dynamic_pricing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePlanType {
    Standard,
    NonRefundable,
    Package,
    Corporate,
    Promotional,
    LastMinute,
    EarlyBird,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayOfWeekRates {
    #[serde(default)]
    pub monday: Option<Decimal>,
    #[serde(default)]
    pub tuesday: Option<Decimal>,
    #[serde(default)]
    pub wednesday: Option<Decimal>,
    #[serde(default)]
    pub thursday: Option<Decimal>,
    #[serde(default)]
    pub friday: Option<Decimal>,
    #[serde(default)]
    pub saturday: Option<Decimal>,
    #[serde(default)]
    pub sunday: Option<Decimal>,
}

impl DayOfWeekRates {
    pub fn for_weekday(&self, weekday: Weekday) -> Option<Decimal> {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    fn values(&self) -> impl Iterator<Item = Decimal> + '_ {
        [
            self.monday,
            self.tuesday,
            self.wednesday,
            self.thursday,
            self.friday,
            self.saturday,
            self.sunday,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatePlan {
    pub id: Uuid,
    pub hotel_id: String,
    pub room_type_id: String,
    pub name: String,
    pub plan_type: RatePlanType,
    pub base_rate: Decimal,
    pub base_currency: String,
    pub valid_from: NaiveDate,
    /// Inclusive
    pub valid_to: NaiveDate,
    #[serde(default)]
    pub day_of_week_rates: Option<DayOfWeekRates>,
    pub priority: u8,
    pub active: bool,
    #[serde(default)]
    pub blackout_dates: Vec<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RatePlan {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.valid_from <= date && date <= self.valid_to
    }

    pub fn is_blacked_out(&self, date: NaiveDate) -> bool {
        self.blackout_dates.contains(&date)
    }

    pub fn overlaps(&self, other: &RatePlan) -> bool {
        self.valid_from <= other.valid_to && other.valid_from <= self.valid_to
    }

    /// Field checks shared by create and update
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name cannot be empty".to_string());
        }
        if self.valid_from >= self.valid_to {
            return Err(format!(
                "validFrom {} must be before validTo {}",
                self.valid_from, self.valid_to
            ));
        }
        if self.priority > MAX_PLAN_PRIORITY {
            return Err(format!("priority must be between 0 and {}", MAX_PLAN_PRIORITY));
        }
        if self.base_rate <= Decimal::ZERO {
            return Err("baseRate must be positive".to_string());
        }
        if let Some(dow) = &self.day_of_week_rates {
            if dow.values().any(|rate| rate <= Decimal::ZERO) {
                return Err("dayOfWeekRates must be positive".to_string());
            }
        }
        Ok(())
    }
}

/// Returns the active plan that would share `plan`'s priority slot, if any.
///
/// At most one active plan per (hotel, room type, type) may hold a priority
/// for overlapping validity.
pub fn find_priority_conflict<'a>(existing: &'a [RatePlan], plan: &RatePlan) -> Option<&'a RatePlan> {
    if !plan.active {
        return None;
    }
    existing.iter().find(|other| {
        other.id != plan.id
            && other.active
            && other.hotel_id == plan.hotel_id
            && other.room_type_id == plan.room_type_id
            && other.plan_type == plan.plan_type
            && other.priority == plan.priority
            && other.overlaps(plan)
    })
}

/// Body of `createRatePlan`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRatePlan {
    pub room_type_id: String,
    pub name: String,
    pub plan_type: RatePlanType,
    pub base_rate: Decimal,
    pub base_currency: String,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    #[serde(default)]
    pub day_of_week_rates: Option<DayOfWeekRates>,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub blackout_dates: Vec<NaiveDate>,
}

/// Body of `updateRatePlan`; absent fields are unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatePlanPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_rate: Option<Decimal>,
    #[serde(default)]
    pub valid_from: Option<NaiveDate>,
    #[serde(default)]
    pub valid_to: Option<NaiveDate>,
    #[serde(default)]
    pub day_of_week_rates: Option<DayOfWeekRates>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub blackout_dates: Option<Vec<NaiveDate>>,
}

impl RatePlanPatch {
    pub fn apply(&self, plan: &RatePlan, now: DateTime<Utc>) -> RatePlan {
        let mut updated = plan.clone();
        if let Some(name) = &self.name {
            updated.name = name.clone();
        }
        if let Some(rate) = self.base_rate {
            updated.base_rate = rate;
        }
        if let Some(from) = self.valid_from {
            updated.valid_from = from;
        }
        if let Some(to) = self.valid_to {
            updated.valid_to = to;
        }
        if let Some(dow) = &self.day_of_week_rates {
            updated.day_of_week_rates = Some(dow.clone());
        }
        if let Some(priority) = self.priority {
            updated.priority = priority;
        }
        if let Some(blackouts) = &self.blackout_dates {
            updated.blackout_dates = blackouts.clone();
        }
        updated.updated_at = now;
        updated
    }
}

/// Exactly one of a replacement rate or a percentage discount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeasonalAdjustment {
    Rate(Decimal),
    /// Percentage off the base; negative values are surcharges
    DiscountPct(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonalRate {
    pub id: Uuid,
    pub hotel_id: String,
    /// None applies to every room type of the hotel
    #[serde(default)]
    pub room_type_id: Option<String>,
    pub season: String,
    pub start_date: NaiveDate,
    /// Inclusive
    pub end_date: NaiveDate,
    pub adjustment: SeasonalAdjustment,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl SeasonalRate {
    pub fn applies_to(&self, room_type_id: &str, date: NaiveDate) -> bool {
        self.active
            && self.start_date <= date
            && date <= self.end_date
            && self.room_type_id.as_deref().map_or(true, |rt| rt == room_type_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSeasonalRate {
    #[serde(default)]
    pub room_type_id: Option<String>,
    pub season: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub adjustment: SeasonalAdjustment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateOverride {
    pub id: Uuid,
    pub hotel_id: String,
    pub room_type_id: String,
    #[serde(default)]
    pub rate_plan_id: Option<Uuid>,
    pub date: NaiveDate,
    pub rate: Decimal,
    pub currency: String,
    pub reason: String,
    pub approved_by: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Body of `overrideRate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRateOverride {
    pub room_type_id: String,
    #[serde(default)]
    pub rate_plan_id: Option<Uuid>,
    pub date: NaiveDate,
    pub rate: Decimal,
    pub currency: String,
    pub reason: String,
    pub approved_by: String,
}

/// One item of `bulkUpdateRates`: a date-specific rate upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateUpdate {
    pub hotel_id: String,
    pub room_type_id: String,
    #[serde(default)]
    pub rate_plan_id: Option<Uuid>,
    pub date: NaiveDate,
    pub rate: Decimal,
    pub currency: String,
    #[serde(default = "default_bulk_reason")]
    pub reason: String,
    #[serde(default = "default_actor")]
    pub approved_by: String,
}

impl RateUpdate {
    /// Overrides are upserted on this key
    pub fn key(&self) -> (String, Option<Uuid>, NaiveDate) {
        (self.room_type_id.clone(), self.rate_plan_id, self.date)
    }

    pub fn validate_shape(&self) -> Result<(), String> {
        if self.room_type_id.trim().is_empty() {
            return Err("roomTypeId cannot be empty".to_string());
        }
        if self.rate <= Decimal::ZERO {
            return Err(format!("rate must be positive, got {}", self.rate));
        }
        Ok(())
    }
}

fn default_bulk_reason() -> String {
    "bulk_update".to_string()
}

fn default_actor() -> String {
    "system".to_string()
}

fn default_true() -> bool {
    true
}

/// Apply a bulk rate item onto the matching override (or create one)
pub fn apply_rate_update(
    current: Option<&RateOverride>,
    update: &RateUpdate,
    now: DateTime<Utc>,
) -> RateOverride {
    match current {
        Some(existing) => RateOverride {
            rate: update.rate,
            currency: update.currency.clone(),
            reason: update.reason.clone(),
            approved_by: update.approved_by.clone(),
            active: true,
            created_at: now,
            ..existing.clone()
        },
        None => RateOverride {
            id: Uuid::new_v4(),
            hotel_id: update.hotel_id.clone(),
            room_type_id: update.room_type_id.clone(),
            rate_plan_id: update.rate_plan_id,
            date: update.date,
            rate: update.rate,
            currency: update.currency.clone(),
            reason: update.reason.clone(),
            approved_by: update.approved_by.clone(),
            active: true,
            created_at: now,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicRuleType {
    Occupancy,
    Demand,
    LeadTime,
    DayOfWeek,
    LengthOfStay,
    DateRange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConditions {
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub days_of_week: Vec<Weekday>,
    /// Occupancy percentage bounds (0-100), inclusive
    #[serde(default)]
    pub min_occupancy_pct: Option<Decimal>,
    #[serde(default)]
    pub max_occupancy_pct: Option<Decimal>,
    #[serde(default)]
    pub demand_levels: Vec<DemandLevel>,
    #[serde(default)]
    pub min_lead_days: Option<i64>,
    #[serde(default)]
    pub max_lead_days: Option<i64>,
    #[serde(default)]
    pub min_nights: Option<u32>,
    #[serde(default)]
    pub max_nights: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleAdjustment {
    Multiply(Decimal),
    Add(Decimal),
    Cap {
        #[serde(default)]
        min: Option<Decimal>,
        #[serde(default)]
        max: Option<Decimal>,
    },
}

impl RuleAdjustment {
    pub fn apply(&self, amount: Decimal) -> Decimal {
        match *self {
            RuleAdjustment::Multiply(factor) => amount * factor,
            RuleAdjustment::Add(delta) => amount + delta,
            RuleAdjustment::Cap { min, max } => {
                let floored = min.map_or(amount, |m| amount.max(m));
                max.map_or(floored, |m| floored.min(m))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRule {
    pub id: Uuid,
    pub hotel_id: String,
    #[serde(default)]
    pub room_type_id: Option<String>,
    pub name: String,
    pub rule_type: DynamicRuleType,
    pub priority: u8,
    pub conditions: RuleConditions,
    pub adjustment: RuleAdjustment,
    pub active: bool,
}

/// Inputs a dynamic rule may look at for one night
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    pub date: NaiveDate,
    pub today: NaiveDate,
    pub nights: u32,
    pub occupancy_pct: Option<Decimal>,
    pub demand_level: Option<DemandLevel>,
}

impl DynamicRule {
    pub fn matches(&self, room_type_id: &str, ctx: &RuleContext) -> bool {
        if !self.active {
            return false;
        }
        if let Some(rt) = &self.room_type_id {
            if rt != room_type_id {
                return false;
            }
        }

        let c = &self.conditions;
        if c.date_from.is_some_and(|from| ctx.date < from) || c.date_to.is_some_and(|to| ctx.date > to) {
            return false;
        }
        if !c.days_of_week.is_empty() && !c.days_of_week.contains(&ctx.date.weekday()) {
            return false;
        }

        if c.min_occupancy_pct.is_some() || c.max_occupancy_pct.is_some() {
            let Some(occupancy) = ctx.occupancy_pct else {
                return false;
            };
            if c.min_occupancy_pct.is_some_and(|min| occupancy < min)
                || c.max_occupancy_pct.is_some_and(|max| occupancy > max)
            {
                return false;
            }
        }

        if !c.demand_levels.is_empty() {
            match ctx.demand_level {
                Some(level) if c.demand_levels.contains(&level) => {}
                _ => return false,
            }
        }

        let lead_days = (ctx.date - ctx.today).num_days();
        if c.min_lead_days.is_some_and(|min| lead_days < min)
            || c.max_lead_days.is_some_and(|max| lead_days > max)
        {
            return false;
        }

        if c.min_nights.is_some_and(|min| ctx.nights < min) || c.max_nights.is_some_and(|max| ctx.nights > max) {
            return false;
        }

        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDynamicRule {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub room_type_id: Option<String>,
    pub name: String,
    pub rule_type: DynamicRuleType,
    pub priority: u8,
    #[serde(default)]
    pub conditions: RuleConditions,
    pub adjustment: RuleAdjustment,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandLevel {
    Low,
    Normal,
    High,
    Peak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PromoDiscount {
    Percent(Decimal),
    Fixed(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoCode {
    #[serde(default)]
    pub hotel_id: String,
    pub code: String,
    pub discount: PromoDiscount,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    #[serde(default)]
    pub min_stay_value: Option<Decimal>,
    pub active: bool,
}

/// A priced date, as carried on `rate_update` envelopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatedRate {
    pub room_type_id: String,
    #[serde(default)]
    pub rate_plan_id: Option<Uuid>,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
}

impl From<&RateOverride> for DatedRate {
    fn from(ov: &RateOverride) -> Self {
        Self {
            room_type_id: ov.room_type_id.clone(),
            rate_plan_id: ov.rate_plan_id,
            date: ov.date,
            amount: ov.rate,
            currency: ov.currency.clone(),
        }
    }
}
