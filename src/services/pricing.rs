//! Pricing engine.
//!
//! Per night the base comes from an active override (which ends the
//! lookup) or from the best covering plan, refined by day-of-week rate,
//! seasonal rate, dynamic rules and the demand forecast. Nights are
//! converted to the requested currency and rounded once, banker's style.

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::PricingConfig;
use crate::error::{CoreError, PricingError, ResultKind, StoreError};
use crate::models::availability::AvailabilityRow;
use crate::models::channel::ConversionMethod;
use crate::models::hotel::{Hotel, RoomType};
use crate::models::quote::{DateQuote, NightlyRate, Quote, QuoteComponents, RateQuery, RateSource};
use crate::models::rate_plan::{
    DatedRate, DynamicRule, DynamicRuleType, PromoDiscount, RateOverride, RatePlan, RuleContext, SeasonalAdjustment,
    SeasonalRate,
};
use crate::services::clock::{hotel_today, stay_nights, Clock};
use crate::services::currency::{precision_for, validate_code, with_scale, CurrencyService};
use crate::services::forecast::{occupancy_pct, ForecastCache};
use crate::store::Store;

const MIN_DEMAND_MULTIPLIER: Decimal = dec!(0.80);
const MAX_DEMAND_MULTIPLIER: Decimal = dec!(1.30);

/// `1 + (index - 1) / |elasticity|`, clamped
pub fn demand_multiplier(demand_index: Decimal, elasticity: Decimal) -> Decimal {
    let elasticity = elasticity.abs();
    if elasticity.is_zero() {
        return Decimal::ONE;
    }
    (Decimal::ONE + (demand_index - Decimal::ONE) / elasticity).clamp(MIN_DEMAND_MULTIPLIER, MAX_DEMAND_MULTIPLIER)
}

pub fn apply_promo(subtotal: Decimal, discount: PromoDiscount) -> Decimal {
    match discount {
        PromoDiscount::Percent(pct) => subtotal * (Decimal::ONE - pct / dec!(100)),
        PromoDiscount::Fixed(amount) => (subtotal - amount).max(Decimal::ZERO),
    }
}

fn round_final(amount: Decimal, currency: &str) -> Decimal {
    let precision = precision_for(currency);
    with_scale(
        amount.round_dp_with_strategy(precision, RoundingStrategy::MidpointNearestEven),
        precision,
    )
}

/// Highest priority active plan covering `date`; ties go to the latest update
fn best_plan(plans: &[RatePlan], date: NaiveDate) -> Option<&RatePlan> {
    plans
        .iter()
        .filter(|p| p.active && p.covers(date))
        .max_by_key(|p| (p.priority, p.updated_at))
}

/// Everything needed to price one room type over a date range
struct Catalog {
    hotel: Hotel,
    room_type: RoomType,
    plans: Vec<RatePlan>,
    seasonal: Vec<SeasonalRate>,
    overrides: Vec<RateOverride>,
    /// Active rules, highest priority first
    rules: Vec<DynamicRule>,
    rows: HashMap<NaiveDate, AvailabilityRow>,
    today: NaiveDate,
}

impl Catalog {
    fn find_override(&self, date: NaiveDate, plan_id: Option<Uuid>) -> Option<&RateOverride> {
        self.overrides
            .iter()
            .filter(|o| o.active && o.date == date)
            .filter(|o| o.rate_plan_id.is_none() || o.rate_plan_id == plan_id)
            .max_by_key(|o| (o.rate_plan_id.is_some(), o.created_at))
    }

    fn find_seasonal(&self, date: NaiveDate) -> Option<&SeasonalRate> {
        self.seasonal
            .iter()
            .filter(|s| s.applies_to(&self.room_type.code, date))
            .max_by_key(|s| (s.room_type_id.is_some(), s.start_date))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StayOptions {
    split_allowed: bool,
    ignore_overrides: bool,
}

/// One night before conversion
struct RawNight {
    rate: NightlyRate,
    currency: String,
    forecast_used: bool,
    fallback_elasticity: bool,
}

/// Priced stay in the target currency
struct StayPrice {
    nights: Vec<NightlyRate>,
    plan: Option<RatePlan>,
    source_currency: String,
    exchange_rate: Option<Decimal>,
    stale_fx: bool,
    forecast_used: bool,
    fallback_elasticity: bool,
}

#[derive(Clone)]
pub struct PricingEngine {
    store: Arc<dyn Store>,
    currency: CurrencyService,
    forecasts: ForecastCache,
    clock: Arc<dyn Clock>,
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(
        store: Arc<dyn Store>,
        currency: CurrencyService,
        forecasts: ForecastCache,
        clock: Arc<dyn Clock>,
        config: PricingConfig,
    ) -> Self {
        Self {
            store,
            currency,
            forecasts,
            clock,
            config,
        }
    }

    async fn load_catalog(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Catalog, PricingError> {
        let hotel = self
            .store
            .get_hotel(hotel_id)
            .await?
            .ok_or_else(|| PricingError::Store(StoreError::NotFound(format!("hotel {}", hotel_id))))?;
        let room_type = self
            .store
            .get_room_type(hotel_id, room_type_id)
            .await?
            .ok_or_else(|| PricingError::RoomTypeNotFound(room_type_id.to_string()))?;

        let plans = self.store.list_rate_plans(hotel_id, Some(room_type_id)).await?;
        let seasonal = self.store.list_seasonal_rates(hotel_id).await?;
        let overrides = self
            .store
            .list_rate_overrides(hotel_id, room_type_id, from, to)
            .await?;
        let mut rules: Vec<DynamicRule> = self
            .store
            .list_dynamic_rules(hotel_id)
            .await?
            .into_iter()
            .filter(|r| r.active)
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let rows = self
            .store
            .list_availability(hotel_id, Some(room_type_id), from, to)
            .await?
            .into_iter()
            .map(|row| (row.date, row))
            .collect();

        let today = hotel_today(self.clock.as_ref(), hotel.tz());

        Ok(Catalog {
            hotel,
            room_type,
            plans,
            seasonal,
            overrides,
            rules,
            rows,
            today,
        })
    }

    async fn price_night(
        &self,
        catalog: &Catalog,
        date: NaiveDate,
        plan: &RatePlan,
        stay_length: u32,
    ) -> RawNight {
        let mut amount = plan.base_rate;
        let mut source = RateSource::Plan;
        if let Some(rate) = plan
            .day_of_week_rates
            .as_ref()
            .and_then(|dow| dow.for_weekday(date.weekday()))
        {
            amount = rate;
            source = RateSource::DayOfWeek;
        }

        let season = catalog.find_seasonal(date).map(|seasonal| {
            amount = match seasonal.adjustment {
                SeasonalAdjustment::Rate(rate) => rate,
                SeasonalAdjustment::DiscountPct(pct) => amount * (Decimal::ONE - pct / dec!(100)),
            };
            seasonal.season.clone()
        });

        let forecast = self
            .forecasts
            .get(&catalog.hotel.id, &catalog.room_type.code, date)
            .await;
        let ctx = RuleContext {
            date,
            today: catalog.today,
            nights: stay_length,
            occupancy_pct: catalog
                .rows
                .get(&date)
                .map(occupancy_pct)
                .or_else(|| forecast.as_ref().map(|f| f.occupancy_pct)),
            demand_level: forecast.as_ref().map(|f| f.level),
        };

        let mut applied_rules = Vec::new();
        let mut seen: HashSet<DynamicRuleType> = HashSet::new();
        for rule in &catalog.rules {
            if seen.contains(&rule.rule_type) || !rule.matches(&catalog.room_type.code, &ctx) {
                continue;
            }
            amount = rule.adjustment.apply(amount);
            seen.insert(rule.rule_type);
            applied_rules.push(rule.name.clone());
        }

        let mut demand = None;
        let mut fallback_elasticity = false;
        if let Some(forecast) = forecast.as_ref().filter(|_| !seen.contains(&DynamicRuleType::Demand)) {
            let elasticity = match forecast.elasticity.filter(|e| !e.is_zero()) {
                Some(e) => e,
                None => {
                    fallback_elasticity = true;
                    self.config.fallback_elasticity
                }
            };
            let multiplier = demand_multiplier(forecast.demand_index, elasticity);
            amount *= multiplier;
            demand = Some(multiplier);
        }

        tracing::debug!(
            hotel_id = %catalog.hotel.id,
            room_type_id = %catalog.room_type.code,
            %date,
            %amount,
            plan = %plan.name,
            rules = applied_rules.len(),
            "Priced night"
        );

        RawNight {
            rate: NightlyRate {
                date,
                amount,
                source,
                plan_id: Some(plan.id),
                season,
                applied_rules,
                demand_multiplier: demand,
            },
            currency: plan.base_currency.clone(),
            forecast_used: forecast.is_some(),
            fallback_elasticity,
        }
    }

    /// Price every night of `start..end`. `forced_plan` pins the plan (used by
    /// `all_rates`); `target` is the output currency, `None` keeps the source.
    async fn price_stay(
        &self,
        catalog: &Catalog,
        start: NaiveDate,
        end: NaiveDate,
        forced_plan: Option<&RatePlan>,
        target: Option<&str>,
        options: StayOptions,
    ) -> Result<StayPrice, PricingError> {
        let nights = stay_nights(start, end);
        let stay_length = nights.len() as u32;
        let stay_plan = forced_plan.or_else(|| best_plan(&catalog.plans, start));

        let mut raw_nights = Vec::with_capacity(nights.len());
        for date in nights {
            if catalog.rows.get(&date).is_some_and(|row| row.stop_sell) {
                return Err(PricingError::BlackedOut {
                    room_type_id: catalog.room_type.code.clone(),
                    date,
                });
            }

            let rate_override = if options.ignore_overrides {
                None
            } else {
                catalog.find_override(date, stay_plan.map(|p| p.id))
            };
            if let Some(rate_override) = rate_override {
                raw_nights.push(RawNight {
                    rate: NightlyRate {
                        date,
                        amount: rate_override.rate,
                        source: RateSource::Override,
                        plan_id: rate_override.rate_plan_id,
                        season: None,
                        applied_rules: Vec::new(),
                        demand_multiplier: None,
                    },
                    currency: rate_override.currency.clone(),
                    forecast_used: false,
                    fallback_elasticity: false,
                });
                continue;
            }

            let plan = match stay_plan {
                Some(plan) if plan.covers(date) => plan,
                _ if options.split_allowed && forced_plan.is_none() => {
                    best_plan(&catalog.plans, date).ok_or_else(|| PricingError::NoRatePlan {
                        room_type_id: catalog.room_type.code.clone(),
                        date,
                    })?
                }
                Some(plan) => {
                    return Err(PricingError::PlanExpired {
                        plan: plan.name.clone(),
                        date,
                    })
                }
                None => {
                    return Err(PricingError::NoRatePlan {
                        room_type_id: catalog.room_type.code.clone(),
                        date,
                    })
                }
            };
            if plan.is_blacked_out(date) {
                return Err(PricingError::BlackedOut {
                    room_type_id: catalog.room_type.code.clone(),
                    date,
                });
            }

            raw_nights.push(self.price_night(catalog, date, plan, stay_length).await);
        }

        let source_currency = raw_nights
            .first()
            .map(|n| n.currency.clone())
            .unwrap_or_else(|| catalog.room_type.base_currency.clone());

        let mut priced = StayPrice {
            nights: Vec::with_capacity(raw_nights.len()),
            plan: stay_plan.cloned(),
            source_currency,
            exchange_rate: None,
            stale_fx: false,
            forecast_used: false,
            fallback_elasticity: false,
        };
        for raw in raw_nights {
            let mut rate = raw.rate;
            let output_currency = target.unwrap_or(&raw.currency);
            if output_currency != raw.currency {
                let conversion = self
                    .currency
                    .convert(rate.amount, &raw.currency, output_currency, ConversionMethod::DailyCached)
                    .await?;
                rate.amount = conversion.amount;
                priced.exchange_rate = Some(conversion.rate);
                priced.stale_fx |= conversion.stale;
            }
            rate.amount = round_final(rate.amount, output_currency);
            priced.forecast_used |= raw.forecast_used;
            priced.fallback_elasticity |= raw.fallback_elasticity;
            priced.nights.push(rate);
        }

        Ok(priced)
    }

    fn confidence(priced: &StayPrice) -> Decimal {
        let mut confidence = Decimal::ONE;
        if priced.stale_fx {
            confidence -= dec!(0.2);
        }
        if priced.forecast_used {
            confidence -= dec!(0.1);
        }
        if priced.fallback_elasticity {
            confidence -= dec!(0.1);
        }
        confidence.max(Decimal::ZERO)
    }

    fn check_query(query: &RateQuery) -> Result<(), PricingError> {
        if query.room_type_id.trim().is_empty() {
            return Err(PricingError::InvalidQuery("roomTypeId is required".to_string()));
        }
        if query.stay_start >= query.stay_end {
            return Err(PricingError::InvalidQuery(format!(
                "stayStart {} must be before stayEnd {}",
                query.stay_start, query.stay_end
            )));
        }
        if query.guest_count == 0 {
            return Err(PricingError::InvalidQuery("guestCount must be at least 1".to_string()));
        }
        Ok(())
    }

    fn target_currency(query: &RateQuery, hotel: &Hotel) -> Result<String, PricingError> {
        let code = query.currency.clone().unwrap_or_else(|| hotel.base_currency.clone());
        validate_code(&code).map_err(|_| PricingError::UnknownCurrency(code.clone()))?;
        Ok(code)
    }

    async fn build_quote(
        &self,
        catalog: &Catalog,
        query: &RateQuery,
        forced_plan: Option<&RatePlan>,
    ) -> Result<Quote, PricingError> {
        if query.guest_count > catalog.room_type.max_occupancy {
            return Err(PricingError::ExceedsOccupancy {
                guests: query.guest_count,
                max: catalog.room_type.max_occupancy,
            });
        }
        let currency = Self::target_currency(query, &catalog.hotel)?;

        let priced = self
            .price_stay(
                catalog,
                query.stay_start,
                query.stay_end,
                forced_plan,
                Some(&currency),
                StayOptions {
                    split_allowed: query.split_allowed,
                    ignore_overrides: false,
                },
            )
            .await?;

        let subtotal: Decimal = priced.nights.iter().map(|n| n.amount).sum();
        let mut final_rate = subtotal;
        let mut promo_discount = Decimal::ZERO;
        let mut promo_note = None;
        if let Some(code) = query.promo_code.as_deref() {
            match self
                .validate_promo(&catalog.hotel.id, code, subtotal, query.stay_start, query.stay_end)
                .await
            {
                Ok(discount) => {
                    final_rate = round_final(apply_promo(subtotal, discount), &currency);
                    promo_discount = subtotal - final_rate;
                }
                Err(PricingError::PromoInvalid(reason)) => {
                    tracing::debug!(hotel_id = %catalog.hotel.id, code, %reason, "Promo not applicable");
                    promo_note = Some(reason);
                }
                Err(other) => return Err(other),
            }
        }

        let source = RateSource::of_nights(&priced.nights);
        let plan_name = match (&priced.plan, source) {
            (_, RateSource::Override) | (None, _) => "Rate override".to_string(),
            (Some(plan), _) => plan.name.clone(),
        };
        let confidence = Self::confidence(&priced);

        Ok(Quote {
            room_type_id: catalog.room_type.code.clone(),
            final_rate: with_scale(final_rate, precision_for(&currency)),
            currency,
            plan_name,
            plan_id: priced.plan.as_ref().map(|p| p.id),
            components: QuoteComponents {
                source,
                nights: priced.nights,
                subtotal,
                source_currency: priced.source_currency,
                exchange_rate: priced.exchange_rate,
                stale_exchange_rate: priced.stale_fx,
                promo_code: query.promo_code.clone(),
                promo_discount,
                promo_note,
            },
            valid_until: self.clock.now() + ChronoDuration::seconds(self.config.quote_valid_secs),
            confidence,
        })
    }

    /// Best applicable rate for a stay
    pub async fn best_rate(&self, hotel_id: &str, query: &RateQuery) -> Result<Quote, PricingError> {
        Self::check_query(query)?;
        let last_night = query.stay_end - ChronoDuration::days(1);
        let catalog = self
            .load_catalog(hotel_id, &query.room_type_id, query.stay_start, last_night)
            .await?;
        self.build_quote(&catalog, query, None).await
    }

    /// One quote per active plan covering the stay, cheapest first
    pub async fn all_rates(&self, hotel_id: &str, query: &RateQuery) -> Result<Vec<Quote>, PricingError> {
        Self::check_query(query)?;
        let last_night = query.stay_end - ChronoDuration::days(1);
        let catalog = self
            .load_catalog(hotel_id, &query.room_type_id, query.stay_start, last_night)
            .await?;

        let mut quotes = Vec::new();
        for plan in catalog
            .plans
            .iter()
            .filter(|p| p.active && p.covers(query.stay_start) && p.covers(last_night))
        {
            match self.build_quote(&catalog, query, Some(plan)).await {
                Ok(quote) => quotes.push(quote),
                Err(
                    err @ (PricingError::ExceedsOccupancy { .. }
                    | PricingError::UnknownCurrency(_)
                    | PricingError::Currency(_)
                    | PricingError::Store(_)),
                ) => return Err(err),
                Err(err) => {
                    tracing::debug!(hotel_id, plan = %plan.name, error = %err, "Plan skipped");
                }
            }
        }
        quotes.sort_by(|a, b| a.final_rate.cmp(&b.final_rate));
        Ok(quotes)
    }

    /// One-night quote per date, each with its own result
    pub async fn compare_rates(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        dates: &[NaiveDate],
        currency: Option<&str>,
    ) -> Vec<DateQuote> {
        let mut out = Vec::with_capacity(dates.len());
        for date in dates {
            let mut query = RateQuery::single_night(room_type_id, *date);
            query.currency = currency.map(str::to_string);
            let entry = match self.best_rate(hotel_id, &query).await {
                Ok(quote) => DateQuote {
                    date: *date,
                    result: ResultKind::Ok,
                    quote: Some(quote),
                    error: None,
                },
                Err(err) => {
                    let message = err.to_string();
                    let core: CoreError = err.into();
                    DateQuote {
                        date: *date,
                        result: core.kind(),
                        quote: None,
                        error: Some(message),
                    }
                }
            };
            out.push(entry);
        }
        out
    }

    /// Sellable nightly rates in the plan currency, for `rate_update`
    /// payloads. Dates with no price are left out.
    pub async fn nightly_rates(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DatedRate>, PricingError> {
        self.dated_rates(hotel_id, room_type_id, from, to, false).await
    }

    async fn dated_rates(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        ignore_overrides: bool,
    ) -> Result<Vec<DatedRate>, PricingError> {
        let catalog = self.load_catalog(hotel_id, room_type_id, from, to).await?;
        let mut rates = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            let Some(next) = date.succ_opt() else { break };
            let priced = self
                .price_stay(
                    &catalog,
                    date,
                    next,
                    None,
                    None,
                    StayOptions {
                        split_allowed: true,
                        ignore_overrides,
                    },
                )
                .await;
            match priced {
                Ok(mut priced) => {
                    if let Some(night) = priced.nights.pop() {
                        let currency = if night.source == RateSource::Override {
                            catalog
                                .find_override(date, None)
                                .map(|o| o.currency.clone())
                                .unwrap_or(priced.source_currency)
                        } else {
                            priced.source_currency
                        };
                        if ignore_overrides && night.applied_rules.is_empty() && night.demand_multiplier.is_none() {
                            continue;
                        }
                        rates.push(DatedRate {
                            room_type_id: room_type_id.to_string(),
                            rate_plan_id: if night.source == RateSource::Override {
                                None
                            } else {
                                night.plan_id
                            },
                            date,
                            amount: night.amount,
                            currency,
                        });
                    }
                }
                Err(err) => {
                    tracing::debug!(hotel_id, room_type_id, %date, error = %err, "No rate for date");
                }
            }
        }
        Ok(rates)
    }

    /// Rates moved by dynamic rules or demand, computed without overrides
    pub async fn dynamic_rate_suggestions(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DatedRate>, PricingError> {
        self.dated_rates(hotel_id, room_type_id, from, to, true).await
    }

    /// Discount for `code` if it applies to this stay
    pub async fn validate_promo(
        &self,
        hotel_id: &str,
        code: &str,
        stay_value: Decimal,
        stay_start: NaiveDate,
        stay_end: NaiveDate,
    ) -> Result<PromoDiscount, PricingError> {
        let promo = self
            .store
            .get_promo_code(hotel_id, &code.to_uppercase())
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| PricingError::PromoInvalid(format!("unknown or inactive promo code {}", code)))?;

        let last_night = stay_end - ChronoDuration::days(1);
        if stay_start < promo.valid_from || last_night > promo.valid_to {
            return Err(PricingError::PromoInvalid(format!(
                "promo code {} is valid from {} to {}",
                promo.code, promo.valid_from, promo.valid_to
            )));
        }
        if let Some(min) = promo.min_stay_value {
            if stay_value < min {
                return Err(PricingError::PromoInvalid(format!(
                    "promo code {} requires a stay value of at least {}",
                    promo.code, min
                )));
            }
        }
        Ok(promo.discount)
    }
}
