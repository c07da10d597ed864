//! Demand forecasts consumed by the pricing engine.
//!
//! Forecasting itself is external; this module only defines the contract,
//! a pace-based default and the cache the refresh job fills.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::StoreError;
use crate::models::availability::AvailabilityRow;
use crate::models::rate_plan::DemandLevel;
use crate::services::cache::TtlCache;
use crate::store::Store;

/// Occupancy at which demand is considered normal
const TARGET_OCCUPANCY: Decimal = dec!(0.65);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandForecast {
    pub date: NaiveDate,
    /// 1.0 is normal demand
    pub demand_index: Decimal,
    pub level: DemandLevel,
    /// Price elasticity of demand, negative. `None` uses the configured fallback.
    #[serde(default)]
    pub elasticity: Option<Decimal>,
    /// Percent, 0..=100
    pub occupancy_pct: Decimal,
}

pub fn demand_level(index: Decimal) -> DemandLevel {
    if index < dec!(0.8) {
        DemandLevel::Low
    } else if index < dec!(1.1) {
        DemandLevel::Normal
    } else if index < dec!(1.3) {
        DemandLevel::High
    } else {
        DemandLevel::Peak
    }
}

/// Committed share of the row, in percent
pub fn occupancy_pct(row: &AvailabilityRow) -> Decimal {
    if row.total_rooms == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(row.sold_rooms + row.blocked_rooms) * dec!(100) / Decimal::from(row.total_rooms)
}

#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn forecast(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DemandForecast>, StoreError>;
}

/// Demand from booking pace: current occupancy against the target
pub struct OccupancyForecastProvider {
    store: Arc<dyn Store>,
}

impl OccupancyForecastProvider {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ForecastProvider for OccupancyForecastProvider {
    async fn forecast(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DemandForecast>, StoreError> {
        let rows = self
            .store
            .list_availability(hotel_id, Some(room_type_id), from, to)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let occupancy = occupancy_pct(row);
                let index = (occupancy / dec!(100) / TARGET_OCCUPANCY).clamp(dec!(0.5), dec!(2.0));
                DemandForecast {
                    date: row.date,
                    demand_index: index.round_dp(4),
                    level: demand_level(index),
                    elasticity: None,
                    occupancy_pct: occupancy.round_dp(2),
                }
            })
            .collect())
    }
}

pub type ForecastKey = (String, String, NaiveDate);

/// Forecasts by (hotel, room type, date)
#[derive(Clone)]
pub struct ForecastCache {
    cache: TtlCache<ForecastKey, DemandForecast>,
}

impl ForecastCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache: TtlCache::new(
                "demand_forecasts",
                config.max_capacity,
                Duration::from_secs(config.forecast_ttl_secs),
            ),
        }
    }

    pub async fn get(&self, hotel_id: &str, room_type_id: &str, date: NaiveDate) -> Option<DemandForecast> {
        self.cache
            .get(&(hotel_id.to_string(), room_type_id.to_string(), date))
            .await
    }

    pub async fn put(&self, hotel_id: &str, room_type_id: &str, forecast: DemandForecast) {
        self.cache
            .insert((hotel_id.to_string(), room_type_id.to_string(), forecast.date), forecast)
            .await;
    }
}
