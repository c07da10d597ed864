use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input to `getBestRate` and `getAllRates`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateQuery {
    pub room_type_id: String,
    pub stay_start: NaiveDate,
    /// Checkout date, exclusive
    pub stay_end: NaiveDate,
    #[serde(default = "default_guests")]
    pub guest_count: u32,
    #[serde(default)]
    pub promo_code: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub split_allowed: bool,
}

fn default_guests() -> u32 {
    1
}

impl RateQuery {
    pub fn single_night(room_type_id: &str, date: NaiveDate) -> Self {
        Self {
            room_type_id: room_type_id.to_string(),
            stay_start: date,
            stay_end: date.succ_opt().unwrap_or(date),
            guest_count: 1,
            promo_code: None,
            currency: None,
            split_allowed: false,
        }
    }
}

/// Layer that set the per-night base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Override,
    Plan,
    DayOfWeek,
    /// Nights priced from different layers
    Mixed,
}

impl RateSource {
    /// Source of a whole stay: the common source of its nights
    pub fn of_nights(nights: &[NightlyRate]) -> RateSource {
        let mut sources = nights.iter().map(|n| n.source);
        match sources.next() {
            Some(first) if sources.all(|s| s == first) => first,
            Some(_) => RateSource::Mixed,
            None => RateSource::Plan,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NightlyRate {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub source: RateSource,
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub applied_rules: Vec<String>,
    /// Demand multiplier applied from the forecast, if any
    #[serde(default)]
    pub demand_multiplier: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteComponents {
    pub source: RateSource,
    pub nights: Vec<NightlyRate>,
    /// Sum of nights before promo and conversion
    pub subtotal: Decimal,
    pub source_currency: String,
    #[serde(default)]
    pub exchange_rate: Option<Decimal>,
    #[serde(default)]
    pub stale_exchange_rate: bool,
    #[serde(default)]
    pub promo_code: Option<String>,
    #[serde(default)]
    pub promo_discount: Decimal,
    /// Set when a promo was given but did not apply
    #[serde(default)]
    pub promo_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub room_type_id: String,
    pub final_rate: Decimal,
    pub currency: String,
    pub plan_name: String,
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    pub components: QuoteComponents,
    pub valid_until: DateTime<Utc>,
    /// 0..=1
    pub confidence: Decimal,
}

/// One entry of a `compareRates` answer; each date carries its own result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateQuote {
    pub date: NaiveDate,
    pub result: crate::error::ResultKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<Quote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
