//! Exchange rates, channel markups and rounding.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, CurrencyConfig};
use crate::error::CurrencyError;
use crate::models::channel::{ConversionMethod, RoundingPolicy, SupportedCurrency};
use crate::models::currency::{Conversion, ExchangeRate};
use crate::services::cache::TtlCache;
use crate::services::clock::Clock;

lazy_static! {
    static ref CURRENCY_CODE: Regex = Regex::new(r"^[A-Z]{3}$").unwrap();
    static ref KNOWN_CODES: HashSet<&'static str> = [
        "AED", "ARS", "AUD", "BGN", "BHD", "BRL", "CAD", "CHF", "CLP", "CNY", "COP", "CZK", "DKK", "EGP", "EUR",
        "GBP", "HKD", "HUF", "IDR", "ILS", "INR", "ISK", "JOD", "JPY", "KES", "KRW", "KWD", "MAD", "MXN", "MYR",
        "NOK", "NZD", "OMR", "PEN", "PHP", "PKR", "PLN", "QAR", "RON", "RSD", "RUB", "SAR", "SEK", "SGD", "THB",
        "TND", "TRY", "TWD", "UAH", "USD", "VND", "ZAR",
    ]
    .into_iter()
    .collect();
}

/// `code` if it is an uppercase ISO-4217 code we know
pub fn validate_code(code: &str) -> Result<&str, CurrencyError> {
    if CURRENCY_CODE.is_match(code) && KNOWN_CODES.contains(code) {
        Ok(code)
    } else {
        Err(CurrencyError::InvalidCode(code.to_string()))
    }
}

/// Minor units of a currency
pub fn precision_for(code: &str) -> u32 {
    match code {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
        _ => 2,
    }
}

pub fn round_amount(amount: Decimal, policy: RoundingPolicy, precision: u32) -> Decimal {
    match policy {
        RoundingPolicy::Up => amount.round_dp_with_strategy(precision, RoundingStrategy::ToPositiveInfinity),
        RoundingPolicy::Down => amount.round_dp_with_strategy(precision, RoundingStrategy::ToNegativeInfinity),
        RoundingPolicy::Nearest => amount.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero),
        RoundingPolicy::None => amount,
    }
}

/// Amounts shown to guests keep trailing zeros up to the currency precision
pub fn with_scale(mut amount: Decimal, precision: u32) -> Decimal {
    if amount.scale() < precision {
        amount.rescale(precision);
    }
    amount
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<ExchangeRate, CurrencyError>;
}

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    rates: HashMap<String, Decimal>,
}

/// Rate provider speaking the common `/latest?base=&symbols=` shape
#[derive(Clone)]
pub struct HttpRateProvider {
    client: Client,
    base_url: String,
    clock: Arc<dyn Clock>,
}

impl HttpRateProvider {
    pub fn new(base_url: String, clock: Arc<dyn Clock>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url,
            clock,
        }
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<ExchangeRate, CurrencyError> {
        let url = format!("{}/latest", self.base_url.trim_end_matches('/'));
        tracing::debug!(from, to, "Fetching exchange rate");

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .query(&[("base", from), ("symbols", to)])
            .send()
            .await
            .map_err(|e| CurrencyError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CurrencyError::Provider(format!(
                "rate provider returned {}",
                response.status()
            )));
        }

        let body: LatestRatesResponse = response
            .json()
            .await
            .map_err(|e| CurrencyError::Provider(e.to_string()))?;
        let rate = body
            .rates
            .get(to)
            .copied()
            .ok_or_else(|| CurrencyError::Provider(format!("no {} rate in response", to)))?;

        Ok(ExchangeRate {
            from: from.to_string(),
            to: to.to_string(),
            rate,
            as_of: self.clock.now(),
        })
    }
}

/// In-memory provider; can be switched off to simulate an outage
#[derive(Default)]
pub struct StaticRateProvider {
    rates: RwLock<HashMap<(String, String), Decimal>>,
    down: AtomicBool,
    clock: Option<Arc<dyn Clock>>,
}

impl StaticRateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `as_of` from `clock` instead of the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_rate(self, from: &str, to: &str, rate: Decimal) -> Self {
        self.set_rate(from, to, rate);
        self
    }

    pub fn set_rate(&self, from: &str, to: &str, rate: Decimal) {
        self.rates.write().insert((from.to_string(), to.to_string()), rate);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<ExchangeRate, CurrencyError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CurrencyError::Provider("provider offline".to_string()));
        }
        let rates = self.rates.read();
        let rate = match rates.get(&(from.to_string(), to.to_string())) {
            Some(rate) => *rate,
            None => match rates.get(&(to.to_string(), from.to_string())) {
                Some(inverse) if !inverse.is_zero() => Decimal::ONE / *inverse,
                _ => return Err(CurrencyError::Provider(format!("no rate for {}/{}", from, to))),
            },
        };
        Ok(ExchangeRate {
            from: from.to_string(),
            to: to.to_string(),
            rate,
            as_of: self.clock.as_ref().map_or_else(Utc::now, |clock| clock.now()),
        })
    }
}

/// Converted and adjusted amount for one channel currency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAmount {
    pub amount: Decimal,
    /// Label sent on the wire
    pub currency: String,
    pub rate: Decimal,
    pub stale: bool,
}

#[derive(Clone)]
pub struct CurrencyService {
    provider: Arc<dyn RateProvider>,
    clock: Arc<dyn Clock>,
    cache: TtlCache<(String, String, ConversionMethod), ExchangeRate>,
    /// Last good rate per pair from any provider lookup, the stale fallback
    last_known: Arc<RwLock<HashMap<(String, String), ExchangeRate>>>,
    fixed_rates: Arc<HashMap<String, Decimal>>,
    ppp_factors: Arc<HashMap<String, Decimal>>,
    tax_factors: Arc<HashMap<String, Decimal>>,
    stale_max_age: ChronoDuration,
}

impl CurrencyService {
    pub fn new(
        provider: Arc<dyn RateProvider>,
        clock: Arc<dyn Clock>,
        config: &CurrencyConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            provider,
            clock,
            cache: TtlCache::new(
                "exchange_rates",
                cache_config.max_capacity,
                Duration::from_secs(cache_config.currency_ttl_secs),
            ),
            last_known: Arc::new(RwLock::new(HashMap::new())),
            fixed_rates: Arc::new(config.fixed_rates.clone()),
            ppp_factors: Arc::new(config.ppp_factors.clone()),
            tax_factors: Arc::new(config.tax_factors.clone()),
            stale_max_age: ChronoDuration::seconds(config.stale_max_age_secs as i64),
        }
    }

    pub fn ppp_factor(&self, market: Option<&str>) -> Decimal {
        factor(&self.ppp_factors, market)
    }

    pub fn tax_factor(&self, market: Option<&str>) -> Decimal {
        factor(&self.tax_factors, market)
    }

    /// Drop cached rates so the next lookup hits the provider
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    pub async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
        method: ConversionMethod,
    ) -> Result<Conversion, CurrencyError> {
        self.convert_with(amount, from, to, method, None).await
    }

    /// Like [`convert`](Self::convert), with a per-channel fixed rate taking
    /// precedence over the configured table
    pub async fn convert_with(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
        method: ConversionMethod,
        fixed_rate: Option<Decimal>,
    ) -> Result<Conversion, CurrencyError> {
        validate_code(from)?;
        validate_code(to)?;

        if from == to {
            return Ok(Conversion {
                amount,
                rate: Decimal::ONE,
                method,
                stale: false,
            });
        }

        match method {
            ConversionMethod::Fixed => {
                let (converted, rate) = self.convert_fixed(amount, from, to, fixed_rate)?;
                Ok(Conversion {
                    amount: converted,
                    rate,
                    method,
                    stale: false,
                })
            }
            ConversionMethod::Live | ConversionMethod::DailyCached => {
                let (rate, stale) = self.lookup(from, to, method).await?;
                Ok(Conversion {
                    amount: amount * rate.rate,
                    rate: rate.rate,
                    method,
                    stale,
                })
            }
        }
    }

    /// `round(amount · fx · (1 + markup) · ppp · tax)` at the channel's precision
    pub async fn apply_channel_adjustment(
        &self,
        amount: Decimal,
        from: &str,
        currency: &SupportedCurrency,
    ) -> Result<ChannelAmount, CurrencyError> {
        let conversion = self
            .convert_with(amount, from, &currency.code, currency.conversion_method, currency.fixed_rate)
            .await?;

        let market = currency.market.as_deref();
        let adjusted = conversion.amount
            * (Decimal::ONE + currency.markup)
            * self.ppp_factor(market)
            * self.tax_factor(market);
        let rounded = round_amount(adjusted, currency.rounding, currency.precision);

        Ok(ChannelAmount {
            amount: with_scale(rounded, currency.precision),
            currency: currency.wire_code().to_string(),
            rate: conversion.rate,
            stale: conversion.stale,
        })
    }

    fn convert_fixed(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
        fixed_rate: Option<Decimal>,
    ) -> Result<(Decimal, Decimal), CurrencyError> {
        if let Some(rate) = fixed_rate.filter(|r| !r.is_zero()) {
            return Ok((amount * rate, rate));
        }
        if let Some(rate) = self.fixed_rates.get(&format!("{}/{}", from, to)) {
            return Ok((amount * *rate, *rate));
        }
        // Reverse direction divides so X -> Y -> X is exact
        if let Some(rate) = self.fixed_rates.get(&format!("{}/{}", to, from)).filter(|r| !r.is_zero()) {
            return Ok((amount / *rate, Decimal::ONE / *rate));
        }
        Err(CurrencyError::NoFixedRate {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    /// `live` always asks the provider; `daily_cached` is served from the
    /// TTL cache while its entry lives
    async fn lookup(
        &self,
        from: &str,
        to: &str,
        method: ConversionMethod,
    ) -> Result<(ExchangeRate, bool), CurrencyError> {
        let key = (from.to_string(), to.to_string());
        let cache_key = (from.to_string(), to.to_string(), method);

        if method != ConversionMethod::Live {
            if let Some(rate) = self.cache.get(&cache_key).await {
                return Ok((rate, false));
            }
        }

        match self.provider.fetch_rate(from, to).await {
            Ok(rate) => {
                self.cache.insert(cache_key, rate.clone()).await;
                self.last_known.write().insert(key, rate.clone());
                Ok((rate, false))
            }
            Err(err) => {
                let now = self.clock.now();
                let fallback = self
                    .last_known
                    .read()
                    .get(&key)
                    .filter(|rate| now - rate.as_of <= self.stale_max_age)
                    .cloned();
                match fallback {
                    Some(rate) => {
                        tracing::warn!(from, to, as_of = %rate.as_of, error = %err, "Using stale exchange rate");
                        Ok((rate, true))
                    }
                    None => {
                        tracing::error!(from, to, error = %err, "Exchange rate unavailable");
                        Err(CurrencyError::ExchangeRateUnavailable {
                            from: from.to_string(),
                            to: to.to_string(),
                        })
                    }
                }
            }
        }
    }

}

fn factor(table: &HashMap<String, Decimal>, market: Option<&str>) -> Decimal {
    market
        .and_then(|m| table.get(&m.to_uppercase()))
        .copied()
        .unwrap_or(Decimal::ONE)
}
