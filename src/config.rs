//! Runtime configuration read from the environment.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub size: usize,
    pub concurrency: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct EventConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Extra lease time on top of the channel timeout
    pub lease_grace_ms: u64,
    /// Delay applied when a channel is at its concurrency cap
    pub defer_ms: u64,
    /// Re-check interval for events held on an unhealthy channel
    pub hold_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ChannelDefaults {
    pub timeout_ms: u64,
    /// Upper bound for a channel's own timeout; leases are sized from it
    pub max_timeout_ms: u64,
    pub per_channel_concurrency: usize,
    pub unhealthy_after: u32,
    pub call_log_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub currency_ttl_secs: u64,
    pub channel_config_ttl_secs: u64,
    pub forecast_ttl_secs: u64,
    pub max_capacity: u64,
}

#[derive(Debug, Clone)]
pub struct CurrencyConfig {
    pub provider_url: Option<String>,
    pub ppp_factors: HashMap<String, Decimal>,
    pub tax_factors: HashMap<String, Decimal>,
    /// Keyed "FROM/TO"
    pub fixed_rates: HashMap<String, Decimal>,
    /// Oldest daily rate usable when the provider is down
    pub stale_max_age_secs: u64,
}

#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub fallback_elasticity: Decimal,
    pub auto_apply_dynamic: bool,
    pub quote_valid_secs: i64,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub horizon_days: u32,
    pub rollover_publish_days: u32,
    pub credential_alert_days: i64,
    pub dispatch_workers: usize,
    pub dispatch_poll_ms: u64,
    pub dispatch_batch: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub api_rate_limit_per_minute: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub batch: BatchConfig,
    pub event: EventConfig,
    pub channel: ChannelDefaults,
    pub cache: CacheConfig,
    pub currency: CurrencyConfig,
    pub pricing: PricingConfig,
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig {
                size: 1000,
                concurrency: 5,
                timeout_ms: 30_000,
            },
            event: EventConfig {
                max_attempts: 8,
                backoff_base_ms: 30_000,
                backoff_cap_ms: 1_800_000,
                lease_grace_ms: 10_000,
                defer_ms: 2_000,
                hold_ms: 60_000,
            },
            channel: ChannelDefaults {
                timeout_ms: 10_000,
                max_timeout_ms: 30_000,
                per_channel_concurrency: 4,
                unhealthy_after: 3,
                call_log_capacity: 10_000,
            },
            cache: CacheConfig {
                currency_ttl_secs: 3600,
                channel_config_ttl_secs: 900,
                forecast_ttl_secs: 7200,
                max_capacity: 10_000,
            },
            currency: CurrencyConfig {
                provider_url: None,
                ppp_factors: HashMap::new(),
                tax_factors: HashMap::new(),
                fixed_rates: HashMap::new(),
                stale_max_age_secs: 48 * 3600,
            },
            pricing: PricingConfig {
                fallback_elasticity: Decimal::new(-12, 1),
                auto_apply_dynamic: false,
                quote_valid_secs: 900,
            },
            scheduler: SchedulerConfig {
                horizon_days: 90,
                rollover_publish_days: 7,
                credential_alert_days: 30,
                dispatch_workers: 4,
                dispatch_poll_ms: 500,
                dispatch_batch: 32,
            },
            server: ServerConfig {
                database_url: None,
                bind_addr: "0.0.0.0:3000".to_string(),
                api_rate_limit_per_minute: 120,
            },
        }
    }
}

impl EventConfig {
    /// How long an event stays leased: the longest per-event delivery
    /// deadline plus grace
    pub fn lease_duration(&self, deadline_ms: u64) -> Duration {
        Duration::from_millis(deadline_ms.saturating_add(self.lease_grace_ms))
    }
}

fn read<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn read_positive<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = read(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Parse `CODE=factor,CODE=factor` lists
pub fn parse_factor_table(key: &'static str, raw: &str) -> Result<HashMap<String, Decimal>, ConfigError> {
    let mut table = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (code, factor) = entry.split_once('=').ok_or_else(|| ConfigError::Invalid {
            key,
            message: format!("expected CODE=factor, got '{}'", entry),
        })?;
        let factor = Decimal::from_str(factor.trim()).map_err(|e| ConfigError::Invalid {
            key,
            message: format!("{}: {}", entry, e),
        })?;
        if factor <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                key,
                message: format!("{}: factor must be positive", entry),
            });
        }
        table.insert(code.trim().to_uppercase(), factor);
    }
    Ok(table)
}

fn read_table(key: &'static str) -> Result<HashMap<String, Decimal>, ConfigError> {
    match env::var(key) {
        Ok(raw) => parse_factor_table(key, &raw),
        Err(_) => Ok(HashMap::new()),
    }
}

impl AppConfig {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            batch: BatchConfig {
                size: read_positive("BATCH_SIZE", defaults.batch.size)?,
                concurrency: read_positive("BATCH_CONCURRENCY", defaults.batch.concurrency)?,
                timeout_ms: read_positive("BATCH_TIMEOUT_MS", defaults.batch.timeout_ms)?,
            },
            event: EventConfig {
                max_attempts: read_positive("EVENT_MAX_ATTEMPTS", defaults.event.max_attempts)?,
                backoff_base_ms: read_positive("EVENT_BACKOFF_BASE_MS", defaults.event.backoff_base_ms)?,
                backoff_cap_ms: read_positive("EVENT_BACKOFF_CAP_MS", defaults.event.backoff_cap_ms)?,
                lease_grace_ms: read("EVENT_LEASE_GRACE_MS", defaults.event.lease_grace_ms)?,
                ..defaults.event
            },
            channel: ChannelDefaults {
                timeout_ms: read_positive("CHANNEL_DEFAULT_TIMEOUT_MS", defaults.channel.timeout_ms)?,
                max_timeout_ms: read_positive("CHANNEL_MAX_TIMEOUT_MS", defaults.channel.max_timeout_ms)?,
                per_channel_concurrency: read_positive(
                    "CHANNEL_PER_CHANNEL_CONCURRENCY",
                    defaults.channel.per_channel_concurrency,
                )?,
                unhealthy_after: read_positive("CHANNEL_UNHEALTHY_AFTER", defaults.channel.unhealthy_after)?,
                ..defaults.channel
            },
            cache: CacheConfig {
                currency_ttl_secs: read_positive("CACHE_CURRENCY_TTL_SEC", defaults.cache.currency_ttl_secs)?,
                channel_config_ttl_secs: read_positive(
                    "CACHE_CHANNEL_CONFIG_TTL_SEC",
                    defaults.cache.channel_config_ttl_secs,
                )?,
                ..defaults.cache
            },
            currency: CurrencyConfig {
                provider_url: env::var("FX_PROVIDER_URL").ok().filter(|u| !u.trim().is_empty()),
                ppp_factors: read_table("CURRENCY_PPP_FACTORS")?,
                tax_factors: read_table("CURRENCY_TAX_FACTORS")?,
                fixed_rates: read_table("CURRENCY_FIXED_RATES")?,
                ..defaults.currency
            },
            pricing: PricingConfig {
                fallback_elasticity: read("PRICING_FALLBACK_ELASTICITY", defaults.pricing.fallback_elasticity)?,
                auto_apply_dynamic: read("PRICING_AUTO_APPLY_DYNAMIC", defaults.pricing.auto_apply_dynamic)?,
                ..defaults.pricing
            },
            scheduler: SchedulerConfig {
                horizon_days: read_positive("HORIZON_DAYS", defaults.scheduler.horizon_days)?,
                dispatch_workers: read_positive("DISPATCH_WORKERS", defaults.scheduler.dispatch_workers)?,
                dispatch_poll_ms: read_positive("DISPATCH_POLL_MS", defaults.scheduler.dispatch_poll_ms)?,
                ..defaults.scheduler
            },
            server: ServerConfig {
                database_url: env::var("DATABASE_URL").ok(),
                bind_addr: read("BIND_ADDR", defaults.server.bind_addr)?,
                api_rate_limit_per_minute: read("API_RATE_LIMIT_PER_MINUTE", defaults.server.api_rate_limit_per_minute)?,
            },
        };

        if config.pricing.fallback_elasticity.is_zero() {
            return Err(ConfigError::Invalid {
                key: "PRICING_FALLBACK_ELASTICITY",
                message: "must be non-zero".to_string(),
            });
        }
        if config.event.backoff_cap_ms < config.event.backoff_base_ms {
            return Err(ConfigError::Invalid {
                key: "EVENT_BACKOFF_CAP_MS",
                message: "must not be below EVENT_BACKOFF_BASE_MS".to_string(),
            });
        }
        if config.channel.max_timeout_ms < config.channel.timeout_ms {
            return Err(ConfigError::Invalid {
                key: "CHANNEL_MAX_TIMEOUT_MS",
                message: "must not be below CHANNEL_DEFAULT_TIMEOUT_MS".to_string(),
            });
        }

        Ok(config)
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.server.database_url.as_deref().ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.batch.size, 1000);
        assert_eq!(config.batch.concurrency, 5);
        assert_eq!(config.event.max_attempts, 8);
        assert_eq!(config.event.backoff_cap_ms, 1_800_000);
        assert_eq!(config.channel.per_channel_concurrency, 4);
        assert_eq!(config.cache.channel_config_ttl_secs, 900);
        assert_eq!(config.scheduler.horizon_days, 90);
        assert_eq!(config.pricing.fallback_elasticity, dec!(-1.2));
    }

    #[test]
    fn test_factor_table_parsing() {
        let table = parse_factor_table("CURRENCY_PPP_FACTORS", "br=0.85, IN=0.7").unwrap();
        assert_eq!(table.get("BR"), Some(&dec!(0.85)));
        assert_eq!(table.get("IN"), Some(&dec!(0.7)));

        assert!(parse_factor_table("CURRENCY_PPP_FACTORS", "BR").is_err());
        assert!(parse_factor_table("CURRENCY_PPP_FACTORS", "BR=-1").is_err());
    }

    #[test]
    fn test_lease_is_deadline_plus_grace() {
        let config = AppConfig::default();
        assert_eq!(config.event.lease_duration(10_000), Duration::from_millis(20_000));
        assert_eq!(config.event.lease_duration(u64::MAX), Duration::from_millis(u64::MAX));
    }
}
