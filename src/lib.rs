// src/lib.rs

use std::sync::Arc;

use config::AppConfig;
use services::{
    alerts::AlertLog, batch_writer::BatchWriter, channel_registry::ChannelRegistry, clock::Clock,
    currency::{CurrencyService, RateProvider}, distributor::Distributor, event_bus::EventBus, forecast::ForecastCache,
    pricing::PricingEngine, rate_limiter::RateLimiter, rate_plans::RatePlanService, reconciler::Reconciler,
    transport::ChannelTransport,
};
use store::Store;

/// Alerts kept in memory for `recent_alerts`
const ALERT_CAPACITY: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub alerts: AlertLog,
    pub currency: CurrencyService,
    pub forecasts: ForecastCache,
    pub pricing: PricingEngine,
    pub bus: EventBus,
    pub batch: BatchWriter,
    pub rate_plans: RatePlanService,
    pub registry: ChannelRegistry,
    pub distributor: Distributor,
    pub reconciler: Reconciler,
    pub limiter: RateLimiter,
}

impl AppState {
    /// Wire every service over one store, clock, FX provider and channel
    /// transport
    pub fn build(
        config: AppConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        rate_provider: Arc<dyn RateProvider>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        let alerts = AlertLog::new(ALERT_CAPACITY);
        let currency = CurrencyService::new(rate_provider, clock.clone(), &config.currency, &config.cache);
        let forecasts = ForecastCache::new(&config.cache);
        let pricing = PricingEngine::new(
            store.clone(),
            currency.clone(),
            forecasts.clone(),
            clock.clone(),
            config.pricing.clone(),
        );
        let bus = EventBus::new(store.clone(), clock.clone(), config.event.clone(), alerts.clone());
        let batch = BatchWriter::new(store.clone(), clock.clone(), config.batch.clone(), &config.event);
        let rate_plans = RatePlanService::new(
            store.clone(),
            pricing.clone(),
            bus.clone(),
            clock.clone(),
            config.scheduler.horizon_days,
        );
        let registry = ChannelRegistry::new(
            store.clone(),
            clock.clone(),
            alerts.clone(),
            config.channel.clone(),
            &config.cache,
        );
        let distributor = Distributor::new(
            registry.clone(),
            currency.clone(),
            bus.clone(),
            transport,
            clock.clone(),
            alerts.clone(),
        );
        let reconciler = Reconciler::new(store.clone(), bus.clone(), clock.clone());
        let limiter = RateLimiter::new(config.server.api_rate_limit_per_minute, clock.clone());

        Self {
            config: Arc::new(config),
            store,
            clock,
            alerts,
            currency,
            forecasts,
            pricing,
            bus,
            batch,
            rate_plans,
            registry,
            distributor,
            reconciler,
            limiter,
        }
    }
}

pub mod config;
pub mod error;

pub mod entities {
    pub mod prelude;
    pub mod availability_rows;
    pub mod bookings;
    pub mod channel_configs;
    pub mod dynamic_rules;
    pub mod event_envelopes;
    pub mod hotels;
    pub mod job_status;
    pub mod promo_codes;
    pub mod rate_overrides;
    pub mod rate_plans;
    pub mod reconciliation_records;
    pub mod room_types;
    pub mod seasonal_rates;
}

pub mod services {
    pub mod alerts;
    pub mod batch_writer;
    pub mod cache;
    pub mod channel_adapters;
    pub mod channel_registry;
    pub mod clock;
    pub mod currency;
    pub mod distributor;
    pub mod event_bus;
    pub mod forecast;
    pub mod pricing;
    pub mod rate_limiter;
    pub mod rate_plans;
    pub mod reconciler;
    pub mod transport;
}

pub mod handlers {
    pub mod channels;
    pub mod events;
    pub mod hotels;
    pub mod quotes;
    pub mod rates;
    pub mod response;
    pub mod router;
}

pub mod jobs;
pub mod models;
pub mod store;
