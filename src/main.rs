use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use innrate_backend::{
    config::AppConfig,
    handlers::router::build_router,
    jobs::{
        availability_rollout::start_availability_rollout_job,
        credential_expiry_scan::start_credential_expiry_scan_job,
        event_dispatch::{start_dispatch_workers, start_lease_reaper},
        forecast_refresh::ForecastRefresh,
        health_probe::start_health_probe_job,
        rate_plan_rollover::start_rate_plan_rollover_job,
    },
    services::{
        clock::{Clock, SystemClock},
        currency::{HttpRateProvider, RateProvider, StaticRateProvider},
        forecast::OccupancyForecastProvider,
        transport::ReqwestTransport,
    },
    store::{MemoryStore, SeaOrmStore, Store},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,innrate_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let store: Arc<dyn Store> = match &config.server.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let db = Database::connect(database_url).await?;

            tracing::info!("Running migrations...");
            migration::Migrator::up(&db, None).await?;
            Arc::new(SeaOrmStore::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rate_provider: Arc<dyn RateProvider> = match &config.currency.provider_url {
        Some(url) => Arc::new(HttpRateProvider::new(url.clone(), clock.clone())),
        None => {
            tracing::warn!("FX_PROVIDER_URL not set, only fixed rates will convert");
            Arc::new(StaticRateProvider::new().with_clock(clock.clone()))
        }
    };

    let state = AppState::build(
        config.clone(),
        store.clone(),
        clock.clone(),
        rate_provider,
        Arc::new(ReqwestTransport::new()),
    );

    // Background jobs
    let cancel = CancellationToken::new();
    let scheduler = &config.scheduler;
    let mut tasks = start_dispatch_workers(
        state.distributor.clone(),
        scheduler.dispatch_workers,
        scheduler.dispatch_batch,
        Duration::from_millis(scheduler.dispatch_poll_ms),
        cancel.clone(),
    );
    tasks.push(start_lease_reaper(state.bus.clone(), Duration::from_secs(15), cancel.clone()));
    tasks.push(start_health_probe_job(
        store.clone(),
        state.registry.clone(),
        state.distributor.clone(),
        Duration::from_secs(60),
        cancel.clone(),
    ));
    tasks.push(start_rate_plan_rollover_job(
        store.clone(),
        state.rate_plans.clone(),
        clock.clone(),
        scheduler.rollover_publish_days,
        cancel.clone(),
    ));
    tasks.push(
        ForecastRefresh {
            store: store.clone(),
            provider: Arc::new(OccupancyForecastProvider::new(store.clone())),
            forecasts: state.forecasts.clone(),
            pricing: state.pricing.clone(),
            clock: clock.clone(),
            horizon_days: scheduler.horizon_days,
            auto_apply: config.pricing.auto_apply_dynamic,
            max_attempts: config.event.max_attempts,
        }
        .start(cancel.clone()),
    );
    tasks.push(start_credential_expiry_scan_job(
        store.clone(),
        state.registry.clone(),
        state.alerts.clone(),
        clock.clone(),
        scheduler.credential_alert_days,
        cancel.clone(),
    ));
    tasks.push(start_availability_rollout_job(
        store.clone(),
        clock.clone(),
        scheduler.horizon_days,
        cancel.clone(),
    ));

    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("Background jobs stopped");
    Ok(())
}
