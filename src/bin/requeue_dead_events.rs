use std::env;
use std::sync::Arc;
use sea_orm::Database;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use innrate_backend::config::AppConfig;
use innrate_backend::models::event::{EventFilter, EventStatus};
use innrate_backend::services::alerts::AlertLog;
use innrate_backend::services::clock::SystemClock;
use innrate_backend::services::event_bus::EventBus;
use innrate_backend::store::{SeaOrmStore, Store};

/// Give dead events of a hotel a fresh set of attempts
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,innrate_backend=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: cargo run --bin requeue_dead_events <hotel_id> [--dry-run]");
        eprintln!("Example: cargo run --bin requeue_dead_events H1");
        std::process::exit(1);
    }
    let hotel_id = args[1].clone();
    let dry_run = args.iter().any(|a| a == "--dry-run");

    let config = AppConfig::from_env()?;
    let database_url = config
        .server
        .database_url
        .clone()
        .ok_or("DATABASE_URL must be set")?;
    tracing::info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;
    let store: Arc<dyn Store> = Arc::new(SeaOrmStore::new(db));

    let bus = EventBus::new(store, Arc::new(SystemClock), config.event.clone(), AlertLog::new(100));
    let dead = bus
        .list(&EventFilter {
            hotel_id: Some(hotel_id.clone()),
            status: Some(EventStatus::Dead),
            ..Default::default()
        })
        .await?;

    tracing::info!("Found {} dead events for hotel {}", dead.len(), hotel_id);

    let mut requeued = 0;
    for event in dead {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            attempts = event.attempts,
            last_error = ?event.last_error,
            "Dead event"
        );
        if dry_run {
            continue;
        }
        match bus.requeue_dead(event.id).await {
            Ok(_) => requeued += 1,
            Err(e) => tracing::error!(event_id = %event.id, error = %e, "Failed to requeue event"),
        }
    }

    tracing::info!("Requeued {} events for hotel {}", requeued, hotel_id);
    Ok(())
}
