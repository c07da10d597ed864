pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_hotels;
mod m20261001_000002_create_rate_store;
mod m20261001_000003_create_availability_rows;
mod m20261001_000004_create_channel_configs;
mod m20261001_000005_create_event_envelopes;
mod m20261001_000006_create_bookings;
mod m20261001_000007_create_job_status;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_hotels::Migration),
            Box::new(m20261001_000002_create_rate_store::Migration),
            Box::new(m20261001_000003_create_availability_rows::Migration),
            Box::new(m20261001_000004_create_channel_configs::Migration),
            Box::new(m20261001_000005_create_event_envelopes::Migration),
            Box::new(m20261001_000006_create_bookings::Migration),
            Box::new(m20261001_000007_create_job_status::Migration),
        ]
    }
}
