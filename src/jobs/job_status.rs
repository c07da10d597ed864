//! Last-run bookkeeping for the scheduled jobs
//!
//! Keeps a restart from re-running a job whose minimum interval has not
//! elapsed for that hotel.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::StoreResult;
use crate::models::job::JobStatus;
use crate::store::Store;

/// Job names as stored in the status table
pub mod jobs {
    pub const RATE_PLAN_ROLLOVER: &str = "rate_plan_rollover";
    pub const FORECAST_REFRESH: &str = "forecast_refresh";
    pub const CREDENTIAL_EXPIRY_SCAN: &str = "credential_expiry_scan";
    pub const AVAILABILITY_ROLLOUT: &str = "availability_rollout";
}

/// Minimum seconds between two successful runs
pub mod intervals {
    pub const RATE_PLAN_ROLLOVER: u64 = 86400;
    pub const FORECAST_REFRESH: u64 = 3600;
    pub const CREDENTIAL_EXPIRY_SCAN: u64 = 86400;
    pub const AVAILABILITY_ROLLOUT: u64 = 86400;
}

/// True when the job never succeeded for this hotel or its interval elapsed
pub async fn should_run(
    store: &Arc<dyn Store>,
    job_name: &str,
    hotel_id: &str,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    match store.get_job_status(job_name, hotel_id).await? {
        None => {
            tracing::info!(job = job_name, hotel_id, "First run detected, will run");
            Ok(true)
        }
        Some(status) if status.is_due(now) => Ok(true),
        Some(status) => {
            tracing::debug!(
                job = job_name,
                hotel_id,
                last_success_at = ?status.last_success_at,
                min_interval_secs = status.min_interval_secs,
                "Skipping run, interval not elapsed"
            );
            Ok(false)
        }
    }
}

pub async fn record_success(
    store: &Arc<dyn Store>,
    job_name: &str,
    hotel_id: &str,
    min_interval_secs: u64,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let mut status = store
        .get_job_status(job_name, hotel_id)
        .await?
        .unwrap_or_else(|| JobStatus::new(job_name, hotel_id, min_interval_secs));
    status.min_interval_secs = min_interval_secs;
    status.record_success(now);
    store.save_job_status(status).await
}

pub async fn record_failure(
    store: &Arc<dyn Store>,
    job_name: &str,
    hotel_id: &str,
    min_interval_secs: u64,
    now: DateTime<Utc>,
    error: &str,
) -> StoreResult<()> {
    let mut status = store
        .get_job_status(job_name, hotel_id)
        .await?
        .unwrap_or_else(|| JobStatus::new(job_name, hotel_id, min_interval_secs));
    status.record_error(now, error);
    store.save_job_status(status).await
}
