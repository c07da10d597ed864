//! Fixed-window request limit per API token.

use moka::future::Cache;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::services::clock::Clock;

const WINDOW_SECS: i64 = 60;

#[derive(Clone)]
pub struct RateLimiter {
    limit: u64,
    clock: Arc<dyn Clock>,
    windows: Cache<(String, i64), Arc<AtomicU64>>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u64, clock: Arc<dyn Clock>) -> Self {
        let windows = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(Duration::from_secs(2 * WINDOW_SECS as u64))
            .build();
        Self {
            limit: limit_per_minute,
            clock,
            windows,
        }
    }

    /// Count one request for `token`; errs once the window is full
    pub async fn check(&self, token: &str) -> CoreResult<()> {
        if self.limit == 0 {
            return Ok(());
        }
        let now = self.clock.now().timestamp();
        let window = now.div_euclid(WINDOW_SECS);
        let counter = self
            .windows
            .get_with((token.to_string(), window), async { Arc::new(AtomicU64::new(0)) })
            .await;

        let seen = counter.fetch_add(1, Ordering::AcqRel) + 1;
        if seen > self.limit {
            let retry_after_secs = ((window + 1) * WINDOW_SECS - now).max(1) as u64;
            tracing::debug!(seen, limit = self.limit, retry_after_secs, "API token over its rate limit");
            return Err(CoreError::RateLimited { retry_after_secs });
        }
        Ok(())
    }
}
