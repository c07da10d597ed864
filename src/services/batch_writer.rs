//! Bulk rate and availability writes.
//!
//! Valid items are cut into sub-batches; each one commits in its own store
//! transaction together with its outbox event, at most `batch.concurrency`
//! at a time. A failed sub-batch rolls back alone.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{BatchConfig, EventConfig};
use crate::error::{StoreError, StoreResult};
use crate::models::availability::AvailabilityUpdate;
use crate::models::rate_plan::RateUpdate;
use crate::services::clock::Clock;
use crate::services::currency::validate_code;
use crate::store::{CommitSummary, OutboxSpec, Store, WriteMode};

pub const BULK_RATE_PRIORITY: u8 = 3;
pub const BULK_AVAILABILITY_PRIORITY: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    /// Position in the submitted list, for items rejected before commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Failed sub-batch, 0-based
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_batch: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// At least one sub-batch committed
    pub success: bool,
    pub modified: usize,
    pub upserted: usize,
    pub failed: usize,
    pub sub_batches: usize,
    pub errors: Vec<ItemError>,
    pub event_ids: Vec<Uuid>,
}

struct SubBatchOutcome {
    number: usize,
    items: usize,
    result: StoreResult<CommitSummary>,
}

#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: BatchConfig,
    max_attempts: u32,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: BatchConfig, events: &EventConfig) -> Self {
        Self {
            store,
            clock,
            config,
            max_attempts: events.max_attempts,
        }
    }

    pub async fn apply_rates(&self, hotel_id: &str, updates: Vec<RateUpdate>) -> BatchResult {
        let mut result = BatchResult::default();
        let mut valid = Vec::with_capacity(updates.len());
        for (index, update) in updates.into_iter().enumerate() {
            let check = if update.hotel_id != hotel_id {
                Err(format!("hotelId {} does not match {}", update.hotel_id, hotel_id))
            } else {
                validate_code(&update.currency)
                    .map_err(|e| e.to_string())
                    .and_then(|_| update.validate_shape())
            };
            match check {
                Ok(()) => valid.push(update),
                Err(message) => reject(&mut result, index, message),
            }
        }

        let outbox = OutboxSpec::new(BULK_RATE_PRIORITY, self.max_attempts).with_reason("bulk_update");
        let outcomes = self
            .run_sub_batches(valid, |chunk| {
                let store = self.store.clone();
                let outbox = outbox.clone();
                let now = self.clock.now();
                let hotel_id = hotel_id.to_string();
                async move { store.commit_rates(&hotel_id, &chunk, outbox, now).await }
            })
            .await;

        finish(hotel_id, "rates", result, outcomes)
    }

    pub async fn apply_availability(&self, hotel_id: &str, updates: Vec<AvailabilityUpdate>) -> BatchResult {
        let mut result = BatchResult::default();
        let mut valid = Vec::with_capacity(updates.len());
        for (index, update) in updates.into_iter().enumerate() {
            let check = if update.hotel_id != hotel_id {
                Err(format!("hotelId {} does not match {}", update.hotel_id, hotel_id))
            } else {
                update.validate_shape()
            };
            match check {
                Ok(()) => valid.push(update),
                Err(message) => reject(&mut result, index, message),
            }
        }

        let outbox = OutboxSpec::new(BULK_AVAILABILITY_PRIORITY, self.max_attempts).with_reason("bulk_update");
        let outcomes = self
            .run_sub_batches(valid, |chunk| {
                let store = self.store.clone();
                let outbox = outbox.clone();
                let now = self.clock.now();
                let hotel_id = hotel_id.to_string();
                async move {
                    match store
                        .commit_availability(&hotel_id, &chunk, WriteMode::Insert, outbox.clone(), now)
                        .await
                    {
                        Err(StoreError::DuplicateKey(key)) => {
                            tracing::debug!(hotel_id = %hotel_id, %key, "Existing rows, retrying sub-batch as upsert");
                            store
                                .commit_availability(&hotel_id, &chunk, WriteMode::Upsert, outbox, now)
                                .await
                        }
                        other => other,
                    }
                }
            })
            .await;

        finish(hotel_id, "availability", result, outcomes)
    }

    async fn run_sub_batches<T, F, Fut>(&self, items: Vec<T>, commit: F) -> Vec<SubBatchOutcome>
    where
        T: Clone,
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = StoreResult<CommitSummary>>,
    {
        let deadline = Duration::from_millis(self.config.timeout_ms);
        let chunks: Vec<Vec<T>> = items.chunks(self.config.size.max(1)).map(|c| c.to_vec()).collect();

        let mut outcomes: Vec<SubBatchOutcome> = stream::iter(chunks.into_iter().enumerate())
            .map(|(number, chunk)| {
                let items = chunk.len();
                let write = commit(chunk);
                async move {
                    let result = match tokio::time::timeout(deadline, write).await {
                        Ok(result) => result,
                        Err(_) => Err(StoreError::Timeout),
                    };
                    SubBatchOutcome { number, items, result }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        outcomes.sort_by_key(|o| o.number);
        outcomes
    }
}

fn reject(result: &mut BatchResult, index: usize, message: String) {
    result.failed += 1;
    result.errors.push(ItemError {
        index: Some(index),
        sub_batch: None,
        message,
    });
}

fn finish(hotel_id: &str, kind: &str, mut result: BatchResult, outcomes: Vec<SubBatchOutcome>) -> BatchResult {
    result.sub_batches = outcomes.len();
    for outcome in outcomes {
        match outcome.result {
            Ok(summary) => {
                result.success = true;
                result.modified += summary.modified;
                result.upserted += summary.upserted;
                result.event_ids.extend(summary.event_id);
            }
            Err(err) => {
                tracing::warn!(
                    hotel_id,
                    kind,
                    sub_batch = outcome.number,
                    items = outcome.items,
                    error = %err,
                    "Sub-batch rolled back"
                );
                result.failed += outcome.items;
                result.errors.push(ItemError {
                    index: None,
                    sub_batch: Some(outcome.number),
                    message: err.to_string(),
                });
            }
        }
    }

    tracing::info!(
        hotel_id,
        kind,
        modified = result.modified,
        upserted = result.upserted,
        failed = result.failed,
        sub_batches = result.sub_batches,
        "Batch applied"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::event::EventFilter;
    use crate::services::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    fn writer(store: Arc<MemoryStore>, size: usize) -> BatchWriter {
        let mut config = AppConfig::default();
        config.batch.size = size;
        BatchWriter::new(store, Arc::new(ManualClock::new(Utc::now())), config.batch, &config.event)
    }

    fn rate(day: u32, amount: rust_decimal::Decimal) -> RateUpdate {
        RateUpdate {
            hotel_id: "H1".into(),
            room_type_id: "RT1".into(),
            rate_plan_id: None,
            date: NaiveDate::from_ymd_opt(2025, 8, day).unwrap(),
            rate: amount,
            currency: "USD".into(),
            reason: "bulk_update".into(),
            approved_by: "system".into(),
        }
    }

    #[tokio::test]
    async fn test_sub_batch_boundaries() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(store.clone(), 4);

        let exact = writer.apply_rates("H1", (1..=4).map(|d| rate(d, dec!(100))).collect()).await;
        assert_eq!(exact.sub_batches, 1);
        assert_eq!(exact.upserted, 4);

        let over = writer.apply_rates("H1", (1..=5).map(|d| rate(d, dec!(110))).collect()).await;
        assert_eq!(over.sub_batches, 2);
        assert_eq!(over.modified, 4);
        assert_eq!(over.upserted, 1);
        assert_eq!(over.event_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_items_never_reach_a_sub_batch() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(store.clone(), 10);

        let mut other_tenant = rate(2, dec!(100));
        other_tenant.hotel_id = "H2".into();
        let mut bad_currency = rate(3, dec!(100));
        bad_currency.currency = "usd".into();
        let updates = vec![rate(1, dec!(100)), other_tenant, bad_currency, rate(4, dec!(-5))];

        let result = writer.apply_rates("H1", updates).await;
        assert!(result.success);
        assert_eq!(result.upserted, 1);
        assert_eq!(result.failed, 3);
        let indexes: Vec<Option<usize>> = result.errors.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![Some(1), Some(2), Some(3)]);

        let events = store.list_events(&EventFilter::default()).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_committed_is_not_a_success() {
        let store = Arc::new(MemoryStore::new());
        let result = writer(store, 10).apply_rates("H1", vec![rate(1, dec!(0))]).await;
        assert!(!result.success);
        assert_eq!(result.sub_batches, 0);
    }
}
