//! Durable priority queue of outbound events.
//!
//! Ordering and supersede rules live in the store; this service drives the
//! lifecycle: lease, success, retry with backoff, hold, dead.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EventConfig;
use crate::error::{CoreError, CoreResult, StoreError, StoreResult};
use crate::models::channel::RetryPolicy;
use crate::models::event::{EventEnvelope, EventFilter, EventStatus, NewEvent, LOWEST_PRIORITY};
use crate::services::alerts::{Alert, AlertKind, AlertLog};
use crate::services::clock::Clock;
use crate::store::{EventGuard, Store};

pub const HELD_REASON: &str = "held";

/// Equal-jitter exponential backoff for the `attempt`-th failure (1-based):
/// half of `min(cap, base * 2^(attempt-1))` plus a random share of the rest
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let ceiling = base_ms.saturating_mul(1u64 << exp).min(cap_ms);
    let half = ceiling / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=ceiling - half)
    };
    Duration::from_millis(half + jitter)
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

#[derive(Clone)]
pub struct EventBus {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: EventConfig,
    alerts: AlertLog,
    in_flight: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl EventBus {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: EventConfig, alerts: AlertLog) -> Self {
        Self {
            store,
            clock,
            config,
            alerts,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn enqueue(&self, event: NewEvent) -> StoreResult<EventEnvelope> {
        let envelope = self
            .store
            .enqueue_event(event, self.config.max_attempts, self.clock.now())
            .await?;
        tracing::debug!(
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            hotel_id = %envelope.hotel_id,
            priority = envelope.priority,
            "Event enqueued"
        );
        Ok(envelope)
    }

    /// Lease due events for `lease_for`, registering a cancellation token for
    /// each
    pub async fn lease(&self, limit: usize, lease_for: Duration) -> StoreResult<Vec<(EventEnvelope, CancellationToken)>> {
        let now = self.clock.now();
        let leased = self
            .store
            .lease_events(now, now + to_chrono(lease_for), limit)
            .await?;

        let mut tokens = self.in_flight.lock();
        Ok(leased
            .into_iter()
            .map(|event| {
                let token = CancellationToken::new();
                tokens.insert(event.id, token.clone());
                (event, token)
            })
            .collect())
    }

    fn release(&self, event_id: Uuid) {
        self.in_flight.lock().remove(&event_id);
    }

    async fn write(&self, event: EventEnvelope, guard: EventGuard) -> StoreResult<EventEnvelope> {
        let id = event.id;
        let result = self.store.update_event(event, guard).await;
        if let Err(StoreError::Conflict(msg)) = &result {
            tracing::warn!(event_id = %id, "Event update lost a race: {}", msg);
        }
        result
    }

    pub async fn succeed(&self, leased: &EventEnvelope, delivered: Vec<String>) -> StoreResult<EventEnvelope> {
        self.release(leased.id);
        let guard = EventGuard::of(leased);
        let mut event = leased.clone();
        event.attempts = (event.attempts + 1).min(event.max_attempts);
        event.status = EventStatus::Succeeded;
        event.leased_until = None;
        event.delivered_channels = delivered;
        event.updated_at = self.clock.now();
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            hotel_id = %event.hotel_id,
            attempts = event.attempts,
            "Event delivered"
        );
        self.write(event, guard).await
    }

    /// Count a failed attempt: back to pending with backoff, or dead at
    /// `max_attempts`. A `Retry-After` longer than the backoff wins.
    pub async fn fail(
        &self,
        leased: &EventEnvelope,
        error: &str,
        retry_after: Option<Duration>,
        policy: Option<&RetryPolicy>,
        delivered: Vec<String>,
    ) -> StoreResult<EventEnvelope> {
        self.release(leased.id);
        let guard = EventGuard::of(leased);
        let event = self.retry_or_bury(leased.clone(), error, retry_after, policy, delivered);
        self.write(event, guard).await
    }

    fn retry_or_bury(
        &self,
        mut event: EventEnvelope,
        error: &str,
        retry_after: Option<Duration>,
        policy: Option<&RetryPolicy>,
        delivered: Vec<String>,
    ) -> EventEnvelope {
        let now = self.clock.now();
        event.attempts = (event.attempts + 1).min(event.max_attempts);
        event.leased_until = None;
        event.last_error = Some(error.to_string());
        event.delivered_channels = delivered;
        event.updated_at = now;

        if event.attempts >= event.max_attempts {
            event.status = EventStatus::Dead;
            self.alerts.raise(
                Alert::new(
                    AlertKind::EventDead,
                    &event.hotel_id,
                    format!(
                        "{} event dead after {} attempts: {}",
                        event.event_type, event.attempts, error
                    ),
                    now,
                )
                .event(event.id),
            );
            return event;
        }

        let (base, cap) = policy.map_or((self.config.backoff_base_ms, self.config.backoff_cap_ms), |p| {
            (p.backoff_base_ms, p.backoff_cap_ms)
        });
        let mut delay = backoff_delay(event.attempts, base, cap);
        if let Some(retry_after) = retry_after {
            delay = delay.max(retry_after);
        }
        event.status = EventStatus::Pending;
        event.next_attempt_at = now + to_chrono(delay);
        tracing::warn!(
            event_id = %event.id,
            event_type = %event.event_type,
            attempt = event.attempts,
            retry_in_ms = delay.as_millis() as u64,
            error,
            "Event delivery failed, retrying"
        );
        event
    }

    /// Terminal failure that retrying cannot fix
    pub async fn fatal(&self, leased: &EventEnvelope, error: &str) -> StoreResult<EventEnvelope> {
        self.release(leased.id);
        let guard = EventGuard::of(leased);
        let now = self.clock.now();
        let mut event = leased.clone();
        event.attempts = (event.attempts + 1).min(event.max_attempts);
        event.status = EventStatus::Failed;
        event.leased_until = None;
        event.last_error = Some(error.to_string());
        event.updated_at = now;
        self.alerts.raise(
            Alert::new(
                AlertKind::EventFailed,
                &event.hotel_id,
                format!("{} event failed: {}", event.event_type, error),
                now,
            )
            .event(event.id),
        );
        self.write(event, guard).await
    }

    /// Park an event behind an unhealthy channel at the lowest priority.
    /// No attempt is counted.
    pub async fn hold(&self, leased: &EventEnvelope, delivered: Vec<String>) -> StoreResult<EventEnvelope> {
        self.release(leased.id);
        let guard = EventGuard::of(leased);
        let now = self.clock.now();
        let mut event = leased.clone();
        event.status = EventStatus::Pending;
        event.priority = LOWEST_PRIORITY;
        event.reason = Some(HELD_REASON.to_string());
        event.leased_until = None;
        event.delivered_channels = delivered;
        event.next_attempt_at = now + ChronoDuration::milliseconds(self.config.hold_ms as i64);
        event.updated_at = now;
        tracing::warn!(event_id = %event.id, hotel_id = %event.hotel_id, "Event held behind unhealthy channel");
        self.write(event, guard).await
    }

    /// Return a leased event untouched after a short delay (channel at its
    /// concurrency cap)
    pub async fn defer(&self, leased: &EventEnvelope, delivered: Vec<String>) -> StoreResult<EventEnvelope> {
        self.release(leased.id);
        let guard = EventGuard::of(leased);
        let now = self.clock.now();
        let mut event = leased.clone();
        event.status = EventStatus::Pending;
        event.leased_until = None;
        event.delivered_channels = delivered;
        event.next_attempt_at = now + ChronoDuration::milliseconds(self.config.defer_ms as i64);
        event.updated_at = now;
        tracing::debug!(event_id = %event.id, "Event deferred");
        self.write(event, guard).await
    }

    /// Make held events of a hotel due now, after a channel recovered
    pub async fn release_held(&self, hotel_id: &str) -> StoreResult<usize> {
        let now = self.clock.now();
        let filter = EventFilter {
            hotel_id: Some(hotel_id.to_string()),
            status: Some(EventStatus::Pending),
            ..Default::default()
        };
        let mut released = 0;
        for event in self.store.list_events(&filter).await? {
            if event.reason.as_deref() != Some(HELD_REASON) || event.next_attempt_at <= now {
                continue;
            }
            let guard = EventGuard::of(&event);
            let mut event = event;
            event.next_attempt_at = now;
            event.updated_at = now;
            match self.store.update_event(event, guard).await {
                Ok(_) => released += 1,
                Err(StoreError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if released > 0 {
            tracing::info!(hotel_id, released, "Released held events");
        }
        Ok(released)
    }

    /// Cancel an in-flight event: its channel calls stop and it goes back to
    /// pending, or dead when out of attempts
    pub async fn cancel(&self, event_id: Uuid) -> CoreResult<EventEnvelope> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {}", event_id)))?;
        if event.status != EventStatus::InFlight {
            return Err(CoreError::Conflict(format!(
                "event {} is {}, not in flight",
                event_id,
                event.status.as_str()
            )));
        }

        if let Some(token) = self.in_flight.lock().remove(&event_id) {
            token.cancel();
        }
        let guard = EventGuard::of(&event);
        let delivered = event.delivered_channels.clone();
        let updated = self.retry_or_bury(event, "cancelled", None, None, delivered);
        tracing::info!(%event_id, status = updated.status.as_str(), "Event cancelled");
        Ok(self.write(updated, guard).await?)
    }

    /// Reclaim events whose lease ran out; each counts as a failed attempt
    pub async fn reclaim_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut reclaimed = 0;
        for event in self.store.expired_leases(now).await? {
            if let Some(token) = self.in_flight.lock().remove(&event.id) {
                token.cancel();
            }
            let guard = EventGuard::of(&event);
            let delivered = event.delivered_channels.clone();
            let updated = self.retry_or_bury(event, "lease expired", None, None, delivered);
            match self.store.update_event(updated, guard).await {
                Ok(_) => reclaimed += 1,
                Err(StoreError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if reclaimed > 0 {
            tracing::warn!(reclaimed, "Reclaimed expired leases");
        }
        Ok(reclaimed)
    }

    /// Operator action: give a dead or failed event a fresh set of attempts
    pub async fn requeue_dead(&self, event_id: Uuid) -> CoreResult<EventEnvelope> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {}", event_id)))?;
        if !matches!(event.status, EventStatus::Dead | EventStatus::Failed) {
            return Err(CoreError::Conflict(format!(
                "event {} is {}, only dead or failed events can be requeued",
                event_id,
                event.status.as_str()
            )));
        }

        let guard = EventGuard::of(&event);
        let now = self.clock.now();
        let mut event = event;
        event.status = EventStatus::Pending;
        event.attempts = 0;
        event.next_attempt_at = now;
        event.reason = Some("requeued".to_string());
        event.updated_at = now;
        tracing::info!(%event_id, "Event requeued");
        Ok(self.write(event, guard).await?)
    }

    pub async fn get(&self, event_id: Uuid) -> StoreResult<Option<EventEnvelope>> {
        self.store.get_event(event_id).await
    }

    pub async fn list(&self, filter: &EventFilter) -> StoreResult<Vec<EventEnvelope>> {
        self.store.list_events(filter).await
    }
}
