//! Delivers leased events to the hotel's channels.
//!
//! Each target channel gets one call per supported currency (rates) or one
//! call per event (inventory, notices). Outcomes are folded back into a
//! single bus transition: any retryable failure retries the event, and
//! channels that already accepted it are skipped on the next attempt.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, CurrencyError, StoreResult, TransportError};
use crate::models::channel::{ChannelConfig, RetryPolicy};
use crate::models::event::{EventEnvelope, EventPayload, EventType, NewEvent};
use crate::models::rate_plan::DatedRate;
use crate::services::alerts::{Alert, AlertKind, AlertLog};
use crate::services::channel_adapters::{
    inventory_body, notice_body, payload_digest, rates_body, sign, RateLine,
};
use crate::services::channel_registry::{ChannelRegistry, HealthChange};
use crate::services::clock::Clock;
use crate::services::currency::{validate_code, CurrencyService};
use crate::services::event_bus::EventBus;
use crate::services::transport::{ChannelRequest, ChannelTransport, HttpMethod};

pub const MANUAL_PUSH_PRIORITY: u8 = 2;

/// One outbound channel call, kept so every delivery can be traced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    pub hotel_id: String,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub payload_digest: String,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct CallLog {
    entries: Arc<Mutex<VecDeque<CallRecord>>>,
    capacity: usize,
}

impl CallLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, record: CallRecord) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    pub fn for_event(&self, event_id: Uuid) -> Vec<CallRecord> {
        self.entries
            .lock()
            .iter()
            .filter(|r| r.event_id == Some(event_id))
            .cloned()
            .collect()
    }

    pub fn recent(&self, limit: usize) -> Vec<CallRecord> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }
}

/// Body of `distributeRates`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeRatesRequest {
    pub rates: Vec<DatedRate>,
    /// Empty pushes to every channel syncing rates
    #[serde(default)]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChannelOutcome {
    Delivered,
    /// 4xx other than auth and 429: the channel refused the content
    Rejected(String),
    Retry {
        error: String,
        retry_after: Option<Duration>,
        counts_against_health: bool,
    },
    Fatal(String),
    Deferred,
    Held,
    Cancelled,
}

struct PreparedCall {
    currency: Option<String>,
    path: String,
    body: String,
}

#[derive(Clone)]
pub struct Distributor {
    registry: ChannelRegistry,
    currency: CurrencyService,
    bus: EventBus,
    transport: Arc<dyn ChannelTransport>,
    clock: Arc<dyn Clock>,
    alerts: AlertLog,
    call_log: CallLog,
    per_channel_limit: usize,
    limits: Arc<Mutex<HashMap<(String, String), Arc<Semaphore>>>>,
}

impl Distributor {
    pub fn new(
        registry: ChannelRegistry,
        currency: CurrencyService,
        bus: EventBus,
        transport: Arc<dyn ChannelTransport>,
        clock: Arc<dyn Clock>,
        alerts: AlertLog,
    ) -> Self {
        let defaults = registry.defaults().clone();
        Self {
            registry,
            currency,
            bus,
            transport,
            clock,
            alerts,
            call_log: CallLog::new(defaults.call_log_capacity),
            per_channel_limit: defaults.per_channel_concurrency.max(1),
            limits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Every channel's deadline is bounded by the registry's timeout cap,
    /// so no delivery outlives the lease
    pub fn lease_for(&self) -> Duration {
        let max_deadline_ms = delivery_deadline_ms(self.registry.defaults().max_timeout_ms);
        self.bus.config().lease_duration(max_deadline_ms)
    }

    pub fn call_log(&self) -> &CallLog {
        &self.call_log
    }

    /// Lease up to `limit` due events and deliver them concurrently.
    /// Returns how many were leased.
    pub async fn dispatch_due(&self, limit: usize) -> StoreResult<usize> {
        let leased = self.bus.lease(limit, self.lease_for()).await?;
        let count = leased.len();

        join_all(leased.into_iter().map(|(event, token)| async move {
            let event_id = event.id;
            if let Err(e) = self.dispatch(event, token).await {
                tracing::warn!(%event_id, error = %e, "Event dispatch could not record its outcome");
            }
        }))
        .await;

        Ok(count)
    }

    /// Deliver one leased event and record the outcome on the bus. `None`
    /// when the event was cancelled mid-flight.
    pub async fn dispatch(&self, event: EventEnvelope, token: CancellationToken) -> StoreResult<Option<EventEnvelope>> {
        if !event.event_type.is_routable() {
            self.raise_overbooking(&event);
            let delivered = event.delivered_channels.clone();
            return self.bus.succeed(&event, delivered).await.map(Some);
        }

        let targets: Vec<ChannelConfig> = self
            .registry
            .list(&event.hotel_id)
            .await?
            .into_iter()
            .filter(|config| routes_to(&event, config))
            .collect();

        let mut delivered = event.delivered_channels.clone();
        if targets.is_empty() {
            tracing::debug!(event_id = %event.id, hotel_id = %event.hotel_id, "No pending channel for event");
            return self.bus.succeed(&event, delivered).await.map(Some);
        }

        let hold_unhealthy = event.attempts == 0;
        let outcomes = join_all(
            targets
                .iter()
                .map(|config| self.deliver(&event, config, hold_unhealthy, &token)),
        )
        .await;

        let mut retry: Option<(String, Option<Duration>, RetryPolicy)> = None;
        let mut fatal: Option<String> = None;
        let (mut deferred, mut held, mut cancelled) = (false, false, false);

        for (config, outcome) in targets.iter().zip(outcomes) {
            let channel_id = &config.channel_id;
            match outcome {
                ChannelOutcome::Delivered => delivered.push(channel_id.clone()),
                ChannelOutcome::Rejected(reason) => {
                    tracing::warn!(
                        event_id = %event.id,
                        channel_id = %channel_id,
                        reason = %reason,
                        "Channel rejected payload, not retrying"
                    );
                    delivered.push(channel_id.clone());
                }
                ChannelOutcome::Retry { error, retry_after, .. } => {
                    let error = format!("{}: {}", channel_id, error);
                    retry = Some(match retry {
                        Some((first, previous, policy)) => (first, previous.max(retry_after), policy),
                        None => (error, retry_after, config.retry_policy),
                    });
                }
                ChannelOutcome::Fatal(error) => fatal = Some(format!("{}: {}", channel_id, error)),
                ChannelOutcome::Deferred => deferred = true,
                ChannelOutcome::Held => held = true,
                ChannelOutcome::Cancelled => cancelled = true,
            }
        }

        if cancelled || token.is_cancelled() {
            tracing::info!(event_id = %event.id, "Event dispatch cancelled");
            return Ok(None);
        }

        let updated = if let Some((error, retry_after, policy)) = retry {
            self.bus.fail(&event, &error, retry_after, Some(&policy), delivered).await?
        } else if let Some(error) = fatal {
            self.bus.fatal(&event, &error).await?
        } else if deferred {
            self.bus.defer(&event, delivered).await?
        } else if held {
            self.bus.hold(&event, delivered).await?
        } else {
            self.bus.succeed(&event, delivered).await?
        };
        Ok(Some(updated))
    }

    fn semaphore(&self, config: &ChannelConfig) -> Arc<Semaphore> {
        self.limits
            .lock()
            .entry((config.hotel_id.clone(), config.channel_id.clone()))
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_channel_limit)))
            .clone()
    }

    async fn deliver(
        &self,
        event: &EventEnvelope,
        config: &ChannelConfig,
        hold_unhealthy: bool,
        token: &CancellationToken,
    ) -> ChannelOutcome {
        if hold_unhealthy && config.is_unhealthy() {
            return ChannelOutcome::Held;
        }
        let permit = match self.semaphore(config).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!(channel_id = %config.channel_id, "Channel at concurrency cap");
                return ChannelOutcome::Deferred;
            }
        };

        let deadline = Duration::from_millis(delivery_deadline_ms(config.timeout_ms));
        let outcome = match tokio::time::timeout(deadline, self.send_all(event, config, token)).await {
            Ok(outcome) => outcome,
            Err(_) => ChannelOutcome::Retry {
                error: format!("event deadline of {}ms exceeded", deadline.as_millis()),
                retry_after: None,
                counts_against_health: true,
            },
        };
        drop(permit);

        let hotel_id = &event.hotel_id;
        let channel_id = &config.channel_id;
        let reachable = match &outcome {
            ChannelOutcome::Delivered => Some(
                self.registry
                    .record_success(hotel_id, channel_id, Some(event.event_type))
                    .await,
            ),
            ChannelOutcome::Rejected(reason) => Some(self.registry.record_rejection(hotel_id, channel_id, reason).await),
            _ => None,
        };
        match reachable {
            Some(Ok(HealthChange::Recovered)) => {
                if let Err(e) = self.bus.release_held(hotel_id).await {
                    tracing::warn!(hotel_id = %hotel_id, error = %e, "Could not release held events");
                }
            }
            Some(Err(e)) => tracing::warn!(channel_id = %channel_id, error = %e, "Could not record channel health"),
            _ => {}
        }
        if let ChannelOutcome::Retry {
            error,
            counts_against_health: true,
            ..
        } = &outcome
        {
            if let Err(e) = self.registry.record_failure(hotel_id, channel_id, error).await {
                tracing::warn!(channel_id = %channel_id, error = %e, "Could not record channel failure");
            }
        }
        outcome
    }

    async fn send_all(&self, event: &EventEnvelope, config: &ChannelConfig, token: &CancellationToken) -> ChannelOutcome {
        let calls = match self.prepare(event, config).await {
            Ok(calls) => calls,
            Err(outcome) => return outcome,
        };

        let mut config = config.clone();
        let mut rejected: Option<String> = None;
        for call in calls {
            match self.call(Some(event.id), &mut config, &call, token).await {
                ChannelOutcome::Delivered => {}
                ChannelOutcome::Rejected(reason) => rejected = Some(reason),
                other => return other,
            }
        }
        match rejected {
            Some(reason) => ChannelOutcome::Rejected(reason),
            None => ChannelOutcome::Delivered,
        }
    }

    async fn prepare(&self, event: &EventEnvelope, config: &ChannelConfig) -> Result<Vec<PreparedCall>, ChannelOutcome> {
        let json = |value: serde_json::Value| value.to_string();
        match &event.payload {
            EventPayload::Rates { rates } => {
                let mut calls = Vec::with_capacity(config.supported_currencies.len());
                for supported in &config.supported_currencies {
                    let mut lines = Vec::with_capacity(rates.len());
                    for rate in rates {
                        let adjusted = self
                            .currency
                            .apply_channel_adjustment(rate.amount, &rate.currency, supported)
                            .await
                            .map_err(currency_outcome)?;
                        if adjusted.stale {
                            tracing::warn!(
                                event_id = %event.id,
                                channel_id = %config.channel_id,
                                currency = %supported.code,
                                "Distributing with a stale exchange rate"
                            );
                        }
                        lines.push(RateLine {
                            room_id: config.channel_room_id(&rate.room_type_id).to_string(),
                            date: rate.date,
                            amount: adjusted.amount,
                            currency: adjusted.currency,
                        });
                    }
                    calls.push(PreparedCall {
                        currency: Some(supported.wire_code().to_string()),
                        path: config.endpoints.rates_path.clone(),
                        body: json(rates_body(config, &lines)),
                    });
                }
                Ok(calls)
            }
            EventPayload::Availability { rows } => Ok(vec![PreparedCall {
                currency: None,
                path: config.endpoints.inventory_path.clone(),
                body: json(inventory_body(config, rows)),
            }]),
            payload => Ok(notice_body(config, payload)
                .map(|body| PreparedCall {
                    currency: None,
                    path: config.endpoints.content_path().to_string(),
                    body: json(body),
                })
                .into_iter()
                .collect()),
        }
    }

    /// One signed call; an auth rejection switches to the backup credential
    /// and retries once
    async fn call(
        &self,
        event_id: Option<Uuid>,
        config: &mut ChannelConfig,
        call: &PreparedCall,
        token: &CancellationToken,
    ) -> ChannelOutcome {
        let mut switched = false;
        loop {
            let headers = match sign(&config.credentials.primary.auth, &call.body, self.clock.now().timestamp()) {
                Ok(headers) => headers,
                Err(e) => return ChannelOutcome::Fatal(e.to_string()),
            };
            let mut request_headers = vec![("Content-Type".to_string(), "application/json".to_string())];
            request_headers.extend(headers);
            let request = ChannelRequest {
                method: HttpMethod::Post,
                url: config.endpoints.url(&call.path),
                headers: request_headers,
                body: Some(call.body.clone()),
                timeout: Duration::from_millis(config.timeout_ms),
            };
            let url = request.url.clone();

            let started = Instant::now();
            let result = self.transport.send(request, token.clone()).await;
            self.call_log.record(CallRecord {
                at: self.clock.now(),
                event_id,
                hotel_id: config.hotel_id.clone(),
                channel_id: config.channel_id.clone(),
                currency: call.currency.clone(),
                url,
                status: result.as_ref().ok().map(|r| r.status),
                error: result.as_ref().err().map(|e| e.to_string()),
                payload_digest: payload_digest(&call.body),
                duration_ms: started.elapsed().as_millis() as u64,
            });

            let response = match result {
                Ok(response) => response,
                Err(TransportError::Cancelled) => return ChannelOutcome::Cancelled,
                Err(TransportError::Invalid(message)) => return ChannelOutcome::Fatal(message),
                Err(e) => {
                    return ChannelOutcome::Retry {
                        error: e.to_string(),
                        retry_after: None,
                        counts_against_health: true,
                    }
                }
            };

            match response.status {
                _ if response.is_success() => return ChannelOutcome::Delivered,
                401 | 403 => {
                    if !switched {
                        match self.registry.promote_backup(&config.hotel_id, &config.channel_id).await {
                            Ok(Some(updated)) => {
                                *config = updated;
                                switched = true;
                                continue;
                            }
                            Ok(None) => {}
                            Err(e) => tracing::warn!(channel_id = %config.channel_id, error = %e, "Backup lookup failed"),
                        }
                    }
                    let error = format!("HTTP {} credential rejected", response.status);
                    if let Err(e) = self
                        .registry
                        .mark_degraded(&config.hotel_id, &config.channel_id, &error)
                        .await
                    {
                        tracing::warn!(channel_id = %config.channel_id, error = %e, "Could not mark channel degraded");
                    }
                    return ChannelOutcome::Retry {
                        error,
                        retry_after: None,
                        counts_against_health: false,
                    };
                }
                429 => {
                    return ChannelOutcome::Retry {
                        error: "HTTP 429 rate limited".to_string(),
                        retry_after: response.retry_after,
                        counts_against_health: false,
                    }
                }
                400..=499 => {
                    return ChannelOutcome::Rejected(format!("HTTP {}: {}", response.status, truncate(&response.body)))
                }
                status => {
                    return ChannelOutcome::Retry {
                        error: format!("HTTP {}", status),
                        retry_after: response.retry_after,
                        counts_against_health: true,
                    }
                }
            }
        }
    }

    /// Call the channel's health endpoint. On success the channel is marked
    /// active and its held events become due.
    pub async fn probe(&self, config: &ChannelConfig) -> CoreResult<bool> {
        let Some(path) = config.endpoints.health_path.as_deref() else {
            return Ok(false);
        };
        let headers = sign(&config.credentials.primary.auth, "", self.clock.now().timestamp())
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let request = ChannelRequest {
            method: HttpMethod::Get,
            url: config.endpoints.url(path),
            headers,
            body: None,
            timeout: Duration::from_millis(config.timeout_ms),
        };
        let url = request.url.clone();
        let started = Instant::now();
        let result = self.transport.send(request, CancellationToken::new()).await;
        self.call_log.record(CallRecord {
            at: self.clock.now(),
            event_id: None,
            hotel_id: config.hotel_id.clone(),
            channel_id: config.channel_id.clone(),
            currency: None,
            url,
            status: result.as_ref().ok().map(|r| r.status),
            error: result.as_ref().err().map(|e| e.to_string()),
            payload_digest: payload_digest(""),
            duration_ms: started.elapsed().as_millis() as u64,
        });

        let healthy = matches!(&result, Ok(response) if response.is_success());
        if healthy {
            let change = self
                .registry
                .record_success(&config.hotel_id, &config.channel_id, None)
                .await?;
            if change == HealthChange::Recovered {
                self.bus.release_held(&config.hotel_id).await?;
            }
        }
        tracing::info!(
            hotel_id = %config.hotel_id,
            channel_id = %config.channel_id,
            healthy,
            "Health probe finished"
        );
        Ok(healthy)
    }

    /// Explicit push of given rates, one event per requested channel (or one
    /// broadcast event)
    pub async fn distribute_rates(
        &self,
        hotel_id: &str,
        request: DistributeRatesRequest,
    ) -> CoreResult<Vec<EventEnvelope>> {
        if request.rates.is_empty() {
            return Err(CoreError::Validation("rates cannot be empty".to_string()));
        }
        for rate in &request.rates {
            validate_code(&rate.currency)?;
            if rate.amount <= rust_decimal::Decimal::ZERO {
                return Err(CoreError::Validation(format!(
                    "amount for {} on {} must be positive",
                    rate.room_type_id, rate.date
                )));
            }
        }
        for channel_id in &request.channels {
            if self.registry.get(hotel_id, channel_id).await?.is_none() {
                return Err(CoreError::NotFound(format!("channel {} of hotel {}", channel_id, hotel_id)));
            }
        }

        let payload = EventPayload::Rates { rates: request.rates };
        let base = NewEvent::new(EventType::RateUpdate, hotel_id, payload, MANUAL_PUSH_PRIORITY).with_reason("manual_push");
        let events: Vec<NewEvent> = if request.channels.is_empty() {
            vec![base]
        } else {
            request.channels.iter().map(|c| base.clone().for_channel(c)).collect()
        };

        let mut enqueued = Vec::with_capacity(events.len());
        for event in events {
            enqueued.push(self.bus.enqueue(event).await?);
        }
        tracing::info!(hotel_id, events = enqueued.len(), "Rates pushed for distribution");
        Ok(enqueued)
    }

    fn raise_overbooking(&self, event: &EventEnvelope) {
        if let EventPayload::OverbookingAlert {
            channel_id,
            channel_booking_id,
            details,
        } = &event.payload
        {
            self.alerts.raise(
                Alert::new(
                    AlertKind::Overbooking,
                    &event.hotel_id,
                    format!("booking {} rejected: {}", channel_booking_id, details),
                    self.clock.now(),
                )
                .channel(channel_id)
                .event(event.id),
            );
        }
    }
}

/// Channels this event still has to reach
/// Per-event deadline for one channel: all of its calls share twice the
/// channel timeout
fn delivery_deadline_ms(timeout_ms: u64) -> u64 {
    timeout_ms.saturating_mul(2)
}

fn routes_to(event: &EventEnvelope, config: &ChannelConfig) -> bool {
    let pinned = match &event.payload {
        EventPayload::ChannelModification { channel_id, .. } | EventPayload::BookingSync { channel_id, .. } => {
            Some(channel_id)
        }
        _ => event.target_channel.as_ref(),
    };
    config.lifecycle.can_send()
        && config.syncs(event.event_type)
        && pinned.map_or(true, |c| c == &config.channel_id)
        && !event.excluded_channels.contains(&config.channel_id)
        && !event.delivered_channels.contains(&config.channel_id)
}

fn currency_outcome(error: CurrencyError) -> ChannelOutcome {
    match error {
        CurrencyError::ExchangeRateUnavailable { .. } | CurrencyError::Provider(_) => ChannelOutcome::Retry {
            error: error.to_string(),
            retry_after: None,
            counts_against_health: false,
        },
        other => ChannelOutcome::Fatal(other.to_string()),
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::channel::{ChannelAuth, ChannelKind, ConnectionStatus};
    use crate::models::event::{EventFilter, EventStatus};
    use crate::services::channel_registry::tests::{auth_for, input};
    use crate::services::clock::ManualClock;
    use crate::services::currency::StaticRateProvider;
    use crate::services::transport::{ChannelResponse, ScriptedTransport};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    struct Harness {
        distributor: Distributor,
        registry: ChannelRegistry,
        bus: EventBus,
        transport: ScriptedTransport,
        clock: ManualClock,
    }

    fn harness() -> Harness {
        let config = AppConfig::default();
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc::now());
        let alerts = AlertLog::new(50);
        let registry = ChannelRegistry::new(
            store.clone(),
            Arc::new(clock.clone()),
            alerts.clone(),
            config.channel.clone(),
            &config.cache,
        );
        let provider = Arc::new(StaticRateProvider::new().with_rate("USD", "EUR", dec!(0.9)));
        let currency = CurrencyService::new(provider, Arc::new(clock.clone()), &config.currency, &config.cache);
        let bus = EventBus::new(store, Arc::new(clock.clone()), config.event.clone(), alerts.clone());
        let transport = ScriptedTransport::new();
        let distributor = Distributor::new(
            registry.clone(),
            currency,
            bus.clone(),
            Arc::new(transport.clone()),
            Arc::new(clock.clone()),
            alerts,
        );
        Harness {
            distributor,
            registry,
            bus,
            transport,
            clock,
        }
    }

    fn rates_event() -> NewEvent {
        NewEvent::new(
            EventType::RateUpdate,
            "H1",
            EventPayload::Rates {
                rates: vec![DatedRate {
                    room_type_id: "RT1".to_string(),
                    rate_plan_id: None,
                    date: NaiveDate::from_ymd_opt(2025, 9, 10).unwrap(),
                    amount: dec!(100),
                    currency: "USD".to_string(),
                }],
            },
            3,
        )
    }

    async fn run(h: &Harness) -> Option<EventEnvelope> {
        let mut leased = h.bus.lease(1, Duration::from_secs(30)).await.unwrap();
        let (event, token) = leased.pop()?;
        h.distributor.dispatch(event, token).await.unwrap()
    }

    #[tokio::test]
    async fn test_success_updates_last_sync_and_logs_call() {
        let h = harness();
        h.registry
            .upsert("H1", input("booking", ChannelKind::BookingCom, "https://booking.test"))
            .await
            .unwrap();
        h.bus.enqueue(rates_event()).await.unwrap();

        let event = run(&h).await.unwrap();
        assert_eq!(event.status, EventStatus::Succeeded);
        assert_eq!(event.delivered_channels, vec!["booking".to_string()]);

        let calls = h.distributor.call_log().for_event(event.id);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status, Some(200));
        let sent = h.transport.requests_to("https://booking.test/rates");
        assert_eq!(calls[0].payload_digest, payload_digest(sent[0].body.as_deref().unwrap()));
        assert!(sent[0].header("Authorization").unwrap().starts_with("Basic "));

        let config = h.registry.get("H1", "booking").await.unwrap().unwrap();
        assert!(config.health.last_sync.rates.is_some());
    }

    #[tokio::test]
    async fn test_converts_per_supported_currency() {
        let h = harness();
        let mut channel = input("expedia", ChannelKind::Expedia, "https://expedia.test");
        let mut eur = channel.supported_currencies[0].clone();
        eur.code = "EUR".to_string();
        channel.supported_currencies.push(eur);
        h.registry.upsert("H1", channel).await.unwrap();
        h.bus.enqueue(rates_event()).await.unwrap();

        run(&h).await.unwrap();
        let bodies: Vec<serde_json::Value> = h
            .transport
            .requests_to("https://expedia.test")
            .iter()
            .map(|r| serde_json::from_str(r.body.as_deref().unwrap()).unwrap())
            .collect();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["roomRates"][0]["amount"]["value"], "100.00");
        assert_eq!(bodies[1]["roomRates"][0]["amount"]["value"], "90.00");
        assert_eq!(bodies[1]["roomRates"][0]["amount"]["currency"], "EUR");
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let h = harness();
        h.registry
            .upsert("H1", input("airbnb", ChannelKind::Airbnb, "https://airbnb.test"))
            .await
            .unwrap();
        h.transport.push("https://airbnb.test", Ok(ChannelResponse::new(422)));
        h.bus.enqueue(rates_event()).await.unwrap();

        let event = run(&h).await.unwrap();
        assert_eq!(event.status, EventStatus::Succeeded);
        assert_eq!(event.attempts, 1);

        let config = h.registry.get("H1", "airbnb").await.unwrap().unwrap();
        assert!(config.health.last_sync.rates.is_none());
        assert!(config.health.last_error.unwrap().starts_with("rejected"));
        assert_eq!(config.health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_slow_channel_finishes_inside_its_lease() {
        let h = harness();
        let max_timeout_ms = h.registry.defaults().max_timeout_ms;
        assert!(max_timeout_ms > h.registry.defaults().timeout_ms);
        let mut channel = input("booking", ChannelKind::BookingCom, "https://booking.test");
        channel.timeout_ms = Some(max_timeout_ms);
        h.registry.upsert("H1", channel).await.unwrap();
        let queued = h.bus.enqueue(rates_event()).await.unwrap();
        let gate = h.transport.hold_requests();

        let distributor = h.distributor.clone();
        let dispatch = tokio::spawn(async move { distributor.dispatch_due(1).await });
        let mut leased = h.bus.get(queued.id).await.unwrap().unwrap();
        for _ in 0..100 {
            if leased.status == EventStatus::InFlight {
                break;
            }
            tokio::task::yield_now().await;
            leased = h.bus.get(queued.id).await.unwrap().unwrap();
        }
        assert_eq!(leased.status, EventStatus::InFlight);

        // The call uses its whole deadline without losing the lease
        h.clock.advance(chrono::Duration::milliseconds(2 * max_timeout_ms as i64));
        assert!(leased.leased_until.unwrap() > h.clock.now());
        assert_eq!(h.bus.reclaim_expired().await.unwrap(), 0);

        gate.add_permits(1);
        assert_eq!(dispatch.await.unwrap().unwrap(), 1);
        let done = h.bus.get(queued.id).await.unwrap().unwrap();
        assert_eq!(done.status, EventStatus::Succeeded);
        assert_eq!(done.attempts, 1);
    }

    #[tokio::test]
    async fn test_auth_failure_switches_to_backup_once() {
        let h = harness();
        let mut channel = input("agoda", ChannelKind::Agoda, "https://agoda.test");
        channel.backup_auth = Some(auth_for(ChannelKind::Agoda, "backup-secret"));
        h.registry.upsert("H1", channel).await.unwrap();
        h.transport.push("https://agoda.test", Ok(ChannelResponse::new(401)));
        h.bus.enqueue(rates_event()).await.unwrap();

        let event = run(&h).await.unwrap();
        assert_eq!(event.status, EventStatus::Succeeded);
        let requests = h.transport.requests_to("https://agoda.test");
        assert_eq!(requests.len(), 2);
        assert_ne!(requests[0].header("Authorization"), requests[1].header("Authorization"));
        let config = h.registry.get("H1", "agoda").await.unwrap().unwrap();
        assert!(matches!(config.credentials.primary.auth, ChannelAuth::Basic { ref password, .. } if password == "backup-secret"));
    }

    #[tokio::test]
    async fn test_auth_failure_without_backup_degrades_and_retries() {
        let h = harness();
        h.registry
            .upsert("H1", input("expedia", ChannelKind::Expedia, "https://expedia.test"))
            .await
            .unwrap();
        h.transport.push("https://expedia.test", Ok(ChannelResponse::new(403)));
        h.bus.enqueue(rates_event()).await.unwrap();

        let event = run(&h).await.unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.attempts, 1);
        let config = h.registry.get("H1", "expedia").await.unwrap().unwrap();
        assert_eq!(config.health.connection_status, ConnectionStatus::Degraded);
    }

    #[tokio::test]
    async fn test_rate_limit_honours_retry_after() {
        let h = harness();
        h.registry
            .upsert("H1", input("booking", ChannelKind::BookingCom, "https://booking.test"))
            .await
            .unwrap();
        h.transport
            .push("https://booking.test", Ok(ChannelResponse::new(429).with_retry_after(3600)));
        h.bus.enqueue(rates_event()).await.unwrap();

        let event = run(&h).await.unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert!(event.next_attempt_at >= h.clock.now() + chrono::Duration::seconds(3600));
        let config = h.registry.get("H1", "booking").await.unwrap().unwrap();
        assert_eq!(config.health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_retry_skips_channels_that_already_accepted() {
        let h = harness();
        h.registry
            .upsert("H1", input("booking", ChannelKind::BookingCom, "https://booking.test"))
            .await
            .unwrap();
        h.registry
            .upsert("H1", input("expedia", ChannelKind::Expedia, "https://expedia.test"))
            .await
            .unwrap();
        h.transport.push("https://expedia.test", Ok(ChannelResponse::new(503)));
        h.bus.enqueue(rates_event()).await.unwrap();

        let first = run(&h).await.unwrap();
        assert_eq!(first.status, EventStatus::Pending);
        assert_eq!(first.delivered_channels, vec!["booking".to_string()]);

        h.clock.advance(chrono::Duration::hours(1));
        let second = run(&h).await.unwrap();
        assert_eq!(second.status, EventStatus::Succeeded);
        assert_eq!(h.transport.requests_to("https://booking.test").len(), 1);
        assert_eq!(h.transport.requests_to("https://expedia.test").len(), 2);
    }

    #[tokio::test]
    async fn test_unhealthy_channel_holds_new_events_until_probe() {
        let h = harness();
        h.registry
            .upsert("H1", input("booking", ChannelKind::BookingCom, "https://booking.test"))
            .await
            .unwrap();
        for _ in 0..3 {
            h.registry.record_failure("H1", "booking", "503").await.unwrap();
        }
        h.bus.enqueue(rates_event()).await.unwrap();

        let held = run(&h).await.unwrap();
        assert_eq!(held.status, EventStatus::Pending);
        assert_eq!(held.priority, 5);
        assert_eq!(held.attempts, 0);
        assert!(h.transport.requests_to("https://booking.test/rates").is_empty());

        let config = h.registry.get("H1", "booking").await.unwrap().unwrap();
        assert!(h.distributor.probe(&config).await.unwrap());
        let delivered = run(&h).await.unwrap();
        assert_eq!(delivered.status, EventStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_channel_cap_defers_event() {
        let h = harness();
        h.registry
            .upsert("H1", input("booking", ChannelKind::BookingCom, "https://booking.test"))
            .await
            .unwrap();
        let config = h.registry.get("H1", "booking").await.unwrap().unwrap();
        let semaphore = h.distributor.semaphore(&config);
        let _taken = semaphore.acquire_many_owned(4).await.unwrap();
        h.bus.enqueue(rates_event()).await.unwrap();

        let event = run(&h).await.unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.attempts, 0);
        assert!(event.next_attempt_at > h.clock.now());
    }

    #[tokio::test]
    async fn test_overbooking_alert_goes_to_alert_log() {
        let h = harness();
        let alert = NewEvent::new(
            EventType::OverbookingAlert,
            "H1",
            EventPayload::OverbookingAlert {
                channel_id: "booking".to_string(),
                channel_booking_id: "B-1".to_string(),
                details: "RT1 on 2025-09-10 sold out".to_string(),
            },
            1,
        );
        h.bus.enqueue(alert).await.unwrap();

        let event = run(&h).await.unwrap();
        assert_eq!(event.status, EventStatus::Succeeded);
        let alerts = h.bus.alerts().recent(Some("H1"), 5);
        assert_eq!(alerts[0].kind, AlertKind::Overbooking);
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_distribute_rates_targets_requested_channels() {
        let h = harness();
        h.registry
            .upsert("H1", input("booking", ChannelKind::BookingCom, "https://booking.test"))
            .await
            .unwrap();
        let request = DistributeRatesRequest {
            rates: vec![DatedRate {
                room_type_id: "RT1".to_string(),
                rate_plan_id: None,
                date: NaiveDate::from_ymd_opt(2025, 9, 10).unwrap(),
                amount: dec!(120),
                currency: "USD".to_string(),
            }],
            channels: vec!["booking".to_string()],
        };
        let events = h.distributor.distribute_rates("H1", request.clone()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target_channel.as_deref(), Some("booking"));
        assert_eq!(events[0].priority, MANUAL_PUSH_PRIORITY);

        let mut unknown = request;
        unknown.channels = vec!["nope".to_string()];
        assert!(matches!(
            h.distributor.distribute_rates("H1", unknown).await,
            Err(CoreError::NotFound(_))
        ));
        let pending = h.bus.list(&EventFilter::default()).await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}
