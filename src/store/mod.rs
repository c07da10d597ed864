//! Transactional document store.
//!
//! Every write that must be observed by channels takes an [`OutboxSpec`] and
//! enqueues its event inside the same transaction as the rows it describes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::availability::{AvailabilityRow, AvailabilityUpdate};
use crate::models::booking::{InboundChannelEvent, InternalBooking, ReconciliationRecord};
use crate::models::channel::ChannelConfig;
use crate::models::event::{EventEnvelope, EventFilter, EventStatus, NewEvent};
use crate::models::hotel::{Hotel, RoomType};
use crate::models::job::JobStatus;
use crate::models::rate_plan::{DynamicRule, PromoCode, RateOverride, RatePlan, RateUpdate, SeasonalRate};

pub mod memory;
pub mod outbox;
pub mod queue;
pub mod sea;

pub use memory::MemoryStore;
pub use sea::SeaOrmStore;

/// Availability write mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `DuplicateKey` if any row already exists
    Insert,
    Upsert,
}

/// Routing and priority for an event written through the outbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxSpec {
    pub priority: u8,
    pub max_attempts: u32,
    pub reason: Option<String>,
    pub target_channel: Option<String>,
    pub excluded_channels: Vec<String>,
}

impl OutboxSpec {
    pub fn new(priority: u8, max_attempts: u32) -> Self {
        Self {
            priority,
            max_attempts,
            reason: None,
            target_channel: None,
            excluded_channels: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn excluding(mut self, channel_id: &str) -> Self {
        self.excluded_channels.push(channel_id.to_string());
        self
    }
}

/// Outcome of a committed sub-batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub modified: usize,
    pub upserted: usize,
    pub event_id: Option<Uuid>,
}

/// Inbound booking change to apply; the store plans it against the booking
/// row it holds
#[derive(Debug, Clone)]
pub struct BookingChange {
    pub hotel_id: String,
    pub inbound: InboundChannelEvent,
    pub outbox: OutboxSpec,
}

#[derive(Debug, Clone)]
pub struct BookingCommit {
    pub booking: InternalBooking,
    pub rows: Vec<AvailabilityRow>,
    pub event_id: Option<Uuid>,
}

/// Expected state for a compare-and-set on an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventGuard {
    pub status: EventStatus,
    pub leased_until: Option<DateTime<Utc>>,
}

impl EventGuard {
    pub fn of(event: &EventEnvelope) -> Self {
        Self {
            status: event.status,
            leased_until: event.leased_until,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // Hotels and room types

    async fn upsert_hotel(&self, hotel: Hotel) -> StoreResult<Hotel>;

    async fn get_hotel(&self, hotel_id: &str) -> StoreResult<Option<Hotel>>;

    async fn list_hotels(&self) -> StoreResult<Vec<Hotel>>;

    async fn upsert_room_type(&self, room_type: RoomType) -> StoreResult<RoomType>;

    async fn get_room_type(&self, hotel_id: &str, room_type_id: &str) -> StoreResult<Option<RoomType>>;

    async fn list_room_types(&self, hotel_id: &str) -> StoreResult<Vec<RoomType>>;

    // Rate store

    /// Insert or replace a plan. Rejects a priority conflict with `Conflict`.
    async fn save_rate_plan(&self, plan: RatePlan) -> StoreResult<RatePlan>;

    async fn get_rate_plan(&self, hotel_id: &str, plan_id: Uuid) -> StoreResult<Option<RatePlan>>;

    async fn list_rate_plans(&self, hotel_id: &str, room_type_id: Option<&str>) -> StoreResult<Vec<RatePlan>>;

    async fn save_seasonal_rate(&self, rate: SeasonalRate) -> StoreResult<SeasonalRate>;

    async fn list_seasonal_rates(&self, hotel_id: &str) -> StoreResult<Vec<SeasonalRate>>;

    async fn save_rate_override(&self, rate_override: RateOverride) -> StoreResult<RateOverride>;

    async fn get_rate_override(&self, hotel_id: &str, override_id: Uuid) -> StoreResult<Option<RateOverride>>;

    /// Overrides (active or not) for the room type in `from..=to`
    async fn list_rate_overrides(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<RateOverride>>;

    async fn save_dynamic_rule(&self, rule: DynamicRule) -> StoreResult<DynamicRule>;

    async fn list_dynamic_rules(&self, hotel_id: &str) -> StoreResult<Vec<DynamicRule>>;

    async fn save_promo_code(&self, promo: PromoCode) -> StoreResult<PromoCode>;

    async fn get_promo_code(&self, hotel_id: &str, code: &str) -> StoreResult<Option<PromoCode>>;

    /// Upsert date overrides and write one `rate_update` through the outbox
    async fn commit_rates(
        &self,
        hotel_id: &str,
        updates: &[RateUpdate],
        outbox: OutboxSpec,
        now: DateTime<Utc>,
    ) -> StoreResult<CommitSummary>;

    // Availability store

    async fn list_availability(
        &self,
        hotel_id: &str,
        room_type_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<AvailabilityRow>>;

    /// Apply availability updates and write one `availability_update` through
    /// the outbox. Any invariant violation aborts the whole call.
    async fn commit_availability(
        &self,
        hotel_id: &str,
        updates: &[AvailabilityUpdate],
        mode: WriteMode,
        outbox: OutboxSpec,
        now: DateTime<Utc>,
    ) -> StoreResult<CommitSummary>;

    /// Insert rows that do not exist yet; returns how many were inserted
    async fn seed_availability(&self, rows: Vec<AvailabilityRow>) -> StoreResult<usize>;

    // Bookings

    async fn find_booking(
        &self,
        hotel_id: &str,
        channel_id: &str,
        channel_booking_id: &str,
    ) -> StoreResult<Option<InternalBooking>>;

    /// Plan the change against the locked booking, apply sold deltas, upsert
    /// the booking and record the reconciliation in one transaction.
    /// `DuplicateKey` when the change was already applied, `Conflict` when
    /// the booking was created concurrently and the call may be retried.
    async fn commit_booking_change(&self, change: BookingChange, now: DateTime<Utc>) -> StoreResult<BookingCommit>;

    /// Store a record outside of a booking transaction (rejected attempts)
    async fn save_reconciliation(&self, record: ReconciliationRecord) -> StoreResult<()>;

    async fn list_reconciliations(&self, hotel_id: &str) -> StoreResult<Vec<ReconciliationRecord>>;

    // Channel configs

    async fn save_channel_config(&self, config: ChannelConfig) -> StoreResult<ChannelConfig>;

    async fn get_channel_config(&self, hotel_id: &str, channel_id: &str) -> StoreResult<Option<ChannelConfig>>;

    async fn list_channel_configs(&self, hotel_id: &str) -> StoreResult<Vec<ChannelConfig>>;

    // Event bus

    /// Persist a new envelope, superseding pending events it fully covers
    async fn enqueue_event(&self, event: NewEvent, max_attempts: u32, now: DateTime<Utc>) -> StoreResult<EventEnvelope>;

    /// Lease up to `limit` due events in drain order, honouring key order
    async fn lease_events(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<EventEnvelope>>;

    /// In-flight events whose lease ended before `now`
    async fn expired_leases(&self, now: DateTime<Utc>) -> StoreResult<Vec<EventEnvelope>>;

    /// Replace an event if it still matches `guard`, else `Conflict`
    async fn update_event(&self, event: EventEnvelope, guard: EventGuard) -> StoreResult<EventEnvelope>;

    async fn get_event(&self, event_id: Uuid) -> StoreResult<Option<EventEnvelope>>;

    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<EventEnvelope>>;

    // Scheduler bookkeeping

    async fn get_job_status(&self, job_name: &str, hotel_id: &str) -> StoreResult<Option<JobStatus>>;

    async fn save_job_status(&self, status: JobStatus) -> StoreResult<()>;
}
