//! In-process store used by tests and local runs.
//!
//! One lock guards every table. Each write validates all of its rows before
//! touching any table, so an error leaves the state exactly as it was.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::availability::{
    apply_availability_update, apply_sold_delta, AvailabilityRow, AvailabilityUpdate, InvariantViolation,
};
use crate::models::booking::{plan_booking_change, InternalBooking, ReconciliationOutcome, ReconciliationRecord};
use crate::models::channel::ChannelConfig;
use crate::models::event::{EventEnvelope, EventFilter, EventStatus, NewEvent};
use crate::models::hotel::{Hotel, RoomType};
use crate::models::job::JobStatus;
use crate::models::rate_plan::{
    apply_rate_update, find_priority_conflict, DynamicRule, PromoCode, RateOverride, RatePlan, RateUpdate,
    SeasonalRate,
};

use super::outbox::{availability_event, rates_event};
use super::queue::{drain_order, find_superseded, mark_leased, mark_superseded, select_leasable};
use super::{
    BookingChange, BookingCommit, CommitSummary, EventGuard, OutboxSpec, Store, WriteMode,
};

type RowKey = (String, String, NaiveDate);

#[derive(Default)]
struct Tables {
    hotels: BTreeMap<String, Hotel>,
    room_types: BTreeMap<(String, String), RoomType>,
    rate_plans: BTreeMap<Uuid, RatePlan>,
    seasonal_rates: BTreeMap<Uuid, SeasonalRate>,
    rate_overrides: BTreeMap<Uuid, RateOverride>,
    dynamic_rules: BTreeMap<Uuid, DynamicRule>,
    promo_codes: BTreeMap<(String, String), PromoCode>,
    availability: BTreeMap<RowKey, AvailabilityRow>,
    channel_configs: BTreeMap<(String, String), ChannelConfig>,
    events: BTreeMap<Uuid, EventEnvelope>,
    bookings: BTreeMap<Uuid, InternalBooking>,
    reconciliations: Vec<ReconciliationRecord>,
    job_status: BTreeMap<(String, String), JobStatus>,
    next_sequence: u64,
}

impl Tables {
    fn enqueue(&mut self, event: NewEvent, max_attempts: u32, now: DateTime<Utc>) -> EventEnvelope {
        self.next_sequence += 1;
        let envelope = EventEnvelope::from_new(event, self.next_sequence, max_attempts, now);

        let pending: Vec<EventEnvelope> = self
            .events
            .values()
            .filter(|e| e.status == EventStatus::Pending && e.hotel_id == envelope.hotel_id)
            .cloned()
            .collect();
        for id in find_superseded(&pending, &envelope) {
            if let Some(old) = self.events.get_mut(&id) {
                tracing::debug!(event_id = %id, superseded_by = %envelope.id, "Event superseded");
                mark_superseded(old, envelope.id, now);
            }
        }

        self.events.insert(envelope.id, envelope.clone());
        envelope
    }

    fn enqueue_outbox(&mut self, event: Option<NewEvent>, spec: &OutboxSpec, now: DateTime<Utc>) -> Option<Uuid> {
        event.map(|e| self.enqueue(e, spec.max_attempts, now).id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn row_key(hotel_id: &str, room_type_id: &str, date: NaiveDate) -> RowKey {
    (hotel_id.to_string(), room_type_id.to_string(), date)
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_hotel(&self, hotel: Hotel) -> StoreResult<Hotel> {
        self.tables.lock().hotels.insert(hotel.id.clone(), hotel.clone());
        Ok(hotel)
    }

    async fn get_hotel(&self, hotel_id: &str) -> StoreResult<Option<Hotel>> {
        Ok(self.tables.lock().hotels.get(hotel_id).cloned())
    }

    async fn list_hotels(&self) -> StoreResult<Vec<Hotel>> {
        Ok(self.tables.lock().hotels.values().cloned().collect())
    }

    async fn upsert_room_type(&self, room_type: RoomType) -> StoreResult<RoomType> {
        let key = (room_type.hotel_id.clone(), room_type.code.clone());
        self.tables.lock().room_types.insert(key, room_type.clone());
        Ok(room_type)
    }

    async fn get_room_type(&self, hotel_id: &str, room_type_id: &str) -> StoreResult<Option<RoomType>> {
        let key = (hotel_id.to_string(), room_type_id.to_string());
        Ok(self.tables.lock().room_types.get(&key).cloned())
    }

    async fn list_room_types(&self, hotel_id: &str) -> StoreResult<Vec<RoomType>> {
        Ok(self
            .tables
            .lock()
            .room_types
            .values()
            .filter(|rt| rt.hotel_id == hotel_id)
            .cloned()
            .collect())
    }

    async fn save_rate_plan(&self, plan: RatePlan) -> StoreResult<RatePlan> {
        let mut tables = self.tables.lock();
        let siblings: Vec<RatePlan> = tables
            .rate_plans
            .values()
            .filter(|p| p.hotel_id == plan.hotel_id && p.room_type_id == plan.room_type_id)
            .cloned()
            .collect();
        if let Some(conflict) = find_priority_conflict(&siblings, &plan) {
            return Err(StoreError::Conflict(format!(
                "plan {} already holds priority {} for overlapping dates",
                conflict.id, plan.priority
            )));
        }
        tables.rate_plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn get_rate_plan(&self, hotel_id: &str, plan_id: Uuid) -> StoreResult<Option<RatePlan>> {
        Ok(self
            .tables
            .lock()
            .rate_plans
            .get(&plan_id)
            .filter(|p| p.hotel_id == hotel_id)
            .cloned())
    }

    async fn list_rate_plans(&self, hotel_id: &str, room_type_id: Option<&str>) -> StoreResult<Vec<RatePlan>> {
        Ok(self
            .tables
            .lock()
            .rate_plans
            .values()
            .filter(|p| p.hotel_id == hotel_id && room_type_id.map_or(true, |rt| p.room_type_id == rt))
            .cloned()
            .collect())
    }

    async fn save_seasonal_rate(&self, rate: SeasonalRate) -> StoreResult<SeasonalRate> {
        self.tables.lock().seasonal_rates.insert(rate.id, rate.clone());
        Ok(rate)
    }

    async fn list_seasonal_rates(&self, hotel_id: &str) -> StoreResult<Vec<SeasonalRate>> {
        Ok(self
            .tables
            .lock()
            .seasonal_rates
            .values()
            .filter(|s| s.hotel_id == hotel_id)
            .cloned()
            .collect())
    }

    async fn save_rate_override(&self, rate_override: RateOverride) -> StoreResult<RateOverride> {
        self.tables
            .lock()
            .rate_overrides
            .insert(rate_override.id, rate_override.clone());
        Ok(rate_override)
    }

    async fn get_rate_override(&self, hotel_id: &str, override_id: Uuid) -> StoreResult<Option<RateOverride>> {
        Ok(self
            .tables
            .lock()
            .rate_overrides
            .get(&override_id)
            .filter(|o| o.hotel_id == hotel_id)
            .cloned())
    }

    async fn list_rate_overrides(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<RateOverride>> {
        Ok(self
            .tables
            .lock()
            .rate_overrides
            .values()
            .filter(|o| {
                o.hotel_id == hotel_id && o.room_type_id == room_type_id && o.date >= from && o.date <= to
            })
            .cloned()
            .collect())
    }

    async fn save_dynamic_rule(&self, rule: DynamicRule) -> StoreResult<DynamicRule> {
        self.tables.lock().dynamic_rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn list_dynamic_rules(&self, hotel_id: &str) -> StoreResult<Vec<DynamicRule>> {
        Ok(self
            .tables
            .lock()
            .dynamic_rules
            .values()
            .filter(|r| r.hotel_id == hotel_id)
            .cloned()
            .collect())
    }

    async fn save_promo_code(&self, promo: PromoCode) -> StoreResult<PromoCode> {
        let key = (promo.hotel_id.clone(), promo.code.to_uppercase());
        self.tables.lock().promo_codes.insert(key, promo.clone());
        Ok(promo)
    }

    async fn get_promo_code(&self, hotel_id: &str, code: &str) -> StoreResult<Option<PromoCode>> {
        let key = (hotel_id.to_string(), code.to_uppercase());
        Ok(self.tables.lock().promo_codes.get(&key).cloned())
    }

    async fn commit_rates(
        &self,
        hotel_id: &str,
        updates: &[RateUpdate],
        outbox: OutboxSpec,
        now: DateTime<Utc>,
    ) -> StoreResult<CommitSummary> {
        let mut tables = self.tables.lock();
        let mut summary = CommitSummary::default();
        let mut written = Vec::with_capacity(updates.len());

        for update in updates {
            if update.hotel_id != hotel_id {
                return Err(StoreError::Conflict(format!(
                    "update for hotel {} in a batch for {}",
                    update.hotel_id, hotel_id
                )));
            }
            let existing = tables
                .rate_overrides
                .values()
                .find(|o| {
                    o.hotel_id == hotel_id
                        && o.room_type_id == update.room_type_id
                        && o.rate_plan_id == update.rate_plan_id
                        && o.date == update.date
                })
                .cloned();
            match &existing {
                Some(_) => summary.modified += 1,
                None => summary.upserted += 1,
            }
            written.push(apply_rate_update(existing.as_ref(), update, now));
        }

        for ov in &written {
            tables.rate_overrides.insert(ov.id, ov.clone());
        }
        summary.event_id = tables.enqueue_outbox(rates_event(hotel_id, &written, &outbox), &outbox, now);
        Ok(summary)
    }

    async fn list_availability(
        &self,
        hotel_id: &str,
        room_type_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<AvailabilityRow>> {
        Ok(self
            .tables
            .lock()
            .availability
            .values()
            .filter(|r| {
                r.hotel_id == hotel_id
                    && room_type_id.map_or(true, |rt| r.room_type_id == rt)
                    && r.date >= from
                    && r.date <= to
            })
            .cloned()
            .collect())
    }

    async fn commit_availability(
        &self,
        hotel_id: &str,
        updates: &[AvailabilityUpdate],
        mode: WriteMode,
        outbox: OutboxSpec,
        now: DateTime<Utc>,
    ) -> StoreResult<CommitSummary> {
        let mut tables = self.tables.lock();
        let mut summary = CommitSummary::default();
        let mut staged: BTreeMap<RowKey, AvailabilityRow> = BTreeMap::new();

        for update in updates {
            if update.hotel_id != hotel_id {
                return Err(StoreError::Conflict(format!(
                    "update for hotel {} in a batch for {}",
                    update.hotel_id, hotel_id
                )));
            }
            let key = row_key(hotel_id, &update.room_type_id, update.date);
            let current = staged.get(&key).or_else(|| tables.availability.get(&key)).cloned();

            match (&current, mode) {
                (Some(_), WriteMode::Insert) if !staged.contains_key(&key) => {
                    return Err(StoreError::DuplicateKey(format!(
                        "availability {}/{}/{}",
                        hotel_id, update.room_type_id, update.date
                    )));
                }
                (Some(_), _) if !staged.contains_key(&key) => summary.modified += 1,
                (None, _) => summary.upserted += 1,
                _ => {}
            }

            let row = apply_availability_update(current.as_ref(), update, now)?;
            staged.insert(key, row);
        }

        let rows: Vec<AvailabilityRow> = staged.values().cloned().collect();
        for (key, row) in staged {
            tables.availability.insert(key, row);
        }
        summary.event_id = tables.enqueue_outbox(availability_event(hotel_id, &rows, &outbox), &outbox, now);
        Ok(summary)
    }

    async fn seed_availability(&self, rows: Vec<AvailabilityRow>) -> StoreResult<usize> {
        let mut tables = self.tables.lock();
        let mut inserted = 0;
        for row in rows {
            let key = row_key(&row.hotel_id, &row.room_type_id, row.date);
            if !tables.availability.contains_key(&key) {
                tables.availability.insert(key, row);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn find_booking(
        &self,
        hotel_id: &str,
        channel_id: &str,
        channel_booking_id: &str,
    ) -> StoreResult<Option<InternalBooking>> {
        Ok(self
            .tables
            .lock()
            .bookings
            .values()
            .find(|b| {
                b.hotel_id == hotel_id && b.channel_id == channel_id && b.channel_booking_id == channel_booking_id
            })
            .cloned())
    }

    async fn commit_booking_change(&self, change: BookingChange, now: DateTime<Utc>) -> StoreResult<BookingCommit> {
        let mut tables = self.tables.lock();
        let hotel_id = change.hotel_id.as_str();
        let key = change.inbound.idempotency_key();

        let already_applied = tables.reconciliations.iter().any(|r| {
            r.hotel_id == hotel_id && r.outcome == ReconciliationOutcome::Applied && r.idempotency_key() == key
        });
        if already_applied {
            return Err(StoreError::DuplicateKey(key));
        }

        let existing = tables
            .bookings
            .values()
            .find(|b| {
                b.hotel_id == hotel_id
                    && b.channel_id == change.inbound.channel
                    && b.channel_booking_id == change.inbound.channel_booking_id
            })
            .cloned();
        let plan = plan_booking_change(hotel_id, &change.inbound, existing.as_ref(), now)?;

        let mut rows = Vec::with_capacity(plan.deltas.len());
        for (room_type_id, date, delta) in &plan.deltas {
            let current = tables
                .availability
                .get(&row_key(hotel_id, room_type_id, *date))
                .ok_or_else(|| InvariantViolation::MissingRow {
                    room_type_id: room_type_id.clone(),
                    date: *date,
                })?;
            rows.push(apply_sold_delta(current, *delta, now)?);
        }

        for row in &rows {
            tables
                .availability
                .insert(row_key(&row.hotel_id, &row.room_type_id, row.date), row.clone());
        }
        tables.bookings.insert(plan.booking.id, plan.booking.clone());
        tables.reconciliations.push(plan.record);

        let event = availability_event(hotel_id, &rows, &change.outbox);
        let event_id = tables.enqueue_outbox(event, &change.outbox, now);
        Ok(BookingCommit {
            booking: plan.booking,
            rows,
            event_id,
        })
    }

    async fn save_reconciliation(&self, record: ReconciliationRecord) -> StoreResult<()> {
        self.tables.lock().reconciliations.push(record);
        Ok(())
    }

    async fn list_reconciliations(&self, hotel_id: &str) -> StoreResult<Vec<ReconciliationRecord>> {
        Ok(self
            .tables
            .lock()
            .reconciliations
            .iter()
            .filter(|r| r.hotel_id == hotel_id)
            .cloned()
            .collect())
    }

    async fn save_channel_config(&self, config: ChannelConfig) -> StoreResult<ChannelConfig> {
        let key = (config.hotel_id.clone(), config.channel_id.clone());
        self.tables.lock().channel_configs.insert(key, config.clone());
        Ok(config)
    }

    async fn get_channel_config(&self, hotel_id: &str, channel_id: &str) -> StoreResult<Option<ChannelConfig>> {
        let key = (hotel_id.to_string(), channel_id.to_string());
        Ok(self.tables.lock().channel_configs.get(&key).cloned())
    }

    async fn list_channel_configs(&self, hotel_id: &str) -> StoreResult<Vec<ChannelConfig>> {
        Ok(self
            .tables
            .lock()
            .channel_configs
            .values()
            .filter(|c| c.hotel_id == hotel_id)
            .cloned()
            .collect())
    }

    async fn enqueue_event(&self, event: NewEvent, max_attempts: u32, now: DateTime<Utc>) -> StoreResult<EventEnvelope> {
        Ok(self.tables.lock().enqueue(event, max_attempts, now))
    }

    async fn lease_events(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let mut tables = self.tables.lock();
        let open: Vec<EventEnvelope> = tables
            .events
            .values()
            .filter(|e| !e.status.is_terminal())
            .cloned()
            .collect();

        let mut leased = Vec::new();
        for id in select_leasable(&open, now, limit) {
            if let Some(event) = tables.events.get_mut(&id) {
                mark_leased(event, lease_until, now);
                leased.push(event.clone());
            }
        }
        leased.sort_by(drain_order);
        Ok(leased)
    }

    async fn expired_leases(&self, now: DateTime<Utc>) -> StoreResult<Vec<EventEnvelope>> {
        Ok(self
            .tables
            .lock()
            .events
            .values()
            .filter(|e| e.status == EventStatus::InFlight && e.leased_until.is_some_and(|until| until < now))
            .cloned()
            .collect())
    }

    async fn update_event(&self, event: EventEnvelope, guard: EventGuard) -> StoreResult<EventEnvelope> {
        let mut tables = self.tables.lock();
        let current = tables
            .events
            .get(&event.id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", event.id)))?;
        if EventGuard::of(current) != guard {
            return Err(StoreError::Conflict(format!(
                "event {} changed concurrently (now {})",
                event.id,
                current.status.as_str()
            )));
        }
        tables.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get_event(&self, event_id: Uuid) -> StoreResult<Option<EventEnvelope>> {
        Ok(self.tables.lock().events.get(&event_id).cloned())
    }

    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<EventEnvelope>> {
        let tables = self.tables.lock();
        let mut events: Vec<EventEnvelope> = tables.events.values().filter(|e| filter.matches(e)).cloned().collect();
        events.sort_by_key(|e| e.sequence);
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    async fn get_job_status(&self, job_name: &str, hotel_id: &str) -> StoreResult<Option<JobStatus>> {
        let key = (job_name.to_string(), hotel_id.to_string());
        Ok(self.tables.lock().job_status.get(&key).cloned())
    }

    async fn save_job_status(&self, status: JobStatus) -> StoreResult<()> {
        let key = (status.job_name.clone(), status.hotel_id.clone());
        self.tables.lock().job_status.insert(key, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::EventPayload;

    fn update(day: u32, total: Option<u32>) -> AvailabilityUpdate {
        AvailabilityUpdate {
            hotel_id: "H1".to_string(),
            room_type_id: "RT1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 9, day).unwrap(),
            total_rooms: total,
            blocked_rooms: None,
            stop_sell: None,
            closed_to_arrival: None,
            closed_to_departure: None,
            min_stay: None,
            max_stay: None,
        }
    }

    #[tokio::test]
    async fn test_invariant_violation_rolls_back_whole_commit() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut seeded = AvailabilityRow::seeded("H1", "RT1", NaiveDate::from_ymd_opt(2025, 9, 2).unwrap(), 5, now);
        seeded.sold_rooms = 4;
        store.seed_availability(vec![seeded]).await.unwrap();

        let result = store
            .commit_availability(
                "H1",
                &[update(1, Some(10)), update(2, Some(2))],
                WriteMode::Upsert,
                OutboxSpec::new(3, 8),
                now,
            )
            .await;
        assert!(matches!(result, Err(StoreError::Invariant(_))));

        let from = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 9, 30).unwrap();
        let rows = store.list_availability("H1", None, from, to).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_rooms, 5);
        assert!(store.list_events(&EventFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_mode_reports_duplicate_key() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .commit_availability("H1", &[update(1, Some(3))], WriteMode::Insert, OutboxSpec::new(3, 8), now)
            .await
            .unwrap();

        let again = store
            .commit_availability("H1", &[update(1, Some(4))], WriteMode::Insert, OutboxSpec::new(3, 8), now)
            .await;
        assert!(matches!(again, Err(StoreError::DuplicateKey(_))));

        let summary = store
            .commit_availability("H1", &[update(1, Some(4))], WriteMode::Upsert, OutboxSpec::new(3, 8), now)
            .await
            .unwrap();
        assert_eq!(summary.modified, 1);
        assert!(summary.event_id.is_some());
    }

    #[tokio::test]
    async fn test_outbox_event_carries_committed_rows() {
        let store = MemoryStore::new();
        let summary = store
            .commit_availability(
                "H1",
                &[update(1, Some(3)), update(2, Some(3))],
                WriteMode::Upsert,
                OutboxSpec::new(3, 8),
                Utc::now(),
            )
            .await
            .unwrap();

        let event = store.get_event(summary.event_id.unwrap()).await.unwrap().unwrap();
        let EventPayload::Availability { rows } = event.payload else {
            panic!("expected availability payload");
        };
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.available_rooms == 3));
    }

    #[tokio::test]
    async fn test_stale_guard_is_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .commit_availability("H1", &[update(1, Some(3))], WriteMode::Upsert, OutboxSpec::new(3, 8), now)
            .await
            .unwrap();

        let leased = store.lease_events(now, now + chrono::Duration::seconds(20), 10).await.unwrap();
        assert_eq!(leased.len(), 1);

        let mut done = leased[0].clone();
        done.status = EventStatus::Succeeded;
        let stale = EventGuard {
            status: EventStatus::Pending,
            leased_until: None,
        };
        assert!(matches!(
            store.update_event(done.clone(), stale).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.update_event(done, EventGuard::of(&leased[0])).await.is_ok());
    }
}
