//! PostgreSQL store on sea-orm.
//!
//! Records live as JSON documents with their key columns copied out for
//! indexing. Transactional writes lock the rows they read with
//! `SELECT ... FOR UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::{LockBehavior, LockType, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::entities::{
    availability_rows, bookings, channel_configs, dynamic_rules, event_envelopes, hotels, job_status,
    promo_codes, rate_overrides, rate_plans, reconciliation_records, room_types, seasonal_rates,
};
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
use super::queue::{drain_order, find_superseded, mark_leased, mark_superseded, select_among};
use super::{BookingChange, BookingCommit, CommitSummary, EventGuard, OutboxSpec, Store, WriteMode};

const OPEN_STATUSES: [&str; 2] = ["pending", "in_flight"];

/// Due rows locked per requested lease; blocked ones are released on commit.
const LEASE_WINDOW: usize = 4;

#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_doc<T: Serialize>(value: &T) -> StoreResult<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn from_doc<T: DeserializeOwned>(doc: serde_json::Value) -> StoreResult<T> {
    Ok(serde_json::from_value(doc)?)
}

fn envelope_from(model: event_envelopes::Model) -> StoreResult<EventEnvelope> {
    let mut envelope: EventEnvelope = from_doc(model.doc)?;
    envelope.sequence = model.sequence as u64;
    Ok(envelope)
}

fn envelope_model(envelope: &EventEnvelope) -> StoreResult<event_envelopes::ActiveModel> {
    Ok(event_envelopes::ActiveModel {
        id: Set(envelope.id),
        sequence: NotSet,
        event_type: Set(envelope.event_type.as_str().to_string()),
        hotel_id: Set(envelope.hotel_id.clone()),
        status: Set(envelope.status.as_str().to_string()),
        priority: Set(envelope.priority as i16),
        created_at: Set(envelope.created_at.fixed_offset()),
        next_attempt_at: Set(envelope.next_attempt_at.fixed_offset()),
        doc: Set(to_doc(envelope)?),
    })
}

async fn save_envelope<C: ConnectionTrait>(conn: &C, envelope: &EventEnvelope) -> StoreResult<()> {
    let mut model = envelope_model(envelope)?;
    model.id = sea_orm::ActiveValue::Unchanged(envelope.id);
    model.update(conn).await?;
    Ok(())
}

/// Insert an envelope and supersede the pending events it covers
async fn enqueue_in<C: ConnectionTrait>(
    conn: &C,
    event: NewEvent,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> StoreResult<EventEnvelope> {
    let mut envelope = EventEnvelope::from_new(event, 0, max_attempts, now);

    let pending = event_envelopes::Entity::find()
        .filter(event_envelopes::Column::HotelId.eq(envelope.hotel_id.as_str()))
        .filter(event_envelopes::Column::EventType.eq(envelope.event_type.as_str()))
        .filter(event_envelopes::Column::Status.eq(EventStatus::Pending.as_str()))
        .lock_exclusive()
        .all(conn)
        .await?
        .into_iter()
        .map(envelope_from)
        .collect::<StoreResult<Vec<_>>>()?;

    for id in find_superseded(&pending, &envelope) {
        if let Some(old) = pending.iter().find(|e| e.id == id) {
            let mut old = old.clone();
            mark_superseded(&mut old, envelope.id, now);
            save_envelope(conn, &old).await?;
            tracing::debug!(event_id = %id, superseded_by = %envelope.id, "Event superseded");
        }
    }

    let inserted = envelope_model(&envelope)?.insert(conn).await?;
    envelope.sequence = inserted.sequence as u64;
    Ok(envelope)
}

async fn enqueue_outbox<C: ConnectionTrait>(
    conn: &C,
    event: Option<NewEvent>,
    spec: &OutboxSpec,
    now: DateTime<Utc>,
) -> StoreResult<Option<Uuid>> {
    match event {
        Some(event) => Ok(Some(enqueue_in(conn, event, spec.max_attempts, now).await?.id)),
        None => Ok(None),
    }
}

async fn upsert_rows<C: ConnectionTrait>(conn: &C, rows: &[AvailabilityRow]) -> StoreResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let models = rows
        .iter()
        .map(|row| {
            Ok(availability_rows::ActiveModel {
                hotel_id: Set(row.hotel_id.clone()),
                room_type_id: Set(row.room_type_id.clone()),
                date: Set(row.date),
                doc: Set(to_doc(row)?),
            })
        })
        .collect::<StoreResult<Vec<_>>>()?;

    availability_rows::Entity::insert_many(models)
        .on_conflict(
            OnConflict::columns([
                availability_rows::Column::HotelId,
                availability_rows::Column::RoomTypeId,
                availability_rows::Column::Date,
            ])
            .update_column(availability_rows::Column::Doc)
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

async fn upsert_override<C: ConnectionTrait>(conn: &C, ov: &RateOverride) -> StoreResult<()> {
    let model = rate_overrides::ActiveModel {
        id: Set(ov.id),
        hotel_id: Set(ov.hotel_id.clone()),
        room_type_id: Set(ov.room_type_id.clone()),
        date: Set(ov.date),
        rate_plan_id: Set(ov.rate_plan_id),
        doc: Set(to_doc(ov)?),
    };
    rate_overrides::Entity::insert(model)
        .on_conflict(
            OnConflict::column(rate_overrides::Column::Id)
                .update_columns([rate_overrides::Column::Doc, rate_overrides::Column::RatePlanId])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl Store for SeaOrmStore {
    async fn upsert_hotel(&self, hotel: Hotel) -> StoreResult<Hotel> {
        let model = hotels::ActiveModel {
            id: Set(hotel.id.clone()),
            doc: Set(to_doc(&hotel)?),
        };
        hotels::Entity::insert(model)
            .on_conflict(
                OnConflict::column(hotels::Column::Id)
                    .update_column(hotels::Column::Doc)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(hotel)
    }

    async fn get_hotel(&self, hotel_id: &str) -> StoreResult<Option<Hotel>> {
        hotels::Entity::find_by_id(hotel_id.to_string())
            .one(&self.db)
            .await?
            .map(|m| from_doc(m.doc))
            .transpose()
    }

    async fn list_hotels(&self) -> StoreResult<Vec<Hotel>> {
        hotels::Entity::find()
            .order_by_asc(hotels::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect()
    }

    async fn upsert_room_type(&self, room_type: RoomType) -> StoreResult<RoomType> {
        let model = room_types::ActiveModel {
            hotel_id: Set(room_type.hotel_id.clone()),
            code: Set(room_type.code.clone()),
            doc: Set(to_doc(&room_type)?),
        };
        room_types::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([room_types::Column::HotelId, room_types::Column::Code])
                    .update_column(room_types::Column::Doc)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(room_type)
    }

    async fn get_room_type(&self, hotel_id: &str, room_type_id: &str) -> StoreResult<Option<RoomType>> {
        room_types::Entity::find_by_id((hotel_id.to_string(), room_type_id.to_string()))
            .one(&self.db)
            .await?
            .map(|m| from_doc(m.doc))
            .transpose()
    }

    async fn list_room_types(&self, hotel_id: &str) -> StoreResult<Vec<RoomType>> {
        room_types::Entity::find()
            .filter(room_types::Column::HotelId.eq(hotel_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect()
    }

    async fn save_rate_plan(&self, plan: RatePlan) -> StoreResult<RatePlan> {
        let txn = self.db.begin().await?;

        let siblings = rate_plans::Entity::find()
            .filter(rate_plans::Column::HotelId.eq(plan.hotel_id.as_str()))
            .filter(rate_plans::Column::RoomTypeId.eq(plan.room_type_id.as_str()))
            .lock_exclusive()
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect::<StoreResult<Vec<RatePlan>>>()?;

        if let Some(conflict) = find_priority_conflict(&siblings, &plan) {
            return Err(StoreError::Conflict(format!(
                "plan {} already holds priority {} for overlapping dates",
                conflict.id, plan.priority
            )));
        }

        let model = rate_plans::ActiveModel {
            id: Set(plan.id),
            hotel_id: Set(plan.hotel_id.clone()),
            room_type_id: Set(plan.room_type_id.clone()),
            doc: Set(to_doc(&plan)?),
        };
        rate_plans::Entity::insert(model)
            .on_conflict(
                OnConflict::column(rate_plans::Column::Id)
                    .update_column(rate_plans::Column::Doc)
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        txn.commit().await?;
        Ok(plan)
    }

    async fn get_rate_plan(&self, hotel_id: &str, plan_id: Uuid) -> StoreResult<Option<RatePlan>> {
        rate_plans::Entity::find_by_id(plan_id)
            .filter(rate_plans::Column::HotelId.eq(hotel_id))
            .one(&self.db)
            .await?
            .map(|m| from_doc(m.doc))
            .transpose()
    }

    async fn list_rate_plans(&self, hotel_id: &str, room_type_id: Option<&str>) -> StoreResult<Vec<RatePlan>> {
        let mut query = rate_plans::Entity::find().filter(rate_plans::Column::HotelId.eq(hotel_id));
        if let Some(rt) = room_type_id {
            query = query.filter(rate_plans::Column::RoomTypeId.eq(rt));
        }
        query
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect()
    }

    async fn save_seasonal_rate(&self, rate: SeasonalRate) -> StoreResult<SeasonalRate> {
        let model = seasonal_rates::ActiveModel {
            id: Set(rate.id),
            hotel_id: Set(rate.hotel_id.clone()),
            doc: Set(to_doc(&rate)?),
        };
        seasonal_rates::Entity::insert(model)
            .on_conflict(
                OnConflict::column(seasonal_rates::Column::Id)
                    .update_column(seasonal_rates::Column::Doc)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(rate)
    }

    async fn list_seasonal_rates(&self, hotel_id: &str) -> StoreResult<Vec<SeasonalRate>> {
        seasonal_rates::Entity::find()
            .filter(seasonal_rates::Column::HotelId.eq(hotel_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect()
    }

    async fn save_rate_override(&self, rate_override: RateOverride) -> StoreResult<RateOverride> {
        upsert_override(&self.db, &rate_override).await?;
        Ok(rate_override)
    }

    async fn get_rate_override(&self, hotel_id: &str, override_id: Uuid) -> StoreResult<Option<RateOverride>> {
        rate_overrides::Entity::find_by_id(override_id)
            .filter(rate_overrides::Column::HotelId.eq(hotel_id))
            .one(&self.db)
            .await?
            .map(|m| from_doc(m.doc))
            .transpose()
    }

    async fn list_rate_overrides(
        &self,
        hotel_id: &str,
        room_type_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<RateOverride>> {
        rate_overrides::Entity::find()
            .filter(rate_overrides::Column::HotelId.eq(hotel_id))
            .filter(rate_overrides::Column::RoomTypeId.eq(room_type_id))
            .filter(rate_overrides::Column::Date.between(from, to))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect()
    }

    async fn save_dynamic_rule(&self, rule: DynamicRule) -> StoreResult<DynamicRule> {
        let model = dynamic_rules::ActiveModel {
            id: Set(rule.id),
            hotel_id: Set(rule.hotel_id.clone()),
            doc: Set(to_doc(&rule)?),
        };
        dynamic_rules::Entity::insert(model)
            .on_conflict(
                OnConflict::column(dynamic_rules::Column::Id)
                    .update_column(dynamic_rules::Column::Doc)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(rule)
    }

    async fn list_dynamic_rules(&self, hotel_id: &str) -> StoreResult<Vec<DynamicRule>> {
        dynamic_rules::Entity::find()
            .filter(dynamic_rules::Column::HotelId.eq(hotel_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect()
    }

    async fn save_promo_code(&self, promo: PromoCode) -> StoreResult<PromoCode> {
        let model = promo_codes::ActiveModel {
            hotel_id: Set(promo.hotel_id.clone()),
            code: Set(promo.code.to_uppercase()),
            doc: Set(to_doc(&promo)?),
        };
        promo_codes::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([promo_codes::Column::HotelId, promo_codes::Column::Code])
                    .update_column(promo_codes::Column::Doc)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(promo)
    }

    async fn get_promo_code(&self, hotel_id: &str, code: &str) -> StoreResult<Option<PromoCode>> {
        promo_codes::Entity::find_by_id((hotel_id.to_string(), code.to_uppercase()))
            .one(&self.db)
            .await?
            .map(|m| from_doc(m.doc))
            .transpose()
    }

    async fn commit_rates(
        &self,
        hotel_id: &str,
        updates: &[RateUpdate],
        outbox: OutboxSpec,
        now: DateTime<Utc>,
    ) -> StoreResult<CommitSummary> {
        let (Some(from), Some(to)) = (
            updates.iter().map(|u| u.date).min(),
            updates.iter().map(|u| u.date).max(),
        ) else {
            return Ok(CommitSummary::default());
        };
        let room_types: Vec<String> = updates.iter().map(|u| u.room_type_id.clone()).collect();

        let txn = self.db.begin().await?;
        let existing = rate_overrides::Entity::find()
            .filter(rate_overrides::Column::HotelId.eq(hotel_id))
            .filter(rate_overrides::Column::RoomTypeId.is_in(room_types))
            .filter(rate_overrides::Column::Date.between(from, to))
            .lock_exclusive()
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect::<StoreResult<Vec<RateOverride>>>()?;

        let mut summary = CommitSummary::default();
        let mut written: Vec<RateOverride> = Vec::with_capacity(updates.len());
        for update in updates {
            if update.hotel_id != hotel_id {
                return Err(StoreError::Conflict(format!(
                    "update for hotel {} in a batch for {}",
                    update.hotel_id, hotel_id
                )));
            }
            let matches = |o: &&RateOverride| {
                o.room_type_id == update.room_type_id && o.rate_plan_id == update.rate_plan_id && o.date == update.date
            };
            let current = written.iter().find(matches).or_else(|| existing.iter().find(matches)).cloned();
            match &current {
                Some(_) => summary.modified += 1,
                None => summary.upserted += 1,
            }
            let next = apply_rate_update(current.as_ref(), update, now);
            written.retain(|o| o.id != next.id);
            written.push(next);
        }

        for ov in &written {
            upsert_override(&txn, ov).await?;
        }
        summary.event_id = enqueue_outbox(&txn, rates_event(hotel_id, &written, &outbox), &outbox, now).await?;

        txn.commit().await?;
        Ok(summary)
    }

    async fn list_availability(
        &self,
        hotel_id: &str,
        room_type_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<AvailabilityRow>> {
        let mut query = availability_rows::Entity::find()
            .filter(availability_rows::Column::HotelId.eq(hotel_id))
            .filter(availability_rows::Column::Date.between(from, to));
        if let Some(rt) = room_type_id {
            query = query.filter(availability_rows::Column::RoomTypeId.eq(rt));
        }
        query
            .order_by_asc(availability_rows::Column::RoomTypeId)
            .order_by_asc(availability_rows::Column::Date)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect()
    }

    async fn commit_availability(
        &self,
        hotel_id: &str,
        updates: &[AvailabilityUpdate],
        mode: WriteMode,
        outbox: OutboxSpec,
        now: DateTime<Utc>,
    ) -> StoreResult<CommitSummary> {
        let (Some(from), Some(to)) = (
            updates.iter().map(|u| u.date).min(),
            updates.iter().map(|u| u.date).max(),
        ) else {
            return Ok(CommitSummary::default());
        };
        let room_types: Vec<String> = updates.iter().map(|u| u.room_type_id.clone()).collect();

        let txn = self.db.begin().await?;
        let current: BTreeMap<(String, NaiveDate), AvailabilityRow> = availability_rows::Entity::find()
            .filter(availability_rows::Column::HotelId.eq(hotel_id))
            .filter(availability_rows::Column::RoomTypeId.is_in(room_types))
            .filter(availability_rows::Column::Date.between(from, to))
            .lock_exclusive()
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| from_doc::<AvailabilityRow>(m.doc).map(|row| ((row.room_type_id.clone(), row.date), row)))
            .collect::<StoreResult<_>>()?;

        let mut summary = CommitSummary::default();
        let mut touched: BTreeMap<(String, NaiveDate), AvailabilityRow> = BTreeMap::new();
        for update in updates {
            if update.hotel_id != hotel_id {
                return Err(StoreError::Conflict(format!(
                    "update for hotel {} in a batch for {}",
                    update.hotel_id, hotel_id
                )));
            }
            let key = update.key();
            let existing = touched.get(&key).or_else(|| current.get(&key)).cloned();
            let first_touch = !touched.contains_key(&key);
            match (&existing, mode) {
                (Some(_), WriteMode::Insert) if first_touch => {
                    return Err(StoreError::DuplicateKey(format!(
                        "availability {}/{}/{}",
                        hotel_id, update.room_type_id, update.date
                    )));
                }
                (Some(_), _) if first_touch => summary.modified += 1,
                (None, _) => summary.upserted += 1,
                _ => {}
            }
            let row = apply_availability_update(existing.as_ref(), update, now)?;
            touched.insert(key, row);
        }

        let rows: Vec<AvailabilityRow> = touched.into_values().collect();
        upsert_rows(&txn, &rows).await?;
        summary.event_id = enqueue_outbox(&txn, availability_event(hotel_id, &rows, &outbox), &outbox, now).await?;

        txn.commit().await?;
        Ok(summary)
    }

    async fn seed_availability(&self, rows: Vec<AvailabilityRow>) -> StoreResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let models = rows
            .iter()
            .map(|row| {
                Ok(availability_rows::ActiveModel {
                    hotel_id: Set(row.hotel_id.clone()),
                    room_type_id: Set(row.room_type_id.clone()),
                    date: Set(row.date),
                    doc: Set(to_doc(row)?),
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let inserted = availability_rows::Entity::insert_many(models)
            .on_conflict(
                OnConflict::columns([
                    availability_rows::Column::HotelId,
                    availability_rows::Column::RoomTypeId,
                    availability_rows::Column::Date,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(inserted as usize)
    }

    async fn find_booking(
        &self,
        hotel_id: &str,
        channel_id: &str,
        channel_booking_id: &str,
    ) -> StoreResult<Option<InternalBooking>> {
        bookings::Entity::find()
            .filter(bookings::Column::HotelId.eq(hotel_id))
            .filter(bookings::Column::ChannelId.eq(channel_id))
            .filter(bookings::Column::ChannelBookingId.eq(channel_booking_id))
            .one(&self.db)
            .await?
            .map(|m| from_doc(m.doc))
            .transpose()
    }

    async fn commit_booking_change(&self, change: BookingChange, now: DateTime<Utc>) -> StoreResult<BookingCommit> {
        let hotel_id = change.hotel_id.clone();
        let key = change.inbound.idempotency_key();
        let txn = self.db.begin().await?;

        // Concurrent changes to one booking queue up on its row
        let locked = bookings::Entity::find()
            .filter(bookings::Column::HotelId.eq(hotel_id.as_str()))
            .filter(bookings::Column::ChannelId.eq(change.inbound.channel.as_str()))
            .filter(bookings::Column::ChannelBookingId.eq(change.inbound.channel_booking_id.as_str()))
            .lock_exclusive()
            .one(&txn)
            .await?;
        let existing: Option<InternalBooking> = locked.map(|m| from_doc(m.doc)).transpose()?;

        let applied = reconciliation_records::Entity::find()
            .filter(reconciliation_records::Column::HotelId.eq(hotel_id.as_str()))
            .filter(reconciliation_records::Column::IdempotencyKey.eq(key.as_str()))
            .filter(reconciliation_records::Column::Outcome.eq("applied"))
            .one(&txn)
            .await?;
        if applied.is_some() {
            return Err(StoreError::DuplicateKey(key));
        }

        let plan = plan_booking_change(&hotel_id, &change.inbound, existing.as_ref(), now)?;

        let mut rows = Vec::with_capacity(plan.deltas.len());
        for (room_type_id, date, delta) in &plan.deltas {
            let model = availability_rows::Entity::find_by_id((hotel_id.clone(), room_type_id.clone(), *date))
                .lock_exclusive()
                .one(&txn)
                .await?
                .ok_or_else(|| InvariantViolation::MissingRow {
                    room_type_id: room_type_id.clone(),
                    date: *date,
                })?;
            let current: AvailabilityRow = from_doc(model.doc)?;
            rows.push(apply_sold_delta(&current, *delta, now)?);
        }
        upsert_rows(&txn, &rows).await?;

        let booking_doc = to_doc(&plan.booking)?;
        if existing.is_some() {
            bookings::ActiveModel {
                id: Set(plan.booking.id),
                doc: Set(booking_doc),
                ..Default::default()
            }
            .update(&txn)
            .await?;
        } else {
            let inserted = bookings::ActiveModel {
                id: Set(plan.booking.id),
                hotel_id: Set(hotel_id.clone()),
                channel_id: Set(plan.booking.channel_id.clone()),
                channel_booking_id: Set(plan.booking.channel_booking_id.clone()),
                doc: Set(booking_doc),
            }
            .insert(&txn)
            .await;
            if let Err(err) = inserted {
                return Err(match StoreError::from(err) {
                    StoreError::DuplicateKey(_) => StoreError::Conflict(format!(
                        "booking {}/{} was created concurrently",
                        plan.booking.channel_id, plan.booking.channel_booking_id
                    )),
                    other => other,
                });
            }
        }

        // The partial unique index on applied keys rejects a racing replay
        reconciliation_records::ActiveModel {
            id: Set(plan.record.id),
            hotel_id: Set(hotel_id.clone()),
            idempotency_key: Set(key),
            outcome: Set("applied".to_string()),
            doc: Set(to_doc(&plan.record)?),
        }
        .insert(&txn)
        .await?;

        let event = availability_event(&hotel_id, &rows, &change.outbox);
        let event_id = enqueue_outbox(&txn, event, &change.outbox, now).await?;

        txn.commit().await?;
        Ok(BookingCommit {
            booking: plan.booking,
            rows,
            event_id,
        })
    }

    async fn save_reconciliation(&self, record: ReconciliationRecord) -> StoreResult<()> {
        let outcome = match record.outcome {
            ReconciliationOutcome::Applied => "applied",
            ReconciliationOutcome::Rejected => "rejected",
        };
        reconciliation_records::ActiveModel {
            id: Set(record.id),
            hotel_id: Set(record.hotel_id.clone()),
            idempotency_key: Set(record.idempotency_key()),
            outcome: Set(outcome.to_string()),
            doc: Set(to_doc(&record)?),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    async fn list_reconciliations(&self, hotel_id: &str) -> StoreResult<Vec<ReconciliationRecord>> {
        reconciliation_records::Entity::find()
            .filter(reconciliation_records::Column::HotelId.eq(hotel_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect()
    }

    async fn save_channel_config(&self, config: ChannelConfig) -> StoreResult<ChannelConfig> {
        let model = channel_configs::ActiveModel {
            hotel_id: Set(config.hotel_id.clone()),
            channel_id: Set(config.channel_id.clone()),
            doc: Set(to_doc(&config)?),
        };
        channel_configs::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([channel_configs::Column::HotelId, channel_configs::Column::ChannelId])
                    .update_column(channel_configs::Column::Doc)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(config)
    }

    async fn get_channel_config(&self, hotel_id: &str, channel_id: &str) -> StoreResult<Option<ChannelConfig>> {
        channel_configs::Entity::find_by_id((hotel_id.to_string(), channel_id.to_string()))
            .one(&self.db)
            .await?
            .map(|m| from_doc(m.doc))
            .transpose()
    }

    async fn list_channel_configs(&self, hotel_id: &str) -> StoreResult<Vec<ChannelConfig>> {
        channel_configs::Entity::find()
            .filter(channel_configs::Column::HotelId.eq(hotel_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| from_doc(m.doc))
            .collect()
    }

    async fn enqueue_event(&self, event: NewEvent, max_attempts: u32, now: DateTime<Utc>) -> StoreResult<EventEnvelope> {
        let txn = self.db.begin().await?;
        let envelope = enqueue_in(&txn, event, max_attempts, now).await?;
        txn.commit().await?;
        Ok(envelope)
    }

    async fn lease_events(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<EventEnvelope>> {
        let txn = self.db.begin().await?;
        // Rows another poller holds are skipped rather than waited on.
        let candidates = event_envelopes::Entity::find()
            .filter(event_envelopes::Column::Status.eq(EventStatus::Pending.as_str()))
            .filter(event_envelopes::Column::NextAttemptAt.lte(now.fixed_offset()))
            .order_by_asc(event_envelopes::Column::Priority)
            .order_by_asc(event_envelopes::Column::CreatedAt)
            .order_by_asc(event_envelopes::Column::Sequence)
            .limit(limit.saturating_mul(LEASE_WINDOW) as u64)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(&txn)
            .await?
            .into_iter()
            .map(envelope_from)
            .collect::<StoreResult<Vec<_>>>()?;
        let Some(latest) = candidates.iter().map(|e| e.created_at).max() else {
            txn.commit().await?;
            return Ok(Vec::new());
        };

        // Possible blockers: open rows of the same hotels that are in flight
        // or not newer than the window. Read without locking; a row leased
        // by a concurrent poller still shows as pending and blocks.
        let mut hotels: Vec<&str> = candidates.iter().map(|e| e.hotel_id.as_str()).collect();
        hotels.sort_unstable();
        hotels.dedup();
        let predecessors = event_envelopes::Entity::find()
            .filter(event_envelopes::Column::Status.is_in(OPEN_STATUSES))
            .filter(event_envelopes::Column::HotelId.is_in(hotels))
            .filter(
                Condition::any()
                    .add(event_envelopes::Column::Status.eq(EventStatus::InFlight.as_str()))
                    .add(event_envelopes::Column::CreatedAt.lte(latest.fixed_offset())),
            )
            .all(&txn)
            .await?
            .into_iter()
            .map(envelope_from)
            .collect::<StoreResult<Vec<_>>>()?;

        let mut leased = Vec::new();
        for id in select_among(&candidates, &predecessors, now, limit) {
            if let Some(event) = candidates.iter().find(|e| e.id == id) {
                let mut event = event.clone();
                mark_leased(&mut event, lease_until, now);
                save_envelope(&txn, &event).await?;
                leased.push(event);
            }
        }

        txn.commit().await?;
        leased.sort_by(drain_order);
        Ok(leased)
    }

    async fn expired_leases(&self, now: DateTime<Utc>) -> StoreResult<Vec<EventEnvelope>> {
        let in_flight = event_envelopes::Entity::find()
            .filter(event_envelopes::Column::Status.eq(EventStatus::InFlight.as_str()))
            .all(&self.db)
            .await?
            .into_iter()
            .map(envelope_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(in_flight
            .into_iter()
            .filter(|e| e.leased_until.is_some_and(|until| until < now))
            .collect())
    }

    async fn update_event(&self, event: EventEnvelope, guard: EventGuard) -> StoreResult<EventEnvelope> {
        let txn = self.db.begin().await?;
        let current = event_envelopes::Entity::find_by_id(event.id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("event {}", event.id)))?;
        let current = envelope_from(current)?;
        if EventGuard::of(&current) != guard {
            return Err(StoreError::Conflict(format!(
                "event {} changed concurrently (now {})",
                event.id,
                current.status.as_str()
            )));
        }
        save_envelope(&txn, &event).await?;
        txn.commit().await?;
        Ok(event)
    }

    async fn get_event(&self, event_id: Uuid) -> StoreResult<Option<EventEnvelope>> {
        event_envelopes::Entity::find_by_id(event_id)
            .one(&self.db)
            .await?
            .map(envelope_from)
            .transpose()
    }

    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<EventEnvelope>> {
        let mut query = event_envelopes::Entity::find();
        if let Some(hotel_id) = &filter.hotel_id {
            query = query.filter(event_envelopes::Column::HotelId.eq(hotel_id.as_str()));
        }
        if let Some(status) = filter.status {
            query = query.filter(event_envelopes::Column::Status.eq(status.as_str()));
        }
        if let Some(event_type) = filter.event_type {
            query = query.filter(event_envelopes::Column::EventType.eq(event_type.as_str()));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit as u64);
        }
        query
            .order_by_asc(event_envelopes::Column::Sequence)
            .all(&self.db)
            .await?
            .into_iter()
            .map(envelope_from)
            .collect()
    }

    async fn get_job_status(&self, job_name: &str, hotel_id: &str) -> StoreResult<Option<JobStatus>> {
        let record = job_status::Entity::find()
            .filter(job_status::Column::JobName.eq(job_name))
            .filter(job_status::Column::HotelId.eq(hotel_id))
            .one(&self.db)
            .await?;

        Ok(record.map(|r| JobStatus {
            job_name: r.job_name,
            hotel_id: r.hotel_id,
            last_success_at: r.last_success_at.map(|t| t.with_timezone(&Utc)),
            last_attempt_at: r.last_attempt_at.map(|t| t.with_timezone(&Utc)),
            last_error: r.last_error,
            success_count: r.success_count.max(0) as u64,
            error_count: r.error_count.max(0) as u64,
            min_interval_secs: r.min_interval_secs.max(0) as u64,
        }))
    }

    async fn save_job_status(&self, status: JobStatus) -> StoreResult<()> {
        let existing = job_status::Entity::find()
            .filter(job_status::Column::JobName.eq(status.job_name.as_str()))
            .filter(job_status::Column::HotelId.eq(status.hotel_id.as_str()))
            .one(&self.db)
            .await?;

        match existing {
            Some(record) => {
                let mut active_model: job_status::ActiveModel = record.into();
                active_model.last_success_at = Set(status.last_success_at.map(|t| t.fixed_offset()));
                active_model.last_attempt_at = Set(status.last_attempt_at.map(|t| t.fixed_offset()));
                active_model.last_error = Set(status.last_error);
                active_model.success_count = Set(status.success_count as i64);
                active_model.error_count = Set(status.error_count as i64);
                active_model.min_interval_secs = Set(status.min_interval_secs as i64);
                active_model.update(&self.db).await?;
            }
            None => {
                let new_record = job_status::ActiveModel {
                    job_name: Set(status.job_name),
                    hotel_id: Set(status.hotel_id),
                    last_success_at: Set(status.last_success_at.map(|t| t.fixed_offset())),
                    last_attempt_at: Set(status.last_attempt_at.map(|t| t.fixed_offset())),
                    last_error: Set(status.last_error),
                    success_count: Set(status.success_count as i64),
                    error_count: Set(status.error_count as i64),
                    min_interval_secs: Set(status.min_interval_secs as i64),
                    ..Default::default()
                };
                new_record.insert(&self.db).await?;
            }
        }
        Ok(())
    }
}
