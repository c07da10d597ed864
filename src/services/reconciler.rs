//! Applies channel booking changes to availability.
//!
//! Every change is one store transaction: sold-room deltas, the booking and
//! its reconciliation record, plus a corrective `availability_update` for the
//! other channels. A change that would oversell is rejected as a whole and
//! raises an `overbooking_alert`.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, StoreError};
use crate::models::booking::{
    plan_booking_change, InboundChannelEvent, InternalBooking, ReconciliationOutcome, ReconciliationRecord,
};
use crate::models::event::{EventPayload, EventType, NewEvent, HIGHEST_PRIORITY};
use crate::services::clock::Clock;
use crate::services::currency::validate_code;
use crate::services::event_bus::EventBus;
use crate::store::{BookingChange, OutboxSpec, Store};

pub const CORRECTION_PRIORITY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    Applied,
    /// Same `(channel, booking, kind, sequence)` was applied before
    Duplicate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub status: ReconcileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking: Option<InternalBooking>,
    /// Corrective availability event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, bus: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self { store, bus, clock }
    }

    pub async fn on_channel_event(&self, hotel_id: &str, inbound: InboundChannelEvent) -> CoreResult<ReconcileResult> {
        validate(&inbound)?;
        if self.store.get_channel_config(hotel_id, &inbound.channel).await?.is_none() {
            return Err(CoreError::NotFound(format!(
                "channel {} of hotel {}",
                inbound.channel, hotel_id
            )));
        }

        let now = self.clock.now();
        let outbox = OutboxSpec::new(CORRECTION_PRIORITY, self.bus.config().max_attempts)
            .with_reason("booking_reconciled")
            .excluding(&inbound.channel);
        let change = BookingChange {
            hotel_id: hotel_id.to_string(),
            inbound: inbound.clone(),
            outbox,
        };

        let mut committed = self.store.commit_booking_change(change.clone(), now).await;
        if let Err(StoreError::Conflict(reason)) = &committed {
            // the booking now exists, so the second plan starts from it
            tracing::info!(hotel_id, reason = %reason, "Retrying channel booking change");
            committed = self.store.commit_booking_change(change, now).await;
        }

        match committed {
            Ok(commit) => {
                tracing::info!(
                    hotel_id,
                    channel_id = %inbound.channel,
                    booking_id = %commit.booking.id,
                    kind = inbound.kind.as_str(),
                    nights = commit.rows.len(),
                    "Channel booking reconciled"
                );
                Ok(ReconcileResult {
                    status: ReconcileStatus::Applied,
                    booking: Some(commit.booking),
                    event_id: commit.event_id,
                })
            }
            Err(StoreError::DuplicateKey(key)) => {
                tracing::info!(hotel_id, key = %key, "Duplicate channel event ignored");
                Ok(ReconcileResult {
                    status: ReconcileStatus::Duplicate,
                    booking: self.find_booking(hotel_id, &inbound).await?,
                    event_id: None,
                })
            }
            Err(StoreError::Invariant(violation)) => {
                let details = violation.to_string();
                let existing = self.find_booking(hotel_id, &inbound).await?;
                let mut record = plan_booking_change(hotel_id, &inbound, existing.as_ref(), now)
                    .map_err(StoreError::from)?
                    .record;
                record.outcome = ReconciliationOutcome::Rejected;
                record.resolved_at = None;
                record.detail = Some(details.clone());
                if existing.is_none() {
                    record.internal_booking_id = None;
                }
                self.store.save_reconciliation(record).await?;

                let alert = NewEvent::new(
                    EventType::OverbookingAlert,
                    hotel_id,
                    EventPayload::OverbookingAlert {
                        channel_id: inbound.channel.clone(),
                        channel_booking_id: inbound.channel_booking_id.clone(),
                        details: details.clone(),
                    },
                    HIGHEST_PRIORITY,
                )
                .with_reason("overbooking");
                let alert = self.bus.enqueue(alert).await?;
                tracing::error!(
                    hotel_id,
                    channel_id = %inbound.channel,
                    channel_booking_id = %inbound.channel_booking_id,
                    alert_event_id = %alert.id,
                    "Channel booking would oversell: {}",
                    details
                );
                Err(CoreError::Conflict(format!("overbooking: {}", details)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_booking(&self, hotel_id: &str, inbound: &InboundChannelEvent) -> CoreResult<Option<InternalBooking>> {
        Ok(self
            .store
            .find_booking(hotel_id, &inbound.channel, &inbound.channel_booking_id)
            .await?)
    }

    /// Rejected changes still waiting for a replay
    pub async fn unresolved(&self, hotel_id: &str) -> CoreResult<Vec<ReconciliationRecord>> {
        let records = self.store.list_reconciliations(hotel_id).await?;
        let applied: Vec<String> = records
            .iter()
            .filter(|r| r.outcome == ReconciliationOutcome::Applied)
            .map(ReconciliationRecord::idempotency_key)
            .collect();
        Ok(records
            .into_iter()
            .filter(|r| r.outcome == ReconciliationOutcome::Rejected && !applied.contains(&r.idempotency_key()))
            .collect())
    }
}

fn validate(inbound: &InboundChannelEvent) -> CoreResult<()> {
    if inbound.channel.trim().is_empty() {
        return Err(CoreError::Validation("channel cannot be empty".to_string()));
    }
    if inbound.channel_booking_id.trim().is_empty() {
        return Err(CoreError::Validation("channelBookingId cannot be empty".to_string()));
    }
    validate_code(&inbound.currency)?;
    let stays = std::iter::once(&inbound.stay)
        .chain(inbound.old_values.as_ref())
        .chain(inbound.new_values.as_ref());
    for stay in stays {
        stay.validate().map_err(CoreError::Validation)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::availability::AvailabilityRow;
    use crate::models::booking::{BookingStatus, ChannelEventKind, GuestInfo, StayWindow};
    use crate::models::channel::ChannelKind;
    use crate::models::event::{EventFilter, EventStatus};
    use crate::services::alerts::AlertLog;
    use crate::services::channel_registry::tests::input;
    use crate::services::channel_registry::ChannelRegistry;
    use crate::services::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    struct Harness {
        store: Arc<MemoryStore>,
        reconciler: Reconciler,
        bus: EventBus,
    }

    async fn harness(total_rooms: u32, sold: u32) -> Harness {
        let config = AppConfig::default();
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let alerts = AlertLog::new(10);
        let registry = ChannelRegistry::new(store.clone(), clock.clone(), alerts.clone(), config.channel, &config.cache);
        registry
            .upsert("H1", input("booking", ChannelKind::BookingCom, "https://booking.test"))
            .await
            .unwrap();

        let rows = (9..=12)
            .map(|d| {
                let mut row = AvailabilityRow::seeded("H1", "RT1", day(d), total_rooms, Utc::now());
                row.sold_rooms = sold;
                row
            })
            .collect();
        store.seed_availability(rows).await.unwrap();

        let bus = EventBus::new(store.clone(), clock.clone(), config.event, alerts);
        Harness {
            reconciler: Reconciler::new(store.clone(), bus.clone(), clock),
            store,
            bus,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    fn stay(from: u32, to: u32) -> StayWindow {
        StayWindow {
            room_type_id: "RT1".to_string(),
            check_in: day(from),
            check_out: day(to),
            rooms: 1,
        }
    }

    fn inbound(kind: ChannelEventKind, stay: StayWindow, sequence: u64) -> InboundChannelEvent {
        InboundChannelEvent {
            channel: "booking".to_string(),
            kind,
            channel_booking_id: "BK-1".to_string(),
            stay,
            guest: GuestInfo {
                name: "Ana".to_string(),
                email: None,
                count: 2,
            },
            amount: dec!(240),
            currency: "USD".to_string(),
            old_values: None,
            new_values: None,
            sequence,
        }
    }

    async fn sold(h: &Harness, d: u32) -> u32 {
        h.store.list_availability("H1", Some("RT1"), day(d), day(d)).await.unwrap()[0].sold_rooms
    }

    #[tokio::test]
    async fn test_new_booking_sells_each_night_and_corrects_other_channels() {
        let h = harness(5, 0).await;
        let result = h
            .reconciler
            .on_channel_event("H1", inbound(ChannelEventKind::NewBooking, stay(10, 12), 1))
            .await
            .unwrap();

        assert_eq!(result.status, ReconcileStatus::Applied);
        assert_eq!(result.booking.as_ref().unwrap().source, "channel");
        assert_eq!((sold(&h, 10).await, sold(&h, 11).await, sold(&h, 12).await), (1, 1, 0));

        let event = h.bus.get(result.event_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(event.event_type, EventType::AvailabilityUpdate);
        assert_eq!(event.priority, CORRECTION_PRIORITY);
        assert_eq!(event.excluded_channels, vec!["booking".to_string()]);
    }

    #[tokio::test]
    async fn test_replayed_event_is_applied_once() {
        let h = harness(5, 0).await;
        let event = inbound(ChannelEventKind::NewBooking, stay(10, 11), 1);
        h.reconciler.on_channel_event("H1", event.clone()).await.unwrap();
        let again = h.reconciler.on_channel_event("H1", event).await.unwrap();

        assert_eq!(again.status, ReconcileStatus::Duplicate);
        assert_eq!(sold(&h, 10).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_sell_once() {
        let h = harness(5, 0).await;
        let event = inbound(ChannelEventKind::NewBooking, stay(10, 12), 1);

        let deliveries: Vec<_> = (0..8)
            .map(|_| {
                let reconciler = h.reconciler.clone();
                let event = event.clone();
                tokio::spawn(async move { reconciler.on_channel_event("H1", event).await })
            })
            .collect();
        let mut applied = 0;
        for delivery in deliveries {
            if delivery.await.unwrap().unwrap().status == ReconcileStatus::Applied {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!((sold(&h, 10).await, sold(&h, 11).await), (1, 1));
    }

    #[tokio::test]
    async fn test_booking_on_file_beats_stale_old_values() {
        let h = harness(5, 0).await;
        h.reconciler
            .on_channel_event("H1", inbound(ChannelEventKind::NewBooking, stay(10, 12), 1))
            .await
            .unwrap();
        let mut moved = inbound(ChannelEventKind::Modification, stay(10, 12), 2);
        moved.new_values = Some(stay(11, 13));
        h.reconciler.on_channel_event("H1", moved).await.unwrap();

        // Planned from the stored 11-13 stay, not the 10-12 the channel sent
        let mut shortened = inbound(ChannelEventKind::Modification, stay(10, 12), 3);
        shortened.old_values = Some(stay(10, 12));
        shortened.new_values = Some(stay(12, 13));
        h.reconciler.on_channel_event("H1", shortened).await.unwrap();

        assert_eq!(
            (sold(&h, 10).await, sold(&h, 11).await, sold(&h, 12).await),
            (0, 0, 1)
        );
    }

    #[tokio::test]
    async fn test_oversell_is_rejected_with_alert() {
        let h = harness(3, 3).await;
        let result = h
            .reconciler
            .on_channel_event("H1", inbound(ChannelEventKind::NewBooking, stay(10, 11), 1))
            .await;

        assert!(matches!(result, Err(CoreError::Conflict(_))));
        assert_eq!(sold(&h, 10).await, 3);
        let alerts = h
            .bus
            .list(&EventFilter {
                event_type: Some(EventType::OverbookingAlert),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, HIGHEST_PRIORITY);
        assert_eq!(alerts[0].status, EventStatus::Pending);
        assert_eq!(h.reconciler.unresolved("H1").await.unwrap().len(), 1);
        assert!(h
            .store
            .find_booking("H1", "booking", "BK-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_modification_applies_only_the_difference() {
        let h = harness(5, 0).await;
        h.reconciler
            .on_channel_event("H1", inbound(ChannelEventKind::NewBooking, stay(10, 12), 1))
            .await
            .unwrap();

        let mut change = inbound(ChannelEventKind::Modification, stay(10, 12), 2);
        change.new_values = Some(stay(11, 13));
        h.reconciler.on_channel_event("H1", change).await.unwrap();
        assert_eq!(
            (sold(&h, 10).await, sold(&h, 11).await, sold(&h, 12).await),
            (0, 1, 1)
        );

        h.reconciler
            .on_channel_event("H1", inbound(ChannelEventKind::Cancellation, stay(11, 13), 3))
            .await
            .unwrap();
        assert_eq!((sold(&h, 11).await, sold(&h, 12).await), (0, 0));
        let booking = h.store.find_booking("H1", "booking", "BK-1").await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found() {
        let h = harness(5, 0).await;
        let mut event = inbound(ChannelEventKind::NewBooking, stay(10, 11), 1);
        event.channel = "unknown".to_string();
        assert!(matches!(
            h.reconciler.on_channel_event("H1", event).await,
            Err(CoreError::NotFound(_))
        ));
    }
}
