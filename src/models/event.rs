//! Event envelopes carried by the durable bus.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use super::availability::InventorySnapshot;
use super::rate_plan::DatedRate;

pub const HIGHEST_PRIORITY: u8 = 1;
pub const LOWEST_PRIORITY: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RateUpdate,
    AvailabilityUpdate,
    ChannelModification,
    BookingSync,
    /// Internal supervision signal, never sent to a channel
    OverbookingAlert,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RateUpdate => "rate_update",
            EventType::AvailabilityUpdate => "availability_update",
            EventType::ChannelModification => "channel_modification",
            EventType::BookingSync => "booking_sync",
            EventType::OverbookingAlert => "overbooking_alert",
        }
    }

    pub fn is_routable(&self) -> bool {
        !matches!(self, EventType::OverbookingAlert)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    InFlight,
    Succeeded,
    /// Terminal after a fatal (non-retryable) error
    Failed,
    Dead,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::InFlight => "in_flight",
            EventStatus::Succeeded => "succeeded",
            EventStatus::Failed => "failed",
            EventStatus::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Succeeded | EventStatus::Failed | EventStatus::Dead)
    }
}

/// Typed payloads; the distributor never re-reads the stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Rates {
        rates: Vec<DatedRate>,
    },
    Availability {
        rows: Vec<InventorySnapshot>,
    },
    ChannelModification {
        channel_id: String,
        changes: serde_json::Value,
    },
    BookingSync {
        channel_id: String,
        channel_booking_id: String,
        room_type_id: String,
        check_in: NaiveDate,
        check_out: NaiveDate,
        rooms: u32,
        status: String,
    },
    OverbookingAlert {
        channel_id: String,
        channel_booking_id: String,
        details: String,
    },
}

/// Ordering key. `None` parts are wildcards covering every value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventKey {
    pub hotel_id: String,
    pub channel_id: Option<String>,
    pub room_type_id: Option<String>,
    pub date: Option<NaiveDate>,
}

impl EventKey {
    pub fn overlaps(&self, other: &EventKey) -> bool {
        fn part<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            match (a, b) {
                (Some(x), Some(y)) => x == y,
                _ => true,
            }
        }
        self.hotel_id == other.hotel_id
            && part(&self.channel_id, &other.channel_id)
            && part(&self.room_type_id, &other.room_type_id)
            && part(&self.date, &other.date)
    }
}

/// Input to `enqueue`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub hotel_id: String,
    pub payload: EventPayload,
    pub priority: u8,
    pub reason: Option<String>,
    pub target_channel: Option<String>,
    pub excluded_channels: Vec<String>,
}

impl NewEvent {
    pub fn new(event_type: EventType, hotel_id: &str, payload: EventPayload, priority: u8) -> Self {
        Self {
            event_type,
            hotel_id: hotel_id.to_string(),
            payload,
            priority: priority.clamp(HIGHEST_PRIORITY, LOWEST_PRIORITY),
            reason: None,
            target_channel: None,
            excluded_channels: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn for_channel(mut self, channel_id: &str) -> Self {
        self.target_channel = Some(channel_id.to_string());
        self
    }

    pub fn excluding(mut self, channel_id: &str) -> Self {
        self.excluded_channels.push(channel_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: Uuid,
    /// Monotonic enqueue order; breaks `created_at` ties
    pub sequence: u64,
    pub event_type: EventType,
    pub hotel_id: String,
    pub payload: EventPayload,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: EventStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub target_channel: Option<String>,
    #[serde(default)]
    pub excluded_channels: Vec<String>,
    /// Channels that already accepted this event
    #[serde(default)]
    pub delivered_channels: Vec<String>,
    #[serde(default)]
    pub leased_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn from_new(event: NewEvent, sequence: u64, max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            event_type: event.event_type,
            hotel_id: event.hotel_id,
            payload: event.payload,
            priority: event.priority,
            created_at: now,
            attempts: 0,
            max_attempts,
            next_attempt_at: now,
            status: EventStatus::Pending,
            reason: event.reason,
            target_channel: event.target_channel,
            excluded_channels: event.excluded_channels,
            delivered_channels: Vec::new(),
            leased_until: None,
            last_error: None,
            updated_at: now,
        }
    }

    /// Every ordering key this event touches
    pub fn keys(&self) -> BTreeSet<EventKey> {
        let key = |room_type_id: Option<&str>, date: Option<NaiveDate>| EventKey {
            hotel_id: self.hotel_id.clone(),
            channel_id: self.target_channel.clone(),
            room_type_id: room_type_id.map(str::to_string),
            date,
        };

        match &self.payload {
            EventPayload::Rates { rates } => rates
                .iter()
                .map(|r| key(Some(&r.room_type_id), Some(r.date)))
                .collect(),
            EventPayload::Availability { rows } => rows
                .iter()
                .map(|r| key(Some(&r.room_type_id), Some(r.date)))
                .collect(),
            EventPayload::ChannelModification { channel_id, .. } => {
                let mut k = key(None, None);
                k.channel_id = Some(channel_id.clone());
                BTreeSet::from([k])
            }
            EventPayload::BookingSync {
                room_type_id,
                check_in,
                check_out,
                ..
            } => check_in
                .iter_days()
                .take_while(|d| d < check_out)
                .map(|d| key(Some(room_type_id), Some(d)))
                .collect(),
            EventPayload::OverbookingAlert { .. } => BTreeSet::new(),
        }
    }

    /// Same routing: same type, hotel, target and exclusions
    pub fn same_route(&self, other: &EventEnvelope) -> bool {
        self.event_type == other.event_type
            && self.hotel_id == other.hotel_id
            && self.target_channel == other.target_channel
            && self.excluded_channels == other.excluded_channels
    }

    pub fn is_dead(&self) -> bool {
        self.status == EventStatus::Dead
    }
}

/// Query for `list_events`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    #[serde(default)]
    pub hotel_id: Option<String>,
    #[serde(default)]
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        self.hotel_id.as_ref().map_or(true, |h| h == &event.hotel_id)
            && self.status.map_or(true, |s| s == event.status)
            && self.event_type.map_or(true, |t| t == event.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rates_event(dates: &[u32]) -> EventEnvelope {
        let rates = dates
            .iter()
            .map(|d| DatedRate {
                room_type_id: "RT1".to_string(),
                rate_plan_id: None,
                date: NaiveDate::from_ymd_opt(2025, 9, *d).unwrap(),
                amount: dec!(100),
                currency: "USD".to_string(),
            })
            .collect();
        EventEnvelope::from_new(
            NewEvent::new(EventType::RateUpdate, "H1", EventPayload::Rates { rates }, 3),
            1,
            8,
            Utc::now(),
        )
    }

    #[test]
    fn test_keys_cover_each_dated_rate() {
        assert_eq!(rates_event(&[1, 2, 3]).keys().len(), 3);
    }

    #[test]
    fn test_wildcard_channel_overlaps_specific_channel() {
        let mut event = rates_event(&[1]);
        let broadcast = event.keys().into_iter().next().unwrap();
        event.target_channel = Some("booking".to_string());
        let targeted = event.keys().into_iter().next().unwrap();

        assert!(broadcast.overlaps(&targeted));
        let mut other = targeted.clone();
        other.channel_id = Some("expedia".to_string());
        assert!(!targeted.overlaps(&other));
    }

    #[test]
    fn test_priority_is_clamped() {
        let event = NewEvent::new(EventType::RateUpdate, "H1", EventPayload::Rates { rates: vec![] }, 9);
        assert_eq!(event.priority, LOWEST_PRIORITY);
    }

    #[test]
    fn test_overbooking_alert_is_not_routable() {
        assert!(!EventType::OverbookingAlert.is_routable());
        assert!(EventType::BookingSync.is_routable());
    }
}
