//! Channel-originated bookings and their reconciliation records.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEventKind {
    NewBooking,
    Modification,
    Cancellation,
}

impl ChannelEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelEventKind::NewBooking => "new_booking",
            ChannelEventKind::Modification => "modification",
            ChannelEventKind::Cancellation => "cancellation",
        }
    }
}

/// Nights `check_in..check_out` (exclusive) of `rooms` rooms of one type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StayWindow {
    pub room_type_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[serde(default = "one")]
    pub rooms: u32,
}

fn one() -> u32 {
    1
}

impl StayWindow {
    pub fn nights(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.check_in.iter_days().take_while(move |d| *d < self.check_out)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.check_in >= self.check_out {
            return Err(format!(
                "checkOut {} must be after checkIn {}",
                self.check_out, self.check_in
            ));
        }
        if self.rooms == 0 {
            return Err("rooms must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestInfo {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "one")]
    pub count: u32,
}

/// Normalized inbound change from a channel webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundChannelEvent {
    /// Filled from the webhook route when absent
    #[serde(default)]
    pub channel: String,
    pub kind: ChannelEventKind,
    pub channel_booking_id: String,
    pub stay: StayWindow,
    #[serde(default)]
    pub guest: GuestInfo,
    pub amount: Decimal,
    pub currency: String,
    /// Stay before a modification or cancellation
    #[serde(default)]
    pub old_values: Option<StayWindow>,
    /// Stay after a modification
    #[serde(default)]
    pub new_values: Option<StayWindow>,
    pub sequence: u64,
}

impl InboundChannelEvent {
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.channel,
            self.channel_booking_id,
            self.kind.as_str(),
            self.sequence
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Modified,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalBooking {
    pub id: Uuid,
    pub hotel_id: String,
    pub channel_id: String,
    pub channel_booking_id: String,
    /// Always "channel" for bookings created here
    pub source: String,
    pub status: BookingStatus,
    pub stay: StayWindow,
    pub guest: GuestInfo,
    pub amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Applied,
    /// Would have oversold; state kept and an alert raised
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRecord {
    pub id: Uuid,
    pub hotel_id: String,
    pub channel_id: String,
    pub channel_booking_id: String,
    #[serde(default)]
    pub internal_booking_id: Option<Uuid>,
    pub modification_type: ChannelEventKind,
    pub sequence: u64,
    #[serde(default)]
    pub old_values: Option<serde_json::Value>,
    #[serde(default)]
    pub new_values: Option<serde_json::Value>,
    pub outcome: ReconciliationOutcome,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationRecord {
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.channel_id,
            self.channel_booking_id,
            self.modification_type.as_str(),
            self.sequence
        )
    }
}

/// Everything one inbound event changes, derived from the booking on file
#[derive(Debug, Clone)]
pub struct PlannedBookingChange {
    pub booking: InternalBooking,
    pub record: ReconciliationRecord,
    /// `(room type, night, sold delta)`
    pub deltas: Vec<(String, NaiveDate, i64)>,
}

/// Plan `inbound` against `existing`. Stores call this with the booking row
/// they hold locked, so the deltas always start from committed state.
pub fn plan_booking_change(
    hotel_id: &str,
    inbound: &InboundChannelEvent,
    existing: Option<&InternalBooking>,
    now: DateTime<Utc>,
) -> Result<PlannedBookingChange, serde_json::Error> {
    let (old, new) = stays(inbound, existing);
    let deltas = stay_deltas(old.as_ref(), new.as_ref());

    let status = match inbound.kind {
        ChannelEventKind::NewBooking => BookingStatus::Confirmed,
        ChannelEventKind::Modification => BookingStatus::Modified,
        ChannelEventKind::Cancellation => BookingStatus::Cancelled,
    };
    let booking = match existing {
        Some(booking) => InternalBooking {
            status,
            stay: new.clone().unwrap_or_else(|| booking.stay.clone()),
            guest: inbound.guest.clone(),
            amount: inbound.amount,
            currency: inbound.currency.clone(),
            updated_at: now,
            ..booking.clone()
        },
        None => InternalBooking {
            id: Uuid::new_v4(),
            hotel_id: hotel_id.to_string(),
            channel_id: inbound.channel.clone(),
            channel_booking_id: inbound.channel_booking_id.clone(),
            source: "channel".to_string(),
            status,
            stay: new.clone().unwrap_or_else(|| inbound.stay.clone()),
            guest: inbound.guest.clone(),
            amount: inbound.amount,
            currency: inbound.currency.clone(),
            created_at: now,
            updated_at: now,
        },
    };

    let record = ReconciliationRecord {
        id: Uuid::new_v4(),
        hotel_id: hotel_id.to_string(),
        channel_id: inbound.channel.clone(),
        channel_booking_id: inbound.channel_booking_id.clone(),
        internal_booking_id: Some(booking.id),
        modification_type: inbound.kind,
        sequence: inbound.sequence,
        old_values: old.as_ref().map(serde_json::to_value).transpose()?,
        new_values: new.as_ref().map(serde_json::to_value).transpose()?,
        outcome: ReconciliationOutcome::Applied,
        resolved_at: Some(now),
        detail: None,
        created_at: now,
    };

    Ok(PlannedBookingChange {
        booking,
        record,
        deltas,
    })
}

/// Stay before and after the change. The booking on file wins over a
/// channel-supplied `old_values`.
fn stays(inbound: &InboundChannelEvent, existing: Option<&InternalBooking>) -> (Option<StayWindow>, Option<StayWindow>) {
    let on_file = existing
        .filter(|b| b.status != BookingStatus::Cancelled)
        .map(|b| b.stay.clone());
    let previous = on_file.or_else(|| {
        // a cancelled booking holds nothing any more
        if existing.is_some() {
            None
        } else {
            inbound.old_values.clone()
        }
    });

    match inbound.kind {
        ChannelEventKind::NewBooking => (previous, Some(inbound.stay.clone())),
        ChannelEventKind::Modification => (
            previous,
            Some(inbound.new_values.clone().unwrap_or_else(|| inbound.stay.clone())),
        ),
        ChannelEventKind::Cancellation => (previous, None),
    }
}

/// Per-night sold-room changes, `new - old`
pub fn stay_deltas(old: Option<&StayWindow>, new: Option<&StayWindow>) -> Vec<(String, NaiveDate, i64)> {
    let mut deltas: Vec<(String, NaiveDate, i64)> = Vec::new();
    let mut add = |room_type_id: &str, date: NaiveDate, delta: i64| {
        match deltas
            .iter_mut()
            .find(|(rt, d, _)| rt == room_type_id && *d == date)
        {
            Some(entry) => entry.2 += delta,
            None => deltas.push((room_type_id.to_string(), date, delta)),
        }
    };

    if let Some(old) = old {
        for night in old.nights() {
            add(&old.room_type_id, night, -(old.rooms as i64));
        }
    }
    if let Some(new) = new {
        for night in new.nights() {
            add(&new.room_type_id, night, new.rooms as i64);
        }
    }

    deltas.retain(|(_, _, delta)| *delta != 0);
    deltas.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
    deltas
}
