//! Builders for the envelopes written alongside committed rows.

use crate::models::availability::{AvailabilityRow, InventorySnapshot};
use crate::models::event::{EventPayload, EventType, NewEvent};
use crate::models::rate_plan::{DatedRate, RateOverride};

use super::OutboxSpec;

fn with_spec(mut event: NewEvent, spec: &OutboxSpec) -> NewEvent {
    event.reason = spec.reason.clone();
    event.target_channel = spec.target_channel.clone();
    event.excluded_channels = spec.excluded_channels.clone();
    event
}

/// One `availability_update` covering every committed row, ordered by
/// room type then date
pub fn availability_event(hotel_id: &str, rows: &[AvailabilityRow], spec: &OutboxSpec) -> Option<NewEvent> {
    if rows.is_empty() {
        return None;
    }
    let mut snapshots: Vec<InventorySnapshot> = rows.iter().map(InventorySnapshot::from).collect();
    snapshots.sort_by(|a, b| (&a.room_type_id, a.date).cmp(&(&b.room_type_id, b.date)));
    snapshots.dedup_by(|a, b| a.room_type_id == b.room_type_id && a.date == b.date);

    let event = NewEvent::new(
        EventType::AvailabilityUpdate,
        hotel_id,
        EventPayload::Availability { rows: snapshots },
        spec.priority,
    );
    Some(with_spec(event, spec))
}

/// One `rate_update` covering every committed override
pub fn rates_event(hotel_id: &str, overrides: &[RateOverride], spec: &OutboxSpec) -> Option<NewEvent> {
    rates_event_from(hotel_id, overrides.iter().map(DatedRate::from).collect(), spec)
}

pub fn rates_event_from(hotel_id: &str, mut rates: Vec<DatedRate>, spec: &OutboxSpec) -> Option<NewEvent> {
    if rates.is_empty() {
        return None;
    }
    rates.sort_by(|a, b| (&a.room_type_id, a.date, a.rate_plan_id).cmp(&(&b.room_type_id, b.date, b.rate_plan_id)));

    let event = NewEvent::new(
        EventType::RateUpdate,
        hotel_id,
        EventPayload::Rates { rates },
        spec.priority,
    );
    Some(with_spec(event, spec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn test_rows_collapse_into_one_sorted_event() {
        let now = Utc::now();
        let d = |day| NaiveDate::from_ymd_opt(2025, 9, day).unwrap();
        let rows = vec![
            AvailabilityRow::seeded("H1", "RT2", d(2), 5, now),
            AvailabilityRow::seeded("H1", "RT1", d(3), 5, now),
            AvailabilityRow::seeded("H1", "RT1", d(1), 5, now),
        ];
        let event = availability_event("H1", &rows, &OutboxSpec::new(3, 8).excluding("airbnb")).unwrap();

        assert_eq!(event.event_type, EventType::AvailabilityUpdate);
        assert_eq!(event.excluded_channels, vec!["airbnb".to_string()]);
        let EventPayload::Availability { rows } = event.payload else {
            panic!("expected availability payload");
        };
        assert_eq!(rows[0].room_type_id, "RT1");
        assert_eq!(rows[0].date, d(1));
        assert_eq!(rows[2].room_type_id, "RT2");
    }

    #[test]
    fn test_empty_commit_writes_no_event() {
        assert!(availability_event("H1", &[], &OutboxSpec::new(3, 8)).is_none());
    }
}
