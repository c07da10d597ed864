//! Queue selection rules shared by every store backend.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::event::{EventEnvelope, EventKey, EventStatus};

pub const SUPERSEDED_REASON: &str = "superseded";

/// Drain order: priority, then `created_at`, then enqueue sequence
pub fn drain_order(a: &EventEnvelope, b: &EventEnvelope) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.sequence.cmp(&b.sequence))
}

fn is_earlier(a: &EventEnvelope, b: &EventEnvelope) -> bool {
    (a.created_at, a.sequence) < (b.created_at, b.sequence)
}

fn keys_overlap(a: &BTreeSet<EventKey>, b: &BTreeSet<EventKey>) -> bool {
    a.iter().any(|ka| b.iter().any(|kb| ka.overlaps(kb)))
}

/// Pick the ids to lease from the non-terminal events of the queue.
///
/// An event is skipped while an earlier non-terminal event shares one of
/// its keys, so each key is delivered in enqueue order whatever the
/// priorities. Events without keys are never blocked.
pub fn select_leasable(events: &[EventEnvelope], now: DateTime<Utc>, limit: usize) -> Vec<Uuid> {
    select_among(events, events, now, limit)
}

/// Same rule as [`select_leasable`], but only `candidates` may be leased.
///
/// `open` holds the non-terminal events that can block a candidate: every
/// in-flight event and every earlier event sharing one of its keys. It may
/// repeat the candidates themselves.
pub fn select_among(
    candidates: &[EventEnvelope],
    open: &[EventEnvelope],
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<Uuid> {
    let open: Vec<(&EventEnvelope, BTreeSet<EventKey>)> = open
        .iter()
        .chain(candidates.iter())
        .filter(|e| !e.status.is_terminal())
        .map(|e| (e, e.keys()))
        .collect();

    let mut candidates: Vec<(&EventEnvelope, BTreeSet<EventKey>)> = candidates
        .iter()
        .filter(|e| e.status == EventStatus::Pending && e.next_attempt_at <= now)
        .map(|e| (e, e.keys()))
        .collect();
    candidates.sort_by(|a, b| drain_order(a.0, b.0));

    let mut selected = Vec::new();
    for (event, keys) in candidates {
        if selected.len() >= limit {
            break;
        }
        if keys.is_empty() {
            selected.push(event.id);
            continue;
        }

        let blocked = open.iter().any(|(other, other_keys)| {
            other.id != event.id
                && (other.status == EventStatus::InFlight || is_earlier(other, event))
                && keys_overlap(&keys, other_keys)
        });
        if !blocked {
            selected.push(event.id);
        }
    }
    selected
}

/// Pending events made redundant by `new`.
///
/// `new` must share the route, have equal or higher priority and cover every
/// key of the older event. Keyless events only collapse when identical.
pub fn find_superseded(existing: &[EventEnvelope], new: &EventEnvelope) -> Vec<Uuid> {
    let new_keys = new.keys();
    existing
        .iter()
        .filter(|old| {
            old.id != new.id
                && old.status == EventStatus::Pending
                && old.same_route(new)
                && new.priority <= old.priority
        })
        .filter(|old| {
            let old_keys = old.keys();
            if old_keys.is_empty() {
                old.payload == new.payload
            } else {
                old_keys.is_subset(&new_keys)
            }
        })
        .map(|old| old.id)
        .collect()
}

pub fn mark_superseded(event: &mut EventEnvelope, by: Uuid, now: DateTime<Utc>) {
    event.status = EventStatus::Succeeded;
    event.reason = Some(SUPERSEDED_REASON.to_string());
    event.last_error = Some(format!("superseded by {}", by));
    event.leased_until = None;
    event.updated_at = now;
}

pub fn mark_leased(event: &mut EventEnvelope, lease_until: DateTime<Utc>, now: DateTime<Utc>) {
    event.status = EventStatus::InFlight;
    event.leased_until = Some(lease_until);
    event.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{EventPayload, EventType, NewEvent};
    use crate::models::rate_plan::DatedRate;
    use chrono::{Duration, NaiveDate};
    use rust_decimal_macros::dec;

    fn event(seq: u64, priority: u8, day: u32, at: DateTime<Utc>) -> EventEnvelope {
        let rates = vec![DatedRate {
            room_type_id: "RT1".to_string(),
            rate_plan_id: None,
            date: NaiveDate::from_ymd_opt(2025, 8, day).unwrap(),
            amount: dec!(100),
            currency: "USD".to_string(),
        }];
        EventEnvelope::from_new(
            NewEvent::new(EventType::RateUpdate, "H1", EventPayload::Rates { rates }, priority),
            seq,
            8,
            at,
        )
    }

    #[test]
    fn test_higher_priority_drains_first_across_keys() {
        let now = Utc::now();
        let low = event(1, 3, 1, now);
        let high = event(2, 1, 2, now + Duration::seconds(1));
        let ids = select_leasable(&[low.clone(), high.clone()], now + Duration::seconds(2), 1);
        assert_eq!(ids, vec![high.id]);
    }

    #[test]
    fn test_later_event_waits_for_earlier_on_same_key() {
        let now = Utc::now();
        let first = event(1, 5, 1, now);
        let second = event(2, 1, 1, now + Duration::seconds(1));
        let ids = select_leasable(&[first.clone(), second], now + Duration::seconds(2), 10);
        assert_eq!(ids, vec![first.id]);
    }

    #[test]
    fn test_in_flight_key_blocks_lease() {
        let now = Utc::now();
        let mut first = event(1, 3, 1, now);
        first.status = EventStatus::InFlight;
        let second = event(2, 3, 1, now);
        assert!(select_leasable(&[first, second], now, 10).is_empty());
    }

    #[test]
    fn test_backoff_delays_lease() {
        let now = Utc::now();
        let mut retrying = event(1, 3, 1, now);
        retrying.next_attempt_at = now + Duration::seconds(30);
        assert!(select_leasable(&[retrying], now, 10).is_empty());
    }

    #[test]
    fn test_covering_event_supersedes_pending() {
        let now = Utc::now();
        let old = event(1, 3, 1, now);
        let new = event(2, 1, 1, now);
        assert_eq!(find_superseded(&[old.clone()], &new), vec![old.id]);

        let lower = event(3, 5, 1, now);
        assert!(find_superseded(&[old], &lower).is_empty());
    }

    #[test]
    fn test_only_candidates_are_leased() {
        let now = Utc::now();
        let earlier = event(1, 3, 1, now);
        let blocked = event(2, 1, 1, now + Duration::seconds(1));
        let free = event(3, 5, 2, now + Duration::seconds(1));
        let outside = event(4, 1, 3, now);

        let ids = select_among(
            &[blocked.clone(), free.clone()],
            &[earlier, outside],
            now + Duration::seconds(2),
            10,
        );
        assert_eq!(ids, vec![free.id]);
    }

    #[test]
    fn test_skipped_candidate_still_blocks_later_one() {
        let now = Utc::now();
        let mut first = event(1, 3, 1, now);
        first.next_attempt_at = now + Duration::seconds(30);
        let second = event(2, 1, 1, now + Duration::seconds(1));

        assert!(select_among(&[first, second], &[], now + Duration::seconds(2), 10).is_empty());
    }
}
