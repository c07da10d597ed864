//! Availability rows and the pure write functions applied to them.
//!
//! Stores never mutate a row in place: they load the current row, call one
//! of the functions below and persist the result, so the same invariant
//! checks run against every backend.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default restrictions for rows seeded by the rollout job
pub const DEFAULT_MIN_STAY: u32 = 1;
pub const DEFAULT_MAX_STAY: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRow {
    pub hotel_id: String,
    pub room_type_id: String,
    pub date: NaiveDate,
    pub total_rooms: u32,
    pub sold_rooms: u32,
    pub blocked_rooms: u32,
    pub stop_sell: bool,
    #[serde(rename = "cta")]
    pub closed_to_arrival: bool,
    #[serde(rename = "ctd")]
    pub closed_to_departure: bool,
    pub min_stay: u32,
    pub max_stay: u32,
    pub updated_at: DateTime<Utc>,
}

/// Broken availability invariant
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("{room_type_id} on {date}: sold {sold} + blocked {blocked} exceeds total {total}")]
    Oversold {
        room_type_id: String,
        date: NaiveDate,
        total: u32,
        sold: u32,
        blocked: u32,
    },

    #[error("{room_type_id} on {date}: sold rooms would drop below zero")]
    NegativeSold { room_type_id: String, date: NaiveDate },

    #[error("{room_type_id} on {date}: min stay {min_stay} exceeds max stay {max_stay}")]
    StayBounds {
        room_type_id: String,
        date: NaiveDate,
        min_stay: u32,
        max_stay: u32,
    },

    #[error("{room_type_id} on {date}: no availability row")]
    MissingRow { room_type_id: String, date: NaiveDate },
}

impl AvailabilityRow {
    pub fn seeded(
        hotel_id: &str,
        room_type_id: &str,
        date: NaiveDate,
        total_rooms: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            hotel_id: hotel_id.to_string(),
            room_type_id: room_type_id.to_string(),
            date,
            total_rooms,
            sold_rooms: 0,
            blocked_rooms: 0,
            stop_sell: false,
            closed_to_arrival: false,
            closed_to_departure: false,
            min_stay: DEFAULT_MIN_STAY,
            max_stay: DEFAULT_MAX_STAY,
            updated_at: now,
        }
    }

    /// Rooms still sellable: `total - sold - blocked`, never below zero
    pub fn available_rooms(&self) -> u32 {
        self.total_rooms
            .saturating_sub(self.sold_rooms)
            .saturating_sub(self.blocked_rooms)
    }

    /// True when nothing can be sold on this date
    pub fn is_closed(&self) -> bool {
        self.stop_sell || self.available_rooms() == 0
    }

    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let committed = self.sold_rooms as u64 + self.blocked_rooms as u64;
        if committed > self.total_rooms as u64 {
            return Err(InvariantViolation::Oversold {
                room_type_id: self.room_type_id.clone(),
                date: self.date,
                total: self.total_rooms,
                sold: self.sold_rooms,
                blocked: self.blocked_rooms,
            });
        }
        if self.min_stay > self.max_stay {
            return Err(InvariantViolation::StayBounds {
                room_type_id: self.room_type_id.clone(),
                date: self.date,
                min_stay: self.min_stay,
                max_stay: self.max_stay,
            });
        }
        Ok(())
    }
}

/// One item of `bulkUpdateAvailability`. Absent fields keep their value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityUpdate {
    pub hotel_id: String,
    pub room_type_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub total_rooms: Option<u32>,
    #[serde(default)]
    pub blocked_rooms: Option<u32>,
    #[serde(default)]
    pub stop_sell: Option<bool>,
    #[serde(default, rename = "cta")]
    pub closed_to_arrival: Option<bool>,
    #[serde(default, rename = "ctd")]
    pub closed_to_departure: Option<bool>,
    #[serde(default)]
    pub min_stay: Option<u32>,
    #[serde(default)]
    pub max_stay: Option<u32>,
}

impl AvailabilityUpdate {
    pub fn key(&self) -> (String, NaiveDate) {
        (self.room_type_id.clone(), self.date)
    }

    /// Checks that do not need the current row
    pub fn validate_shape(&self) -> Result<(), String> {
        if self.room_type_id.trim().is_empty() {
            return Err("roomTypeId cannot be empty".to_string());
        }
        if let (Some(min), Some(max)) = (self.min_stay, self.max_stay) {
            if min > max {
                return Err(format!("minStay {} exceeds maxStay {}", min, max));
            }
        }
        if self.min_stay == Some(0) {
            return Err("minStay must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Apply an update to the current row (or to a fresh one when absent).
///
/// A fresh row without `total_rooms` starts at zero inventory.
pub fn apply_availability_update(
    current: Option<&AvailabilityRow>,
    update: &AvailabilityUpdate,
    now: DateTime<Utc>,
) -> Result<AvailabilityRow, InvariantViolation> {
    let mut row = match current {
        Some(row) => row.clone(),
        None => AvailabilityRow::seeded(&update.hotel_id, &update.room_type_id, update.date, 0, now),
    };

    if let Some(total) = update.total_rooms {
        row.total_rooms = total;
    }
    if let Some(blocked) = update.blocked_rooms {
        row.blocked_rooms = blocked;
    }
    if let Some(stop_sell) = update.stop_sell {
        row.stop_sell = stop_sell;
    }
    if let Some(cta) = update.closed_to_arrival {
        row.closed_to_arrival = cta;
    }
    if let Some(ctd) = update.closed_to_departure {
        row.closed_to_departure = ctd;
    }
    if let Some(min_stay) = update.min_stay {
        row.min_stay = min_stay;
    }
    if let Some(max_stay) = update.max_stay {
        row.max_stay = max_stay;
    }
    row.updated_at = now;

    row.validate()?;
    Ok(row)
}

/// Apply a signed change to `sold_rooms` (bookings and cancellations)
pub fn apply_sold_delta(
    current: &AvailabilityRow,
    delta: i64,
    now: DateTime<Utc>,
) -> Result<AvailabilityRow, InvariantViolation> {
    let sold = current.sold_rooms as i64 + delta;
    if sold < 0 {
        return Err(InvariantViolation::NegativeSold {
            room_type_id: current.room_type_id.clone(),
            date: current.date,
        });
    }

    let mut row = current.clone();
    row.sold_rooms = u32::try_from(sold).map_err(|_| InvariantViolation::Oversold {
        room_type_id: current.room_type_id.clone(),
        date: current.date,
        total: current.total_rooms,
        sold: u32::MAX,
        blocked: current.blocked_rooms,
    })?;
    row.updated_at = now;
    row.validate()?;
    Ok(row)
}

/// What a channel needs to know about one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySnapshot {
    pub room_type_id: String,
    pub date: NaiveDate,
    pub available_rooms: u32,
    pub stop_sell: bool,
    pub closed_to_arrival: bool,
    pub closed_to_departure: bool,
    pub min_stay: u32,
    pub max_stay: u32,
}

impl From<&AvailabilityRow> for InventorySnapshot {
    fn from(row: &AvailabilityRow) -> Self {
        Self {
            room_type_id: row.room_type_id.clone(),
            date: row.date,
            available_rooms: row.available_rooms(),
            stop_sell: row.stop_sell,
            closed_to_arrival: row.closed_to_arrival,
            closed_to_departure: row.closed_to_departure,
            min_stay: row.min_stay,
            max_stay: row.max_stay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(total: u32, sold: u32, blocked: u32) -> AvailabilityRow {
        let mut row = AvailabilityRow::seeded(
            "H1",
            "RT1",
            NaiveDate::from_ymd_opt(2025, 9, 10).unwrap(),
            total,
            Utc::now(),
        );
        row.sold_rooms = sold;
        row.blocked_rooms = blocked;
        row
    }

    fn update() -> AvailabilityUpdate {
        AvailabilityUpdate {
            hotel_id: "H1".to_string(),
            room_type_id: "RT1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 9, 10).unwrap(),
            total_rooms: None,
            blocked_rooms: None,
            stop_sell: None,
            closed_to_arrival: None,
            closed_to_departure: None,
            min_stay: None,
            max_stay: None,
        }
    }

    #[test]
    fn test_available_rooms_is_derived() {
        assert_eq!(row(10, 4, 2).available_rooms(), 6);
        assert_eq!(row(3, 3, 0).available_rooms(), 0);
    }

    #[test]
    fn test_lowering_total_below_sold_is_rejected() {
        let current = row(10, 8, 0);
        let mut change = update();
        change.total_rooms = Some(5);

        let result = apply_availability_update(Some(&current), &change, Utc::now());
        assert!(matches!(result, Err(InvariantViolation::Oversold { .. })));
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let mut current = row(10, 2, 1);
        current.closed_to_arrival = true;
        let mut change = update();
        change.stop_sell = Some(true);

        let updated = apply_availability_update(Some(&current), &change, Utc::now()).unwrap();
        assert!(updated.stop_sell);
        assert!(updated.closed_to_arrival);
        assert_eq!(updated.total_rooms, 10);
        assert_eq!(updated.sold_rooms, 2);
    }

    #[test]
    fn test_sold_delta_cannot_oversell() {
        let current = row(3, 3, 0);
        assert!(matches!(
            apply_sold_delta(&current, 1, Utc::now()),
            Err(InvariantViolation::Oversold { .. })
        ));
        assert!(matches!(
            apply_sold_delta(&row(3, 0, 0), -1, Utc::now()),
            Err(InvariantViolation::NegativeSold { .. })
        ));
        assert_eq!(apply_sold_delta(&current, -1, Utc::now()).unwrap().sold_rooms, 2);
    }

    #[test]
    fn test_shape_validation_catches_inverted_stay_bounds() {
        let mut change = update();
        change.min_stay = Some(5);
        change.max_stay = Some(2);
        assert!(change.validate_shape().is_err());
    }
}
