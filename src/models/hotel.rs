use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Hotel identity plus the settings every component needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotel {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// IANA timezone name, e.g. "Europe/Lisbon"
    pub timezone: String,
    pub base_currency: String,
}

impl Hotel {
    /// Parsed timezone, falling back to UTC for unknown names
    pub fn tz(&self) -> Tz {
        self.timezone.parse::<Tz>().unwrap_or(Tz::UTC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomType {
    #[serde(default)]
    pub hotel_id: String,
    /// Unique per hotel; doubles as the room type id
    #[serde(default)]
    pub code: String,
    pub name: String,
    pub max_occupancy: u32,
    pub base_rate: Decimal,
    pub base_currency: String,
    /// Physical inventory used when seeding availability rows
    #[serde(default)]
    pub total_rooms: u32,
}
