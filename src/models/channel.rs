//! Channel (OTA) configuration records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use super::event::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    BookingCom,
    Expedia,
    Airbnb,
    Agoda,
    Generic,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::BookingCom => "booking_com",
            ChannelKind::Expedia => "expedia",
            ChannelKind::Airbnb => "airbnb",
            ChannelKind::Agoda => "agoda",
            ChannelKind::Generic => "generic",
        }
    }
}

/// Opaque secret material. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum ChannelAuth {
    Basic { username: String, password: String },
    Bearer { token: String },
    Hmac { key_id: String, secret: String },
}

impl fmt::Debug for ChannelAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            ChannelAuth::Bearer { .. } => f.debug_struct("Bearer").field("token", &"<redacted>").finish(),
            ChannelAuth::Hmac { key_id, .. } => f
                .debug_struct("Hmac")
                .field("key_id", key_id)
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Rotated,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCredential {
    pub id: Uuid,
    pub auth: ChannelAuth,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: CredentialStatus,
}

impl ChannelCredential {
    pub fn new(auth: ChannelAuth, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            auth,
            expires_at,
            status: CredentialStatus::Active,
        }
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == CredentialStatus::Active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCredentials {
    pub primary: ChannelCredential,
    #[serde(default)]
    pub backup: Option<ChannelCredential>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEndpoints {
    pub base_url: String,
    pub rates_path: String,
    pub inventory_path: String,
    /// Booking and content notices; falls back to the inventory path
    #[serde(default)]
    pub content_path: Option<String>,
    #[serde(default)]
    pub health_path: Option<String>,
}

impl ChannelEndpoints {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn content_path(&self) -> &str {
        self.content_path.as_deref().unwrap_or(&self.inventory_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    Up,
    Down,
    Nearest,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMethod {
    Live,
    DailyCached,
    Fixed,
}

impl ConversionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionMethod::Live => "live",
            ConversionMethod::DailyCached => "daily_cached",
            ConversionMethod::Fixed => "fixed",
        }
    }
}

/// How a channel wants to be sold in one currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedCurrency {
    /// Stored unit, ISO-4217
    pub code: String,
    /// Fraction, e.g. 0.15 for 15%
    #[serde(default)]
    pub markup: Decimal,
    pub rounding: RoundingPolicy,
    pub precision: u32,
    pub conversion_method: ConversionMethod,
    #[serde(default)]
    pub fixed_rate: Option<Decimal>,
    /// Market code for the PPP and tax tables
    #[serde(default)]
    pub market: Option<String>,
    /// Label written on the wire when the channel uses its own code
    #[serde(default)]
    pub channel_currency: Option<String>,
}

impl SupportedCurrency {
    pub fn wire_code(&self) -> &str {
        self.channel_currency.as_deref().unwrap_or(&self.code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_base_ms: 30_000,
            backoff_cap_ms: 1_800_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSync {
    #[serde(default)]
    pub rates: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inventory: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHealth {
    pub connection_status: ConnectionStatus,
    #[serde(default)]
    pub last_sync: LastSync,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Default for ChannelHealth {
    fn default() -> Self {
        Self {
            connection_status: ConnectionStatus::Active,
            last_sync: LastSync::default(),
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLifecycle {
    Created,
    Active,
    Rotated,
    Revoked,
}

impl ChannelLifecycle {
    /// Revoked channels receive nothing
    pub fn can_send(&self) -> bool {
        !matches!(self, ChannelLifecycle::Revoked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub hotel_id: String,
    pub channel_id: String,
    pub kind: ChannelKind,
    /// The hotel's id on the channel side
    pub external_hotel_id: String,
    pub credentials: ChannelCredentials,
    pub endpoints: ChannelEndpoints,
    pub supported_currencies: Vec<SupportedCurrency>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    pub sync_flags: Vec<EventType>,
    /// Internal room type id -> channel room id
    #[serde(default)]
    pub room_mappings: HashMap<String, String>,
    #[serde(default)]
    pub health: ChannelHealth,
    pub lifecycle: ChannelLifecycle,
    pub updated_at: DateTime<Utc>,
}

impl ChannelConfig {
    pub fn syncs(&self, event_type: EventType) -> bool {
        self.sync_flags.contains(&event_type)
    }

    pub fn is_unhealthy(&self) -> bool {
        self.health.connection_status == ConnectionStatus::Unhealthy
    }

    /// Channel room id, defaulting to our own id when unmapped
    pub fn channel_room_id<'a>(&'a self, room_type_id: &'a str) -> &'a str {
        self.room_mappings
            .get(room_type_id)
            .map(String::as_str)
            .unwrap_or(room_type_id)
    }
}

/// Body of `upsertChannelConfig`; health and lifecycle are server-owned
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfigInput {
    pub channel_id: String,
    pub kind: ChannelKind,
    pub external_hotel_id: String,
    pub primary_auth: ChannelAuth,
    #[serde(default)]
    pub primary_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub backup_auth: Option<ChannelAuth>,
    #[serde(default)]
    pub backup_expires_at: Option<DateTime<Utc>>,
    pub endpoints: ChannelEndpoints,
    pub supported_currencies: Vec<SupportedCurrency>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    pub sync_flags: Vec<EventType>,
    #[serde(default)]
    pub room_mappings: HashMap<String, String>,
}

/// Body of `rotateChannelCredential`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRotation {
    pub auth: ChannelAuth,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}
