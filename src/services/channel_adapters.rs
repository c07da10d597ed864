//! Per-channel wire formats and request signing.

use base64::{engine::general_purpose, Engine as _};
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::TransportError;
use crate::models::availability::InventorySnapshot;
use crate::models::channel::{ChannelAuth, ChannelConfig, ChannelKind};
use crate::models::event::EventPayload;
use crate::services::clock::wire_date;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Bearer,
    Hmac,
}

impl AuthScheme {
    pub fn of(auth: &ChannelAuth) -> Self {
        match auth {
            ChannelAuth::Basic { .. } => AuthScheme::Basic,
            ChannelAuth::Bearer { .. } => AuthScheme::Bearer,
            ChannelAuth::Hmac { .. } => AuthScheme::Hmac,
        }
    }
}

/// Scheme a channel kind requires; `None` accepts any
pub fn required_scheme(kind: ChannelKind) -> Option<AuthScheme> {
    match kind {
        ChannelKind::BookingCom | ChannelKind::Agoda => Some(AuthScheme::Basic),
        ChannelKind::Expedia | ChannelKind::Airbnb => Some(AuthScheme::Bearer),
        ChannelKind::Generic => None,
    }
}

/// One converted nightly rate in channel terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLine {
    pub room_id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    /// Wire label
    pub currency: String,
}

pub fn rates_body(config: &ChannelConfig, lines: &[RateLine]) -> Value {
    let hotel = &config.external_hotel_id;
    match config.kind {
        ChannelKind::BookingCom => json!({
            "hotel_id": hotel,
            "rates": lines.iter().map(|l| json!({
                "room_id": l.room_id,
                "date": wire_date(l.date),
                "price": l.amount.to_string(),
                "currency": l.currency,
            })).collect::<Vec<_>>(),
        }),
        ChannelKind::Expedia => json!({
            "propertyId": hotel,
            "roomRates": lines.iter().map(|l| json!({
                "roomTypeId": l.room_id,
                "stayDate": wire_date(l.date),
                "amount": { "value": l.amount.to_string(), "currency": l.currency },
            })).collect::<Vec<_>>(),
        }),
        ChannelKind::Airbnb => json!({
            "listing_id": hotel,
            "daily_prices": lines.iter().map(|l| json!({
                "room": l.room_id,
                "date": wire_date(l.date),
                "price": l.amount.to_string(),
                "currency": l.currency,
            })).collect::<Vec<_>>(),
        }),
        ChannelKind::Agoda => json!({
            "propertyId": hotel,
            "rates": lines.iter().map(|l| json!({
                "roomId": l.room_id,
                "date": wire_date(l.date),
                "rate": l.amount.to_string(),
                "currencyCode": l.currency,
            })).collect::<Vec<_>>(),
        }),
        ChannelKind::Generic => json!({
            "hotelId": hotel,
            "type": "rates",
            "items": lines.iter().map(|l| json!({
                "roomTypeId": l.room_id,
                "date": wire_date(l.date),
                "amount": l.amount.to_string(),
                "currency": l.currency,
            })).collect::<Vec<_>>(),
        }),
    }
}

pub fn inventory_body(config: &ChannelConfig, rows: &[InventorySnapshot]) -> Value {
    let hotel = &config.external_hotel_id;
    let room = |row: &InventorySnapshot| config.channel_room_id(&row.room_type_id).to_string();
    match config.kind {
        ChannelKind::BookingCom => json!({
            "hotel_id": hotel,
            "availability": rows.iter().map(|r| json!({
                "room_id": room(r),
                "date": wire_date(r.date),
                "rooms_to_sell": r.available_rooms,
                "closed": r.stop_sell,
                "closed_on_arrival": r.closed_to_arrival,
                "closed_on_departure": r.closed_to_departure,
                "min_stay": r.min_stay,
                "max_stay": r.max_stay,
            })).collect::<Vec<_>>(),
        }),
        ChannelKind::Expedia => json!({
            "propertyId": hotel,
            "inventory": rows.iter().map(|r| json!({
                "roomTypeId": room(r),
                "stayDate": wire_date(r.date),
                "totalInventoryAvailable": r.available_rooms,
                "status": if r.stop_sell { "closed" } else { "open" },
                "restrictions": {
                    "closedToArrival": r.closed_to_arrival,
                    "closedToDeparture": r.closed_to_departure,
                    "minLOS": r.min_stay,
                    "maxLOS": r.max_stay,
                },
            })).collect::<Vec<_>>(),
        }),
        ChannelKind::Airbnb => json!({
            "listing_id": hotel,
            "calendar": rows.iter().map(|r| json!({
                "room": room(r),
                "date": wire_date(r.date),
                "available_count": r.available_rooms,
                "available": !r.stop_sell && r.available_rooms > 0,
                "min_nights": r.min_stay,
                "max_nights": r.max_stay,
            })).collect::<Vec<_>>(),
        }),
        ChannelKind::Agoda => json!({
            "propertyId": hotel,
            "allotments": rows.iter().map(|r| json!({
                "roomId": room(r),
                "date": wire_date(r.date),
                "allotment": r.available_rooms,
                "closeOut": r.stop_sell,
                "cta": r.closed_to_arrival,
                "ctd": r.closed_to_departure,
                "minStay": r.min_stay,
                "maxStay": r.max_stay,
            })).collect::<Vec<_>>(),
        }),
        ChannelKind::Generic => json!({
            "hotelId": hotel,
            "type": "inventory",
            "items": rows.iter().map(|r| json!({
                "roomTypeId": room(r),
                "date": wire_date(r.date),
                "availableRooms": r.available_rooms,
                "stopSell": r.stop_sell,
                "cta": r.closed_to_arrival,
                "ctd": r.closed_to_departure,
                "minStay": r.min_stay,
                "maxStay": r.max_stay,
            })).collect::<Vec<_>>(),
        }),
    }
}

/// Booking confirmations and content changes share one generic notice shape
pub fn notice_body(config: &ChannelConfig, payload: &EventPayload) -> Option<Value> {
    let hotel = &config.external_hotel_id;
    match payload {
        EventPayload::BookingSync {
            channel_booking_id,
            room_type_id,
            check_in,
            check_out,
            rooms,
            status,
            ..
        } => Some(json!({
            "hotelId": hotel,
            "type": "booking",
            "bookingId": channel_booking_id,
            "roomTypeId": config.channel_room_id(room_type_id),
            "checkIn": wire_date(*check_in),
            "checkOut": wire_date(*check_out),
            "rooms": rooms,
            "status": status,
        })),
        EventPayload::ChannelModification { changes, .. } => Some(json!({
            "hotelId": hotel,
            "type": "content",
            "changes": changes,
        })),
        _ => None,
    }
}

/// Authentication headers for `body`. HMAC signs `"{timestamp}.{body}"`.
pub fn sign(auth: &ChannelAuth, body: &str, timestamp: i64) -> Result<Vec<(String, String)>, TransportError> {
    match auth {
        ChannelAuth::Basic { username, password } => {
            let token = general_purpose::STANDARD.encode(format!("{}:{}", username, password));
            Ok(vec![("Authorization".to_string(), format!("Basic {}", token))])
        }
        ChannelAuth::Bearer { token } => Ok(vec![("Authorization".to_string(), format!("Bearer {}", token))]),
        ChannelAuth::Hmac { key_id, secret } => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|e| TransportError::Invalid(format!("HMAC key: {}", e)))?;
            mac.update(format!("{}.{}", timestamp, body).as_bytes());
            let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());
            Ok(vec![
                ("X-Key-Id".to_string(), key_id.clone()),
                ("X-Timestamp".to_string(), timestamp.to_string()),
                ("X-Signature".to_string(), signature),
            ])
        }
    }
}

/// Hex SHA-256 of a request body, kept in the call log
pub fn payload_digest(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::channel::{
        ChannelCredential, ChannelCredentials, ChannelEndpoints, ChannelHealth, ChannelLifecycle, RetryPolicy,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn config(kind: ChannelKind) -> ChannelConfig {
        ChannelConfig {
            hotel_id: "H1".to_string(),
            channel_id: "ota".to_string(),
            kind,
            external_hotel_id: "EXT-9".to_string(),
            credentials: ChannelCredentials {
                primary: ChannelCredential::new(ChannelAuth::Bearer { token: "t".to_string() }, None),
                backup: None,
            },
            endpoints: ChannelEndpoints {
                base_url: "https://ota.test".to_string(),
                rates_path: "/rates".to_string(),
                inventory_path: "/inventory".to_string(),
                content_path: None,
                health_path: None,
            },
            supported_currencies: vec![],
            timeout_ms: 10_000,
            retry_policy: RetryPolicy::default(),
            sync_flags: vec![],
            room_mappings: HashMap::from([("RT1".to_string(), "DLX".to_string())]),
            health: ChannelHealth::default(),
            lifecycle: ChannelLifecycle::Active,
            updated_at: Utc::now(),
        }
    }

    fn line() -> RateLine {
        RateLine {
            room_id: "DLX".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 9, 10).unwrap(),
            amount: dec!(94.50),
            currency: "EUR".to_string(),
        }
    }

    #[test]
    fn test_booking_com_rates_shape() {
        let body = rates_body(&config(ChannelKind::BookingCom), &[line()]);
        assert_eq!(body["hotel_id"], "EXT-9");
        assert_eq!(body["rates"][0]["date"], "2025-09-10");
        assert_eq!(body["rates"][0]["price"], "94.50");
        assert_eq!(body["rates"][0]["currency"], "EUR");
    }

    #[test]
    fn test_expedia_nests_amount() {
        let body = rates_body(&config(ChannelKind::Expedia), &[line()]);
        assert_eq!(body["roomRates"][0]["amount"]["value"], "94.50");
        assert_eq!(body["roomRates"][0]["stayDate"], "2025-09-10");
    }

    #[test]
    fn test_inventory_uses_room_mapping() {
        let snapshot = InventorySnapshot {
            room_type_id: "RT1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 9, 10).unwrap(),
            available_rooms: 4,
            stop_sell: false,
            closed_to_arrival: false,
            closed_to_departure: true,
            min_stay: 1,
            max_stay: 14,
        };
        let body = inventory_body(&config(ChannelKind::Agoda), &[snapshot]);
        assert_eq!(body["allotments"][0]["roomId"], "DLX");
        assert_eq!(body["allotments"][0]["allotment"], 4);
        assert_eq!(body["allotments"][0]["ctd"], true);
    }

    #[test]
    fn test_kind_auth_requirements() {
        assert_eq!(required_scheme(ChannelKind::BookingCom), Some(AuthScheme::Basic));
        assert_eq!(required_scheme(ChannelKind::Agoda), Some(AuthScheme::Basic));
        assert_eq!(required_scheme(ChannelKind::Expedia), Some(AuthScheme::Bearer));
        assert_eq!(required_scheme(ChannelKind::Airbnb), Some(AuthScheme::Bearer));
        assert_eq!(required_scheme(ChannelKind::Generic), None);
    }

    #[test]
    fn test_basic_header() {
        let auth = ChannelAuth::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        let headers = sign(&auth, "{}", 0).unwrap();
        assert_eq!(headers[0].1, "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_hmac_signature_is_stable_and_body_bound() {
        let auth = ChannelAuth::Hmac {
            key_id: "k1".to_string(),
            secret: "s3cret".to_string(),
        };
        let a = sign(&auth, "{\"a\":1}", 1_700_000_000).unwrap();
        let b = sign(&auth, "{\"a\":1}", 1_700_000_000).unwrap();
        let c = sign(&auth, "{\"a\":2}", 1_700_000_000).unwrap();
        assert_eq!(a, b);
        assert_ne!(a[2].1, c[2].1);
        assert_eq!(a[0], ("X-Key-Id".to_string(), "k1".to_string()));
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        assert_eq!(
            payload_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
