#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tower::ServiceExt;

use innrate_backend::{
    config::AppConfig,
    handlers::router::build_router,
    models::{
        channel::{
            ChannelAuth, ChannelConfigInput, ChannelEndpoints, ChannelKind, ConversionMethod, RoundingPolicy,
            SupportedCurrency,
        },
        event::EventType,
        hotel::{Hotel, RoomType},
    },
    services::{
        clock::{Clock, ManualClock},
        currency::StaticRateProvider,
        transport::ScriptedTransport,
    },
    store::{MemoryStore, Store},
    AppState,
};

pub const HOTEL: &str = "H1";
pub const ROOM: &str = "RT1";

/// Core wired over in-memory collaborators the tests can steer
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: ManualClock,
    pub transport: ScriptedTransport,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub async fn test_app() -> TestApp {
    test_app_with(AppConfig::default()).await
}

pub async fn test_app_with(config: AppConfig) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(start_time());
    let transport = ScriptedTransport::new();
    let provider = Arc::new(StaticRateProvider::new().with_rate("USD", "EUR", dec!(0.90)));

    let state = AppState::build(
        config,
        store.clone(),
        Arc::new(clock.clone()),
        provider,
        Arc::new(transport.clone()),
    );

    store
        .upsert_hotel(Hotel {
            id: HOTEL.to_string(),
            name: "Harbour View".to_string(),
            timezone: "UTC".to_string(),
            base_currency: "USD".to_string(),
        })
        .await
        .unwrap();
    store
        .upsert_room_type(RoomType {
            hotel_id: HOTEL.to_string(),
            code: ROOM.to_string(),
            name: "Double".to_string(),
            max_occupancy: 2,
            base_rate: dec!(100),
            base_currency: "USD".to_string(),
            total_rooms: 10,
        })
        .await
        .unwrap();

    TestApp {
        state,
        store,
        clock,
        transport,
    }
}

impl TestApp {
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Dispatch until nothing is due
    pub async fn drain(&self) -> usize {
        let mut total = 0;
        for _ in 0..50 {
            let n = self.state.distributor.dispatch_due(32).await.unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    }

    pub fn clock_ref(&self) -> &dyn Clock {
        &self.clock
    }

    pub async fn add_channel(&self, input: ChannelConfigInput) {
        self.state.registry.upsert(HOTEL, input).await.unwrap();
    }
}

pub fn usd() -> SupportedCurrency {
    currency("USD", Decimal::ZERO, ConversionMethod::DailyCached)
}

pub fn currency(code: &str, markup: Decimal, method: ConversionMethod) -> SupportedCurrency {
    SupportedCurrency {
        code: code.to_string(),
        markup,
        rounding: RoundingPolicy::Nearest,
        precision: 2,
        conversion_method: method,
        fixed_rate: None,
        market: None,
        channel_currency: None,
    }
}

pub fn channel(channel_id: &str, kind: ChannelKind, base_url: &str) -> ChannelConfigInput {
    let primary_auth = match kind {
        ChannelKind::BookingCom | ChannelKind::Agoda => ChannelAuth::Basic {
            username: "hotel".to_string(),
            password: "s3cret-password".to_string(),
        },
        _ => ChannelAuth::Bearer {
            token: "s3cret-token".to_string(),
        },
    };
    ChannelConfigInput {
        channel_id: channel_id.to_string(),
        kind,
        external_hotel_id: format!("ext-{}", channel_id),
        primary_auth,
        primary_expires_at: None,
        backup_auth: None,
        backup_expires_at: None,
        endpoints: ChannelEndpoints {
            base_url: base_url.to_string(),
            rates_path: "/rates".to_string(),
            inventory_path: "/inventory".to_string(),
            content_path: None,
            health_path: Some("/health".to_string()),
        },
        supported_currencies: vec![usd()],
        timeout_ms: None,
        retry_policy: None,
        sync_flags: vec![EventType::RateUpdate, EventType::AvailabilityUpdate],
        room_mappings: HashMap::new(),
    }
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Send one request and decode the JSON body
pub async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}
