mod common;

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

use innrate_backend::{
    models::{
        channel::{ChannelKind, ConnectionStatus, ConversionMethod},
        event::{EventFilter, EventPayload, EventStatus, EventType, NewEvent},
        rate_plan::DatedRate,
    },
    services::{alerts::AlertKind, distributor::DistributeRatesRequest, transport::ChannelResponse},
};

use crate::common::{channel, currency, day, test_app, usd, HOTEL, ROOM};

fn rate_event(amount: Decimal, priority: u8) -> NewEvent {
    NewEvent::new(
        EventType::RateUpdate,
        HOTEL,
        EventPayload::Rates {
            rates: vec![DatedRate {
                room_type_id: ROOM.to_string(),
                rate_plan_id: None,
                date: day(2025, 8, 1),
                amount,
                currency: "USD".to_string(),
            }],
        },
        priority,
    )
}

fn bodies(requests: Vec<innrate_backend::services::transport::ChannelRequest>) -> Vec<Value> {
    requests
        .iter()
        .map(|r| serde_json::from_str(r.body.as_deref().unwrap()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_higher_priority_update_supersedes_pending_one() {
    let app = test_app().await;
    app.add_channel(channel("booking", ChannelKind::BookingCom, "https://booking.test"))
        .await;
    app.add_channel(channel("expedia", ChannelKind::Expedia, "https://expedia.test"))
        .await;
    let bus = &app.state.bus;

    let e1 = bus.enqueue(rate_event(dec!(120), 3)).await.unwrap();
    app.clock.advance(Duration::seconds(1));
    let e2 = bus.enqueue(rate_event(dec!(110), 1)).await.unwrap();

    let e1 = bus.get(e1.id).await.unwrap().unwrap();
    assert_eq!(e1.status, EventStatus::Succeeded);
    assert_eq!(e1.reason.as_deref(), Some("superseded"));

    assert_eq!(app.drain().await, 1);
    let e2 = bus.get(e2.id).await.unwrap().unwrap();
    assert_eq!(e2.status, EventStatus::Succeeded);

    let booking = bodies(app.transport.requests_to("https://booking.test/rates"));
    let expedia = bodies(app.transport.requests_to("https://expedia.test/rates"));
    assert_eq!(booking.len(), 1);
    assert_eq!(expedia.len(), 1);
    assert_eq!(booking[0]["rates"][0]["price"], "110.00");
    assert_eq!(expedia[0]["roomRates"][0]["amount"]["value"], "110.00");
}

#[tokio::test]
async fn test_same_key_delivers_in_enqueue_order_across_priorities() {
    let app = test_app().await;
    app.add_channel(channel("booking", ChannelKind::BookingCom, "https://booking.test"))
        .await;
    let bus = &app.state.bus;

    // A later routine update never supersedes an urgent one
    let first = bus.enqueue(rate_event(dec!(120), 1)).await.unwrap();
    app.clock.advance(Duration::seconds(1));
    let second = bus.enqueue(rate_event(dec!(130), 3)).await.unwrap();

    app.drain().await;
    assert_eq!(bus.get(first.id).await.unwrap().unwrap().status, EventStatus::Succeeded);
    assert_eq!(bus.get(second.id).await.unwrap().unwrap().status, EventStatus::Succeeded);

    let prices: Vec<Value> = bodies(app.transport.requests_to("https://booking.test/rates"))
        .into_iter()
        .map(|b| b["rates"][0]["price"].clone())
        .collect();
    assert_eq!(prices, vec![Value::from("120.00"), Value::from("130.00")]);
}

#[tokio::test]
async fn test_retries_until_dead_then_holds_until_probe() {
    let app = test_app().await;
    app.add_channel(channel("booking", ChannelKind::BookingCom, "https://booking.test"))
        .await;
    app.transport
        .always("https://booking.test", Ok(ChannelResponse::new(503)));
    app.transport
        .always("https://booking.test/health", Ok(ChannelResponse::new(200)));
    let bus = &app.state.bus;

    let event = bus.enqueue(rate_event(dec!(100), 3)).await.unwrap();
    for _ in 0..8 {
        app.state.distributor.dispatch_due(10).await.unwrap();
        app.clock.advance(Duration::minutes(31));
    }

    let event = bus.get(event.id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Dead);
    assert_eq!(event.attempts, 8);
    assert_eq!(app.transport.requests_to("https://booking.test/rates").len(), 8);

    let config = app.state.registry.get(HOTEL, "booking").await.unwrap().unwrap();
    assert_eq!(config.health.connection_status, ConnectionStatus::Unhealthy);
    let kinds: Vec<AlertKind> = app.state.alerts.recent(Some(HOTEL), 100).iter().map(|a| a.kind).collect();
    assert!(kinds.contains(&AlertKind::EventDead));
    assert!(kinds.contains(&AlertKind::ChannelUnhealthy));

    // New work waits behind the unhealthy channel without calling it
    let next = bus.enqueue(rate_event(dec!(105), 3)).await.unwrap();
    app.drain().await;
    let held = bus.get(next.id).await.unwrap().unwrap();
    assert_eq!(held.status, EventStatus::Pending);
    assert_eq!(held.priority, 5);
    assert_eq!(held.reason.as_deref(), Some("held"));
    assert_eq!(app.transport.requests_to("https://booking.test/rates").len(), 8);

    app.transport
        .always("https://booking.test", Ok(ChannelResponse::new(200)));
    assert!(app.state.distributor.probe(&config).await.unwrap());
    app.drain().await;

    let delivered = bus.get(next.id).await.unwrap().unwrap();
    assert_eq!(delivered.status, EventStatus::Succeeded);
    assert_eq!(app.transport.requests_to("https://booking.test/rates").len(), 9);
    let config = app.state.registry.get(HOTEL, "booking").await.unwrap().unwrap();
    assert_eq!(config.health.connection_status, ConnectionStatus::Active);
}

#[tokio::test]
async fn test_channel_markup_applies_after_conversion() {
    let app = test_app().await;
    let mut expedia = channel("expedia", ChannelKind::Expedia, "https://expedia.test");
    expedia.supported_currencies = vec![currency("EUR", dec!(0.05), ConversionMethod::Live)];
    app.add_channel(expedia).await;

    app.state.bus.enqueue(rate_event(dec!(100), 3)).await.unwrap();
    app.drain().await;

    let sent = bodies(app.transport.requests_to("https://expedia.test/rates"));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["roomRates"][0]["amount"]["value"], "94.50");
    assert_eq!(sent[0]["roomRates"][0]["amount"]["currency"], "EUR");
}

#[tokio::test]
async fn test_manual_push_targets_requested_channels_only() {
    let app = test_app().await;
    app.add_channel(channel("booking", ChannelKind::BookingCom, "https://booking.test"))
        .await;
    let mut airbnb = channel("airbnb", ChannelKind::Airbnb, "https://airbnb.test");
    airbnb.supported_currencies = vec![usd()];
    app.add_channel(airbnb).await;

    let request = DistributeRatesRequest {
        rates: vec![DatedRate {
            room_type_id: ROOM.to_string(),
            rate_plan_id: None,
            date: day(2025, 8, 2),
            amount: dec!(150),
            currency: "USD".to_string(),
        }],
        channels: vec!["airbnb".to_string()],
    };
    let events = app.state.distributor.distribute_rates(HOTEL, request).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].priority, 2);
    assert_eq!(events[0].reason.as_deref(), Some("manual_push"));

    app.drain().await;
    assert_eq!(app.transport.requests_to("https://airbnb.test/rates").len(), 1);
    assert!(app.transport.requests_to("https://booking.test").is_empty());

    let delivered = app
        .state
        .bus
        .list(&EventFilter {
            hotel_id: Some(HOTEL.to_string()),
            status: Some(EventStatus::Succeeded),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(delivered[0].delivered_channels, vec!["airbnb".to_string()]);
}

#[tokio::test]
async fn test_unknown_channel_in_manual_push_is_rejected() {
    let app = test_app().await;
    let request = DistributeRatesRequest {
        rates: vec![DatedRate {
            room_type_id: ROOM.to_string(),
            rate_plan_id: None,
            date: day(2025, 8, 2),
            amount: dec!(150),
            currency: "USD".to_string(),
        }],
        channels: vec!["nowhere".to_string()],
    };
    let result = app.state.distributor.distribute_rates(HOTEL, request).await;
    assert!(matches!(result, Err(innrate_backend::error::CoreError::NotFound(_))));
}
