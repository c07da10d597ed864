mod common;

use axum::http::StatusCode;
use chrono::Duration;
use serde_json::json;

use innrate_backend::{
    models::{
        availability::{AvailabilityRow, AvailabilityUpdate},
        channel::ChannelKind,
        event::{EventFilter, EventStatus, EventType},
    },
    services::alerts::AlertKind,
    store::Store,
};

use crate::common::{call, channel, day, json_request, start_time, test_app, TestApp, HOTEL, ROOM};

async fn seed_row(app: &TestApp, date: chrono::NaiveDate, total: u32, sold: u32) {
    let mut row = AvailabilityRow::seeded(HOTEL, ROOM, date, total, start_time());
    row.sold_rooms = sold;
    app.store.seed_availability(vec![row]).await.unwrap();
}

async fn row(app: &TestApp, date: chrono::NaiveDate) -> AvailabilityRow {
    app.store
        .list_availability(HOTEL, Some(ROOM), date, date)
        .await
        .unwrap()
        .remove(0)
}

fn booking_body(booking_id: &str, check_in: &str, check_out: &str) -> serde_json::Value {
    json!({
        "kind": "new_booking",
        "channelBookingId": booking_id,
        "stay": { "roomTypeId": ROOM, "checkIn": check_in, "checkOut": check_out },
        "guest": { "name": "Ana Lima", "count": 2 },
        "amount": "240.00",
        "currency": "USD",
        "sequence": 1
    })
}

#[tokio::test]
async fn test_overbooking_webhook_is_rejected_and_alerted() {
    let app = test_app().await;
    app.add_channel(channel("booking", ChannelKind::BookingCom, "https://booking.test"))
        .await;
    seed_row(&app, day(2025, 9, 10), 3, 3).await;

    let (status, body) = call(
        app.router(),
        json_request(
            "POST",
            "/api/hotels/H1/channels/booking/webhook",
            &booking_body("BK-9", "2025-09-10", "2025-09-11"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["result"], "conflict");

    let current = row(&app, day(2025, 9, 10)).await;
    assert_eq!(current.sold_rooms, 3);
    assert_eq!(current.available_rooms(), 0);

    let alerts = app
        .state
        .bus
        .list(&EventFilter {
            event_type: Some(EventType::OverbookingAlert),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].priority, 1);

    app.drain().await;
    let raised = app.state.alerts.recent(Some(HOTEL), 10);
    assert!(raised.iter().any(|a| a.kind == AlertKind::Overbooking));
    assert!(app.transport.requests().is_empty());
    assert_eq!(app.state.reconciler.unresolved(HOTEL).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_channel_booking_corrects_the_other_channels() {
    let app = test_app().await;
    app.add_channel(channel("booking", ChannelKind::BookingCom, "https://booking.test"))
        .await;
    app.add_channel(channel("expedia", ChannelKind::Expedia, "https://expedia.test"))
        .await;
    seed_row(&app, day(2025, 9, 11), 3, 0).await;
    seed_row(&app, day(2025, 9, 12), 3, 0).await;

    let (status, body) = call(
        app.router(),
        json_request(
            "POST",
            "/api/hotels/H1/channels/booking/webhook",
            &booking_body("BK-10", "2025-09-11", "2025-09-13"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ok");
    assert_eq!(body["data"]["status"], "applied");

    assert_eq!(row(&app, day(2025, 9, 11)).await.sold_rooms, 1);
    assert_eq!(row(&app, day(2025, 9, 12)).await.sold_rooms, 1);

    app.drain().await;
    assert!(app.transport.requests_to("https://booking.test").is_empty());
    let sent = app.transport.requests_to("https://expedia.test/inventory");
    assert_eq!(sent.len(), 1);
    let payload: serde_json::Value = serde_json::from_str(sent[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(payload["inventory"][0]["totalInventoryAvailable"], 2);
}

#[tokio::test]
async fn test_webhook_for_unknown_channel_is_not_found() {
    let app = test_app().await;
    let (status, body) = call(
        app.router(),
        json_request(
            "POST",
            "/api/hotels/H1/channels/ghost/webhook",
            &booking_body("BK-1", "2025-09-10", "2025-09-11"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["result"], "notFound");
}

#[tokio::test]
async fn test_batch_partial_success_rolls_back_one_sub_batch() {
    let app = test_app().await;
    let first = day(2025, 7, 1);
    let dates: Vec<chrono::NaiveDate> = (0..2500).map(|i| first + Duration::days(i)).collect();

    let rows = dates
        .iter()
        .enumerate()
        .map(|(i, date)| {
            let mut row = AvailabilityRow::seeded(HOTEL, ROOM, *date, 10, start_time());
            if i == 1500 {
                row.sold_rooms = 5;
            }
            row
        })
        .collect();
    app.store.seed_availability(rows).await.unwrap();

    let updates: Vec<AvailabilityUpdate> = dates
        .iter()
        .enumerate()
        .map(|(i, date)| AvailabilityUpdate {
            hotel_id: HOTEL.to_string(),
            room_type_id: ROOM.to_string(),
            date: *date,
            total_rooms: Some(if i == 1500 { 2 } else { 8 }),
            blocked_rooms: None,
            stop_sell: None,
            closed_to_arrival: None,
            closed_to_departure: None,
            min_stay: None,
            max_stay: None,
        })
        .collect();

    let result = app.state.batch.apply_availability(HOTEL, updates).await;
    assert!(result.success);
    assert_eq!(result.sub_batches, 3);
    assert_eq!(result.modified, 1500);
    assert_eq!(result.upserted, 0);
    assert_eq!(result.failed, 1000);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].sub_batch, Some(1));
    assert_eq!(result.event_ids.len(), 2);

    // The failed sub-batch left its rows untouched
    assert_eq!(row(&app, dates[999]).await.total_rooms, 8);
    assert_eq!(row(&app, dates[1000]).await.total_rooms, 10);
    assert_eq!(row(&app, dates[1999]).await.total_rooms, 10);
    assert_eq!(row(&app, dates[2000]).await.total_rooms, 8);

    let events = app
        .state
        .bus
        .list(&EventFilter {
            event_type: Some(EventType::AvailabilityUpdate),
            status: Some(EventStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_bulk_availability_route_returns_batch_result() {
    let app = test_app().await;
    let body = json!([
        { "hotelId": HOTEL, "roomTypeId": ROOM, "date": "2025-08-01", "totalRooms": 6 },
        { "hotelId": "H2", "roomTypeId": ROOM, "date": "2025-08-02", "totalRooms": 6 }
    ]);
    let (status, body) = call(
        app.router(),
        json_request("POST", "/api/hotels/H1/availability/bulk", &body),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["upserted"], 1);
    assert_eq!(body["data"]["failed"], 1);
    assert_eq!(body["data"]["errors"][0]["index"], 1);
    assert_eq!(row(&app, day(2025, 8, 1)).await.total_rooms, 6);
}
