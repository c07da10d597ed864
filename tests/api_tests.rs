mod common;

use axum::http::{header, StatusCode};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use innrate_backend::{
    config::AppConfig,
    handlers::router::API_KEY_HEADER,
    models::{
        channel::ChannelKind,
        event::{EventFilter, EventType},
    },
};

use crate::common::{call, channel, get_request, json_request, test_app, test_app_with, ROOM};

fn decimal(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

fn plan_body(name: &str, priority: u8, from: &str, to: &str) -> Value {
    json!({
        "roomTypeId": ROOM,
        "name": name,
        "planType": "standard",
        "baseRate": "100",
        "baseCurrency": "USD",
        "validFrom": from,
        "validTo": to,
        "priority": priority
    })
}

#[tokio::test]
async fn test_override_wins_over_seasonal_and_plan() {
    let app = test_app().await;
    let router = app.router();

    let (status, _) = call(
        router.clone(),
        json_request("POST", "/api/hotels/H1/rate-plans", &plan_body("BAR", 5, "2025-01-01", "2025-12-31")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let seasonal = json!({
        "season": "july",
        "startDate": "2025-07-01",
        "endDate": "2025-07-31",
        "adjustment": { "discountPct": "-20" }
    });
    let (status, _) = call(
        router.clone(),
        json_request("POST", "/api/hotels/H1/seasonal-rates", &seasonal),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let rate_override = json!({
        "roomTypeId": ROOM,
        "date": "2025-07-15",
        "rate": "80",
        "currency": "USD",
        "reason": "vip block",
        "approvedBy": "gm"
    });
    let (status, _) = call(
        router.clone(),
        json_request("POST", "/api/hotels/H1/rate-overrides", &rate_override),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let query = json!({ "roomTypeId": ROOM, "stayStart": "2025-07-15", "stayEnd": "2025-07-16", "guestCount": 2 });
    let (status, body) = call(router.clone(), json_request("POST", "/api/hotels/H1/quotes/best", &query)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ok");
    assert_eq!(decimal(&body["data"]["finalRate"]), Decimal::from(80));
    assert_eq!(body["data"]["currency"], "USD");
    assert_eq!(body["data"]["components"]["source"], "override");

    let next_night = json!({ "roomTypeId": ROOM, "stayStart": "2025-07-16", "stayEnd": "2025-07-17" });
    let (_, body) = call(router, json_request("POST", "/api/hotels/H1/quotes/best", &next_night)).await;
    assert_eq!(decimal(&body["data"]["finalRate"]), Decimal::from(120));
}

#[tokio::test]
async fn test_new_rate_plan_is_published_to_channels() {
    let app = test_app().await;
    app.add_channel(channel("booking", ChannelKind::BookingCom, "https://booking.test"))
        .await;

    let (status, body) = call(
        app.router(),
        json_request("POST", "/api/hotels/H1/rate-plans", &plan_body("BAR", 5, "2025-07-01", "2025-07-10")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["active"], true);

    let events = app
        .state
        .bus
        .list(&EventFilter {
            event_type: Some(EventType::RateUpdate),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason.as_deref(), Some("rate_plan_created"));

    app.drain().await;
    let sent = app.transport.requests_to("https://booking.test/rates");
    assert_eq!(sent.len(), 1);
    let payload: Value = serde_json::from_str(sent[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(payload["rates"].as_array().unwrap().len(), 10);
    assert_eq!(payload["rates"][0]["price"], "100.00");
}

#[tokio::test]
async fn test_conflicting_plan_priority_is_rejected() {
    let app = test_app().await;
    let router = app.router();
    call(
        router.clone(),
        json_request("POST", "/api/hotels/H1/rate-plans", &plan_body("BAR", 5, "2025-07-01", "2025-07-31")),
    )
    .await;

    let (status, body) = call(
        router,
        json_request("POST", "/api/hotels/H1/rate-plans", &plan_body("Other", 5, "2025-07-15", "2025-08-15")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["result"], "conflict");
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_validation_and_not_found_envelopes() {
    let app = test_app().await;
    let router = app.router();

    let bad_hotel = json!({ "name": "Nowhere", "timezone": "Mars/Olympus", "baseCurrency": "USD" });
    let (status, body) = call(router.clone(), json_request("PUT", "/api/hotels/H9", &bad_hotel)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["result"], "validationError");

    let query = json!({ "roomTypeId": "RT404", "stayStart": "2025-07-15", "stayEnd": "2025-07-16" });
    let (status, body) = call(router.clone(), json_request("POST", "/api/hotels/H1/quotes/best", &query)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["result"], "notFound");

    let (status, body) = call(
        router,
        get_request("/api/events/8f4f7c8e-0000-4000-8000-000000000000"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["result"], "notFound");
}

#[tokio::test]
async fn test_compare_rates_rejects_oversized_date_lists() {
    let app = test_app().await;
    let first = common::day(2025, 7, 1);
    let dates: Vec<String> = (0..367)
        .map(|i| (first + chrono::Duration::days(i)).to_string())
        .collect();
    let (status, _) = call(
        app.router(),
        json_request(
            "POST",
            "/api/hotels/H1/quotes/compare",
            &json!({ "roomTypeId": ROOM, "dates": dates }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_compare_rates_reports_each_date() {
    let app = test_app().await;
    let router = app.router();
    call(
        router.clone(),
        json_request("POST", "/api/hotels/H1/rate-plans", &plan_body("BAR", 5, "2025-07-01", "2025-07-10")),
    )
    .await;

    let (status, body) = call(
        router,
        json_request(
            "POST",
            "/api/hotels/H1/quotes/compare",
            &json!({ "roomTypeId": ROOM, "dates": ["2025-07-05", "2025-07-20"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["result"], "ok");
    assert_eq!(entries[1]["result"], "notFound");
}

#[tokio::test]
async fn test_channel_views_never_expose_secrets() {
    let app = test_app().await;
    let router = app.router();
    let input = serde_json::to_value(channel("booking", ChannelKind::BookingCom, "https://booking.test")).unwrap();

    let (status, body) = call(router.clone(), json_request("PUT", "/api/hotels/H1/channels/booking", &input)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.to_string().contains("s3cret"));
    assert_eq!(body["data"]["primaryCredential"]["scheme"], "basic");

    let (status, body) = call(router, get_request("/api/hotels/H1/channels")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert!(!body.to_string().contains("s3cret"));
}

#[tokio::test]
async fn test_wrong_auth_scheme_for_channel_kind_is_rejected() {
    let app = test_app().await;
    let mut input = channel("expedia", ChannelKind::Expedia, "https://expedia.test");
    input.primary_auth = innrate_backend::models::channel::ChannelAuth::Basic {
        username: "u".to_string(),
        password: "p".to_string(),
    };
    let (status, body) = call(
        app.router(),
        json_request(
            "PUT",
            "/api/hotels/H1/channels/expedia",
            &serde_json::to_value(input).unwrap(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["result"], "validationError");
}

#[tokio::test]
async fn test_rate_limit_per_api_key() {
    let mut config = AppConfig::default();
    config.server.api_rate_limit_per_minute = 2;
    let app = test_app_with(config).await;
    let router = app.router();

    let request = |key: &str| {
        axum::http::Request::builder()
            .uri("/api/hotels/H1/channels")
            .header(API_KEY_HEADER, key)
            .body(axum::body::Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let response = router.clone().oneshot(request("key-a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let limited = router.clone().oneshot(request("key-a")).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().get(header::RETRY_AFTER).is_some());
    let body = limited.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["result"], "rateLimited");
    assert!(body["retryAfterSecs"].as_u64().unwrap() <= 60);

    let other = router.clone().oneshot(request("key-b")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);

    // Health checks are not counted
    let health = router.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_hotel_and_room_type_upserts_take_ids_from_path() {
    let app = test_app().await;
    let router = app.router();

    let hotel = json!({ "name": "Lisbon Loft", "timezone": "Europe/Lisbon", "baseCurrency": "EUR" });
    let (status, body) = call(router.clone(), json_request("PUT", "/api/hotels/H2", &hotel)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "H2");

    let room = json!({ "name": "Suite", "maxOccupancy": 3, "baseRate": "180", "baseCurrency": "EUR", "totalRooms": 4 });
    let (status, body) = call(router.clone(), json_request("PUT", "/api/hotels/H2/room-types/STE", &room)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["code"], "STE");
    assert_eq!(body["data"]["hotelId"], "H2");

    let (status, _) = call(router, json_request("PUT", "/api/hotels/H404/room-types/STE", &room)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
