mod common;

use std::sync::Arc;

use chrono::Duration;
use rust_decimal_macros::dec;
use uuid::Uuid;

use innrate_backend::{
    jobs::{
        availability_rollout::run_availability_rollout,
        credential_expiry_scan::run_credential_expiry_scan,
        forecast_refresh::ForecastRefresh,
        rate_plan_rollover::{run_rate_plan_rollover, ROLLOVER_REASON},
    },
    models::{
        availability::AvailabilityRow,
        channel::ChannelKind,
        event::{EventFilter, EventType},
        rate_plan::{
            DynamicRule, DynamicRuleType, NewRateOverride, NewRatePlan, RatePlanType, RuleAdjustment, RuleConditions,
            DYNAMIC_PRICING_REASON,
        },
    },
    services::{alerts::AlertKind, forecast::OccupancyForecastProvider},
    store::Store,
};

use crate::common::{channel, day, start_time, test_app, TestApp, HOTEL, ROOM};

fn plan(name: &str, priority: u8, from: chrono::NaiveDate, to: chrono::NaiveDate) -> NewRatePlan {
    NewRatePlan {
        room_type_id: ROOM.to_string(),
        name: name.to_string(),
        plan_type: RatePlanType::Standard,
        base_rate: dec!(100),
        base_currency: "USD".to_string(),
        valid_from: from,
        valid_to: to,
        day_of_week_rates: None,
        priority,
        blackout_dates: vec![],
    }
}

async fn rate_events(app: &TestApp) -> Vec<innrate_backend::models::event::EventEnvelope> {
    app.state
        .bus
        .list(&EventFilter {
            event_type: Some(EventType::RateUpdate),
            ..Default::default()
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_rollover_deactivates_expired_plans_and_republishes() {
    let app = test_app().await;
    let plans = &app.state.rate_plans;
    let expired = plans
        .create_rate_plan(HOTEL, plan("Spring", 4, day(2025, 3, 1), day(2025, 6, 30)))
        .await
        .unwrap();
    plans
        .create_rate_plan(HOTEL, plan("BAR", 5, day(2025, 1, 1), day(2025, 12, 31)))
        .await
        .unwrap();

    let deactivated = run_rate_plan_rollover(&app.state.store, plans, app.clock_ref(), 7, HOTEL)
        .await
        .unwrap();
    assert_eq!(deactivated, 1);
    let expired = app.store.get_rate_plan(HOTEL, expired.id).await.unwrap().unwrap();
    assert!(!expired.active);

    let rollover: Vec<_> = rate_events(&app)
        .await
        .into_iter()
        .filter(|e| e.reason.as_deref() == Some(ROLLOVER_REASON))
        .collect();
    assert_eq!(rollover.len(), 1);
    match &rollover[0].payload {
        innrate_backend::models::event::EventPayload::Rates { rates } => {
            assert_eq!(rates.len(), 7);
            assert_eq!(rates[0].date, day(2025, 7, 1));
            assert_eq!(rates[6].date, day(2025, 7, 7));
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn test_availability_rollout_seeds_only_missing_rows() {
    let app = test_app().await;
    let mut sold = AvailabilityRow::seeded(HOTEL, ROOM, day(2025, 7, 3), 10, start_time());
    sold.sold_rooms = 4;
    app.store.seed_availability(vec![sold]).await.unwrap();

    let seeded = run_availability_rollout(&app.state.store, app.clock_ref(), 30, HOTEL)
        .await
        .unwrap();
    assert_eq!(seeded, 30);

    let rows = app
        .store
        .list_availability(HOTEL, Some(ROOM), day(2025, 7, 1), day(2025, 7, 31))
        .await
        .unwrap();
    assert_eq!(rows.len(), 31);
    let kept = rows.iter().find(|r| r.date == day(2025, 7, 3)).unwrap();
    assert_eq!(kept.sold_rooms, 4);
    assert!(rows.iter().all(|r| r.total_rooms == 10));

    let again = run_availability_rollout(&app.state.store, app.clock_ref(), 30, HOTEL)
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_credential_scan_alerts_without_secrets() {
    let app = test_app().await;
    let mut expiring = channel("booking", ChannelKind::BookingCom, "https://booking.test");
    expiring.primary_expires_at = Some(start_time() + Duration::days(10));
    app.add_channel(expiring).await;
    let mut later = channel("expedia", ChannelKind::Expedia, "https://expedia.test");
    later.primary_expires_at = Some(start_time() + Duration::days(90));
    app.add_channel(later).await;

    let found = run_credential_expiry_scan(&app.state.registry, &app.state.alerts, app.clock_ref(), 30, HOTEL)
        .await
        .unwrap();
    assert_eq!(found, 1);

    let alerts: Vec<_> = app
        .state
        .alerts
        .recent(Some(HOTEL), 10)
        .into_iter()
        .filter(|a| a.kind == AlertKind::CredentialExpiring)
        .collect();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].channel_id.as_deref(), Some("booking"));
    assert!(!alerts[0].message.contains("s3cret"));
}

#[tokio::test]
async fn test_forecast_refresh_applies_suggestions_around_manual_overrides() {
    let app = test_app().await;
    app.state
        .rate_plans
        .create_rate_plan(HOTEL, plan("BAR", 5, day(2025, 7, 1), day(2025, 12, 31)))
        .await
        .unwrap();
    let busy: Vec<AvailabilityRow> = [5, 6]
        .iter()
        .map(|d| {
            let mut row = AvailabilityRow::seeded(HOTEL, ROOM, day(2025, 7, *d), 10, start_time());
            row.sold_rooms = 9;
            row
        })
        .collect();
    app.store.seed_availability(busy).await.unwrap();
    app.store
        .save_dynamic_rule(DynamicRule {
            id: Uuid::new_v4(),
            hotel_id: HOTEL.to_string(),
            room_type_id: None,
            name: "High occupancy".to_string(),
            rule_type: DynamicRuleType::Occupancy,
            priority: 1,
            conditions: RuleConditions {
                min_occupancy_pct: Some(dec!(80)),
                ..Default::default()
            },
            adjustment: RuleAdjustment::Multiply(dec!(1.2)),
            active: true,
        })
        .await
        .unwrap();
    app.state
        .rate_plans
        .override_rate(
            HOTEL,
            NewRateOverride {
                room_type_id: ROOM.to_string(),
                rate_plan_id: None,
                date: day(2025, 7, 6),
                rate: dec!(95),
                currency: "USD".to_string(),
                reason: "group contract".to_string(),
                approved_by: "gm".to_string(),
            },
        )
        .await
        .unwrap();

    let refresh = ForecastRefresh {
        store: app.state.store.clone(),
        provider: Arc::new(OccupancyForecastProvider::new(app.state.store.clone())),
        forecasts: app.state.forecasts.clone(),
        pricing: app.state.pricing.clone(),
        clock: app.state.clock.clone(),
        horizon_days: 30,
        auto_apply: true,
        max_attempts: 8,
    };
    let cached = refresh.run(HOTEL).await.unwrap();
    assert_eq!(cached, 2);
    assert!(app.state.forecasts.get(HOTEL, ROOM, day(2025, 7, 5)).await.is_some());

    let overrides = app
        .store
        .list_rate_overrides(HOTEL, ROOM, day(2025, 7, 1), day(2025, 7, 31))
        .await
        .unwrap();
    let dynamic: Vec<_> = overrides
        .iter()
        .filter(|o| o.reason == DYNAMIC_PRICING_REASON)
        .collect();
    assert_eq!(dynamic.len(), 1);
    assert_eq!(dynamic[0].date, day(2025, 7, 5));
    assert_eq!(dynamic[0].approved_by, "system");
    assert!(dynamic[0].rate > dec!(100));

    let manual = overrides.iter().find(|o| o.date == day(2025, 7, 6)).unwrap();
    assert_eq!(manual.rate, dec!(95));
    assert!(rate_events(&app)
        .await
        .iter()
        .any(|e| e.reason.as_deref() == Some(DYNAMIC_PRICING_REASON)));
}
