use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{channels, events, hotels, quotes, rates},
    AppState,
};

pub const API_KEY_HEADER: &str = "x-api-key";
const ANONYMOUS_KEY: &str = "anonymous";

/// Counts each request against its API token
async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_KEY)
        .to_string();

    match state.limiter.check(&token).await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

async fn health() -> &'static str {
    "ok"
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/hotels/{hotel_id}", put(hotels::upsert_hotel))
        .route(
            "/api/hotels/{hotel_id}/room-types/{room_type_id}",
            put(hotels::upsert_room_type),
        )
        .route("/api/hotels/{hotel_id}/rate-plans", post(rates::create_rate_plan))
        .route(
            "/api/hotels/{hotel_id}/rate-plans/{plan_id}",
            patch(rates::update_rate_plan),
        )
        .route(
            "/api/hotels/{hotel_id}/rate-plans/{plan_id}/deactivate",
            post(rates::deactivate_rate_plan),
        )
        .route("/api/hotels/{hotel_id}/rate-overrides", post(rates::override_rate))
        .route(
            "/api/hotels/{hotel_id}/rate-overrides/{override_id}",
            delete(rates::delete_rate_override),
        )
        .route("/api/hotels/{hotel_id}/seasonal-rates", post(rates::create_seasonal_rate))
        .route("/api/hotels/{hotel_id}/dynamic-rules", put(rates::upsert_dynamic_rule))
        .route("/api/hotels/{hotel_id}/promo-codes", put(rates::upsert_promo_code))
        .route("/api/hotels/{hotel_id}/rates/bulk", post(rates::bulk_update_rates))
        .route(
            "/api/hotels/{hotel_id}/availability/bulk",
            post(rates::bulk_update_availability),
        )
        .route("/api/hotels/{hotel_id}/quotes/best", post(quotes::get_best_rate))
        .route("/api/hotels/{hotel_id}/quotes/all", post(quotes::get_all_rates))
        .route("/api/hotels/{hotel_id}/quotes/compare", post(quotes::compare_rates))
        .route("/api/hotels/{hotel_id}/distribute", post(channels::distribute_rates))
        .route("/api/hotels/{hotel_id}/channels", get(channels::list_channel_configs))
        .route(
            "/api/hotels/{hotel_id}/channels/{channel_id}",
            put(channels::upsert_channel_config),
        )
        .route(
            "/api/hotels/{hotel_id}/channels/{channel_id}/rotate",
            post(channels::rotate_channel_credential),
        )
        .route(
            "/api/hotels/{hotel_id}/channels/{channel_id}/revoke",
            post(channels::revoke_channel_credential),
        )
        .route(
            "/api/hotels/{hotel_id}/channels/{channel_id}/webhook",
            post(channels::channel_webhook),
        )
        .route(
            "/api/hotels/{hotel_id}/reconciliations/unresolved",
            get(channels::unresolved_reconciliations),
        )
        .route("/api/events", get(events::list_events))
        .route("/api/events/{event_id}", get(events::get_event))
        .route("/api/events/{event_id}/calls", get(events::event_calls))
        .route("/api/events/{event_id}/cancel", post(events::cancel_event))
        .route("/api/events/{event_id}/requeue", post(events::requeue_dead_event))
        .route("/api/alerts", get(events::recent_alerts))
        .route("/api/calls", get(events::recent_calls))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
