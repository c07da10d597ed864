use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::CoreError,
    handlers::response::{ok, ApiResult},
    models::event::{EventEnvelope, EventFilter},
    services::{alerts::Alert, distributor::CallRecord},
    AppState,
};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentQuery {
    #[serde(default)]
    pub hotel_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// GET /api/events
pub async fn list_events(
    State(state): State<AppState>,
    Query(mut filter): Query<EventFilter>,
) -> ApiResult<Vec<EventEnvelope>> {
    filter.limit = Some(clamp_limit(filter.limit));
    ok(state.bus.list(&filter).await?)
}

/// GET /api/events/{event_id}
pub async fn get_event(State(state): State<AppState>, Path(event_id): Path<Uuid>) -> ApiResult<EventEnvelope> {
    let event = state
        .bus
        .get(event_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("event {}", event_id)))?;
    ok(event)
}

/// GET /api/events/{event_id}/calls
pub async fn event_calls(State(state): State<AppState>, Path(event_id): Path<Uuid>) -> ApiResult<Vec<CallRecord>> {
    ok(state.distributor.call_log().for_event(event_id))
}

/// POST /api/events/{event_id}/cancel
pub async fn cancel_event(State(state): State<AppState>, Path(event_id): Path<Uuid>) -> ApiResult<EventEnvelope> {
    ok(state.bus.cancel(event_id).await?)
}

/// POST /api/events/{event_id}/requeue
pub async fn requeue_dead_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<EventEnvelope> {
    ok(state.bus.requeue_dead(event_id).await?)
}

/// GET /api/alerts
pub async fn recent_alerts(State(state): State<AppState>, Query(query): Query<RecentQuery>) -> ApiResult<Vec<Alert>> {
    ok(state
        .alerts
        .recent(query.hotel_id.as_deref(), clamp_limit(query.limit)))
}

/// GET /api/calls
pub async fn recent_calls(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Vec<CallRecord>> {
    let calls = state
        .distributor
        .call_log()
        .recent(clamp_limit(query.limit))
        .into_iter()
        .filter(|c| query.hotel_id.as_deref().is_none_or(|h| c.hotel_id == h))
        .collect();
    ok(calls)
}
