use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{
    handlers::response::{ok, ApiResult},
    models::{
        availability::AvailabilityUpdate,
        rate_plan::{
            DynamicRule, NewDynamicRule, NewRateOverride, NewRatePlan, NewSeasonalRate, PromoCode, RateOverride,
            RatePlan, RatePlanPatch, RateUpdate, SeasonalRate,
        },
    },
    services::batch_writer::BatchResult,
    AppState,
};

/// POST /api/hotels/{hotel_id}/rate-plans
pub async fn create_rate_plan(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(input): Json<NewRatePlan>,
) -> ApiResult<RatePlan> {
    ok(state.rate_plans.create_rate_plan(&hotel_id, input).await?)
}

/// PATCH /api/hotels/{hotel_id}/rate-plans/{plan_id}
pub async fn update_rate_plan(
    State(state): State<AppState>,
    Path((hotel_id, plan_id)): Path<(String, Uuid)>,
    Json(patch): Json<RatePlanPatch>,
) -> ApiResult<RatePlan> {
    ok(state.rate_plans.update_rate_plan(&hotel_id, plan_id, patch).await?)
}

/// POST /api/hotels/{hotel_id}/rate-plans/{plan_id}/deactivate
pub async fn deactivate_rate_plan(
    State(state): State<AppState>,
    Path((hotel_id, plan_id)): Path<(String, Uuid)>,
) -> ApiResult<RatePlan> {
    ok(state.rate_plans.deactivate_rate_plan(&hotel_id, plan_id).await?)
}

/// POST /api/hotels/{hotel_id}/rate-overrides
pub async fn override_rate(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(input): Json<NewRateOverride>,
) -> ApiResult<RateOverride> {
    ok(state.rate_plans.override_rate(&hotel_id, input).await?)
}

/// DELETE /api/hotels/{hotel_id}/rate-overrides/{override_id}
pub async fn delete_rate_override(
    State(state): State<AppState>,
    Path((hotel_id, override_id)): Path<(String, Uuid)>,
) -> ApiResult<RateOverride> {
    ok(state.rate_plans.delete_rate_override(&hotel_id, override_id).await?)
}

/// POST /api/hotels/{hotel_id}/seasonal-rates
pub async fn create_seasonal_rate(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(input): Json<NewSeasonalRate>,
) -> ApiResult<SeasonalRate> {
    ok(state.rate_plans.create_seasonal_rate(&hotel_id, input).await?)
}

/// PUT /api/hotels/{hotel_id}/dynamic-rules
pub async fn upsert_dynamic_rule(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(input): Json<NewDynamicRule>,
) -> ApiResult<DynamicRule> {
    ok(state.rate_plans.upsert_dynamic_rule(&hotel_id, input).await?)
}

/// PUT /api/hotels/{hotel_id}/promo-codes
pub async fn upsert_promo_code(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(promo): Json<PromoCode>,
) -> ApiResult<PromoCode> {
    ok(state.rate_plans.upsert_promo_code(&hotel_id, promo).await?)
}

/// POST /api/hotels/{hotel_id}/rates/bulk
///
/// Partial success still answers 200; the body carries the per-item errors.
pub async fn bulk_update_rates(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(updates): Json<Vec<RateUpdate>>,
) -> ApiResult<BatchResult> {
    tracing::info!(%hotel_id, items = updates.len(), "Bulk rate update received");
    ok(state.batch.apply_rates(&hotel_id, updates).await)
}

/// POST /api/hotels/{hotel_id}/availability/bulk
pub async fn bulk_update_availability(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(updates): Json<Vec<AvailabilityUpdate>>,
) -> ApiResult<BatchResult> {
    tracing::info!(%hotel_id, items = updates.len(), "Bulk availability update received");
    ok(state.batch.apply_availability(&hotel_id, updates).await)
}
