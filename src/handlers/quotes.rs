use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    error::CoreError,
    handlers::response::{ok, ApiResult},
    models::quote::{DateQuote, Quote, RateQuery},
    AppState,
};

/// Longest date list accepted by `compareRates`
const MAX_COMPARE_DATES: usize = 366;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareRatesRequest {
    pub room_type_id: String,
    pub dates: Vec<NaiveDate>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// POST /api/hotels/{hotel_id}/quotes/best
pub async fn get_best_rate(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(query): Json<RateQuery>,
) -> ApiResult<Quote> {
    ok(state.pricing.best_rate(&hotel_id, &query).await?)
}

/// POST /api/hotels/{hotel_id}/quotes/all
pub async fn get_all_rates(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(query): Json<RateQuery>,
) -> ApiResult<Vec<Quote>> {
    ok(state.pricing.all_rates(&hotel_id, &query).await?)
}

/// POST /api/hotels/{hotel_id}/quotes/compare
pub async fn compare_rates(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(request): Json<CompareRatesRequest>,
) -> ApiResult<Vec<DateQuote>> {
    if request.dates.is_empty() {
        return Err(CoreError::Validation("dates cannot be empty".to_string()));
    }
    if request.dates.len() > MAX_COMPARE_DATES {
        return Err(CoreError::Validation(format!(
            "at most {} dates per comparison",
            MAX_COMPARE_DATES
        )));
    }
    ok(state
        .pricing
        .compare_rates(&hotel_id, &request.room_type_id, &request.dates, request.currency.as_deref())
        .await)
}
