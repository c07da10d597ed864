use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    handlers::response::{ok, ApiResult},
    models::hotel::{Hotel, RoomType},
    AppState,
};

/// PUT /api/hotels/{hotel_id}
pub async fn upsert_hotel(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(mut hotel): Json<Hotel>,
) -> ApiResult<Hotel> {
    hotel.id = hotel_id;
    ok(state.rate_plans.upsert_hotel(hotel).await?)
}

/// PUT /api/hotels/{hotel_id}/room-types/{room_type_id}
pub async fn upsert_room_type(
    State(state): State<AppState>,
    Path((hotel_id, room_type_id)): Path<(String, String)>,
    Json(mut room_type): Json<RoomType>,
) -> ApiResult<RoomType> {
    room_type.code = room_type_id;
    ok(state.rate_plans.upsert_room_type(&hotel_id, room_type).await?)
}
