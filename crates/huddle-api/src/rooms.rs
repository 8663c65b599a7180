use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use huddle_gateway::validate;
use huddle_types::models::RoomPublic;

use crate::auth::AppState;

/// Public rooms, most recently active first.
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomPublic>> {
    Json(state.gateway.registry().list_public().await)
}

/// Summary of any live room by join code. Knowing the code is the invite.
pub async fn get_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<RoomPublic>, StatusCode> {
    let code = validate::room_code(&code).map_err(|_| StatusCode::BAD_REQUEST)?;
    let room = state
        .gateway
        .registry()
        .lookup(&code)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(room.summary()))
}
