//! Read-only room introspection

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use roomcast_sfu::{PeerId, RegistryStats, RoomId, RoomStats};
use serde::{Deserialize, Serialize};

use crate::http::{AppError, AppResult, AppState};

pub fn create_rooms_router() -> Router<AppState> {
    Router::new()
        .route("/api/rooms", get(list_rooms))
        .route("/api/rooms/{room_id}", get(get_room))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub peer_count: usize,
    pub peer_ids: Vec<PeerId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomsResponse {
    pub stats: RegistryStats,
    pub rooms: Vec<RoomSummary>,
}

/// `GET /api/rooms`
pub async fn list_rooms(State(state): State<AppState>) -> Json<RoomsResponse> {
    let rooms = state
        .registry
        .room_ids()
        .iter()
        .filter_map(|id| state.registry.room(id))
        .map(|room| {
            let peer_ids = room.peer_ids();
            RoomSummary {
                room_id: room.id.clone(),
                peer_count: peer_ids.len(),
                peer_ids,
                created_at: room.created_at(),
            }
        })
        .collect();

    Json(RoomsResponse {
        stats: state.registry.stats(),
        rooms,
    })
}

/// `GET /api/rooms/{room_id}`
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomStats>> {
    let room = state
        .registry
        .room(&RoomId::from(room_id.as_str()))
        .ok_or_else(|| AppError::not_found(format!("room '{room_id}' not found")))?;
    Ok(Json(room.get_stats()))
}
