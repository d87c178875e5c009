//! Join endpoint: one offer in, one answer out

use axum::{
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Query, State,
    },
    Json,
};
use bytes::Bytes;
use roomcast_sfu::{JoinError, JoinErrorKind, JoinRequest, SessionDescription};
use serde::Deserialize;

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct JoinQuery {
    room: Option<String>,
    peer: Option<String>,
}

/// `POST /join?room=<id>&peer=<id>` with the offer as JSON body
///
/// Parameters are checked before the body is looked at, so a request with
/// both problems reports the missing parameters. Extractor rejections are
/// reported in the same JSON shape as every other join failure.
pub async fn join_room(
    State(state): State<AppState>,
    query: Result<Query<JoinQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<Json<SessionDescription>> {
    let Query(query) = query.map_err(|rejection| {
        JoinError::new(
            JoinErrorKind::MissingParameters,
            format!("invalid query parameters: {}", rejection.body_text()),
        )
    })?;

    let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(room_id), Some(peer_id)) = (non_blank(query.room), non_blank(query.peer)) else {
        return Err(JoinError::new(
            JoinErrorKind::MissingParameters,
            "room and peer query parameters are required",
        )
        .into());
    };

    // An oversized body keeps its own status (413).
    let body = body.map_err(|rejection| AppError {
        status: rejection.status(),
        kind: Some(JoinErrorKind::InvalidOffer.as_str()),
        message: rejection.body_text(),
    })?;

    let offer: SessionDescription = serde_json::from_slice(&body).map_err(|e| {
        JoinError::new(JoinErrorKind::InvalidOffer, format!("invalid offer: {e}"))
    })?;

    let answer = state
        .negotiator
        .join(JoinRequest {
            room_id,
            peer_id,
            offer,
        })
        .await?;

    Ok(Json(answer))
}
