//! Room REST endpoints.
//!
//! - `GET /api/rooms/:room_id/participants`
//! - `GET /api/rooms/:room_id/messages?limit=&before=`
//!
//! Both answer `{"success": true, "data": {...}}`. An unknown room is not an
//! error: it simply has no participants and no history.

use super::AppState;
use crate::errors::SfuError;
use crate::repositories::ChatMessage;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use common::types::PeerInfo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsData {
    pub room_id: String,
    pub count: usize,
    pub participants: Vec<PeerInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesData {
    pub room_id: String,
    pub count: usize,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
    pub before: Option<DateTime<Utc>>,
}

#[instrument(skip_all, name = "sfu.http.participants", fields(room_id = %room_id))]
pub async fn participants(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<ApiResponse<ParticipantsData>>, SfuError> {
    let participants = state.services.registry.list_peers(&room_id).await?;
    Ok(ApiResponse::ok(ParticipantsData {
        room_id,
        count: participants.len(),
        participants,
    }))
}

#[instrument(skip_all, name = "sfu.http.messages", fields(room_id = %room_id))]
pub async fn messages(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<ApiResponse<MessagesData>>, SfuError> {
    let messages = state
        .services
        .chat
        .history(&room_id, query.limit, query.before)
        .await?;
    Ok(ApiResponse::ok(MessagesData {
        room_id,
        count: messages.len(),
        messages,
    }))
}
