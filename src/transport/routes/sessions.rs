use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;

use crate::{
    common::{ChannelId, UserId},
    server::AppState,
    stick::SessionInfo,
    transport::routes::{coord_error, member_in},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTalkingStick {
    pub initiator: UserId,
    /// Seconds per turn. Clamped to the configured range.
    pub duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipRequest {
    pub voter: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMuteAll {
    pub initiator: UserId,
    pub duration: i64,
}

/// POST /v1/channels/{channelId}/talking-stick
pub async fn start_talking_stick(
    Path(channel): Path<ChannelId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartTalkingStick>,
) -> Response {
    let path = format!("/v1/channels/{}/talking-stick", channel);
    tracing::info!("POST {}", path);

    let initiator = match member_in(&state, channel, body.initiator, &path) {
        Ok(member) => member,
        Err(response) => return response,
    };

    match state
        .coordinator
        .start_talking_stick(channel, initiator, body.duration)
        .await
    {
        Ok(handle) => {
            let info = SessionInfo::from(handle.session().as_ref());
            (StatusCode::CREATED, Json(info)).into_response()
        }
        Err(e) => coord_error(&e, path),
    }
}

/// DELETE /v1/channels/{channelId}/talking-stick
pub async fn stop_talking_stick(
    Path(channel): Path<ChannelId>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.coordinator.stop_talking_stick(channel) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => coord_error(&e, format!("/v1/channels/{}/talking-stick", channel)),
    }
}

/// POST /v1/channels/{channelId}/talking-stick/skip
pub async fn skip_turn(
    Path(channel): Path<ChannelId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<SkipRequest>,
) -> Response {
    let path = format!("/v1/channels/{}/talking-stick/skip", channel);
    let voter = match member_in(&state, channel, body.voter, &path) {
        Ok(member) => member,
        Err(response) => return response,
    };

    match state.coordinator.request_skip(channel, &voter).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => coord_error(&e, path),
    }
}

/// POST /v1/channels/{channelId}/muteall
pub async fn start_muteall(
    Path(channel): Path<ChannelId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartMuteAll>,
) -> Response {
    let path = format!("/v1/channels/{}/muteall", channel);
    tracing::info!("POST {}", path);

    let initiator = match member_in(&state, channel, body.initiator, &path) {
        Ok(member) => member,
        Err(response) => return response,
    };

    match state
        .coordinator
        .start_muteall(channel, initiator, body.duration)
        .await
    {
        Ok(handle) => {
            let info = SessionInfo::from(handle.session().as_ref());
            (StatusCode::CREATED, Json(info)).into_response()
        }
        Err(e) => coord_error(&e, path),
    }
}

/// DELETE /v1/channels/{channelId}/muteall
pub async fn stop_muteall(
    Path(channel): Path<ChannelId>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.coordinator.stop_muteall(channel) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => coord_error(&e, format!("/v1/channels/{}/muteall", channel)),
    }
}

/// POST /v1/channels/{channelId}/unmute-all
pub async fn force_unmute(
    Path(channel): Path<ChannelId>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.coordinator.force_unmute_channel(channel).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => coord_error(&e, format!("/v1/channels/{}/unmute-all", channel)),
    }
}

/// GET /v1/sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.coordinator.active_sessions())
}
