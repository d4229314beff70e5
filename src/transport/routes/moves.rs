use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    channel::MoveReport,
    common::{ApiError, ChannelId, UserId},
    server::AppState,
    transport::routes::{coord_error, error_response},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub members: Vec<UserId>,
    /// Channel name, matched loosely.
    pub target: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveAllRequest {
    pub target: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResult {
    pub summary: String,
    #[serde(flatten)]
    pub report: MoveReport,
}

/// Moved members land muted if a session runs in the target channel.
async fn finish_move(state: &AppState, report: MoveReport) -> Response {
    for member in &report.moved {
        state
            .coordinator
            .on_member_joined(report.target.id, member.clone())
            .await;
    }
    let result = MoveResult {
        summary: report.summary(),
        report,
    };
    (StatusCode::OK, Json(result)).into_response()
}

/// POST /v1/channels/{channelId}/move
pub async fn move_members(
    Path(channel): Path<ChannelId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<MoveRequest>,
) -> Response {
    let path = format!("/v1/channels/{}/move", channel);
    tracing::info!("POST {} -> {:?}", path, body.target);

    let mut members = Vec::with_capacity(body.members.len());
    for user in body.members {
        match state.voice.member(user) {
            Some(member) => members.push(member),
            None => {
                return error_response(ApiError::bad_request(
                    format!("User {} is not connected to voice", user),
                    path,
                ));
            }
        }
    }

    match state.coordinator.move_members(members, &body.target).await {
        Ok(report) => finish_move(&state, report).await,
        Err(e) => coord_error(&e, path),
    }
}

/// POST /v1/channels/{channelId}/moveall
pub async fn move_all(
    Path(channel): Path<ChannelId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<MoveAllRequest>,
) -> Response {
    let path = format!("/v1/channels/{}/moveall", channel);
    tracing::info!("POST {} -> {:?}", path, body.target);

    match state.coordinator.move_all(channel, &body.target).await {
        Ok(report) => finish_move(&state, report).await,
        Err(e) => coord_error(&e, path),
    }
}
