use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    common::{ApiError, ChannelId, Member, UserId},
    server::AppState,
    service::VoiceService,
    transport::routes::error_response,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannel {
    pub id: ChannelId,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    #[serde(flatten)]
    pub member: Member,
    pub muted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelView {
    pub id: ChannelId,
    pub name: String,
    pub members: Vec<MemberView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResult {
    pub channel: ChannelId,
    /// Muted on arrival because a session is running there.
    pub muted: bool,
}

/// GET /v1/channels
pub async fn list_channels(State(state): State<Arc<AppState>>) -> Response {
    let channels = match state.voice.voice_channels().await {
        Ok(channels) => channels,
        Err(e) => {
            return error_response(ApiError::bad_gateway(e.to_string(), "/v1/channels"));
        }
    };

    let mut views = Vec::with_capacity(channels.len());
    for channel in channels {
        let members = state
            .voice
            .channel_members(channel.id)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|member| MemberView {
                muted: state.voice.is_muted(member.id),
                member,
            })
            .collect();
        views.push(ChannelView {
            id: channel.id,
            name: channel.name,
            members,
        });
    }
    (StatusCode::OK, Json(views)).into_response()
}

/// POST /v1/channels
pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateChannel>,
) -> Response {
    tracing::info!("POST /v1/channels {} ({})", body.id, body.name);
    state.voice.create_channel(body.id, body.name);
    StatusCode::CREATED.into_response()
}

/// PUT /v1/channels/{channelId}/members
pub async fn join_channel(
    Path(channel): Path<ChannelId>,
    State(state): State<Arc<AppState>>,
    Json(member): Json<Member>,
) -> Response {
    let path = format!("/v1/channels/{}/members", channel);
    if let Err(e) = state.voice.join(channel, member.clone()) {
        return error_response(ApiError::not_found(e.to_string(), path));
    }
    tracing::debug!("{} joined channel {}", member.id, channel);

    let muted = state.coordinator.on_member_joined(channel, member).await;
    (StatusCode::OK, Json(JoinResult { channel, muted })).into_response()
}

/// DELETE /v1/members/{userId}
pub async fn leave_voice(
    Path(user): Path<UserId>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.voice.leave(user) {
        Some(channel) => {
            tracing::debug!("{} left channel {}", user, channel);
            StatusCode::NO_CONTENT.into_response()
        }
        None => error_response(ApiError::not_found(
            format!("User {} is not connected to voice", user),
            format!("/v1/members/{}", user),
        )),
    }
}

/// GET /v1/channels/{channelId}/messages
pub async fn get_messages(
    Path(channel): Path<ChannelId>,
    State(state): State<Arc<AppState>>,
) -> Response {
    (StatusCode::OK, Json(state.voice.messages_in(channel))).into_response()
}
