pub mod channels;
pub mod moves;
pub mod sessions;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use crate::{
    common::{ApiError, ChannelId, CoordError, Member, UserId},
    server::AppState,
};

pub(crate) fn error_response(err: ApiError) -> Response {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

pub(crate) fn coord_error(err: &CoordError, path: String) -> Response {
    tracing::debug!("{} failed: {}", path, err);
    error_response(ApiError::from_coord(err, path))
}

/// The member `user` as currently connected to `channel`.
pub(crate) fn member_in(
    state: &AppState,
    channel: ChannelId,
    user: UserId,
    path: &str,
) -> Result<Member, Response> {
    match state.voice.member(user) {
        Some(member) if state.voice.channel_of(user) == Some(channel) => Ok(member),
        _ => Err(error_response(ApiError::bad_request(
            format!("User {} is not connected to channel {}", user, channel),
            path,
        ))),
    }
}
