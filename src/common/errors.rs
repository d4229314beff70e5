use serde::Serialize;
use thiserror::Error;

use crate::common::types::{ChannelId, MessageId, UserId, now_ms};

/// Failures reported by the voice and message collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("member {0} is not connected to voice")]
    MemberNotFound(UserId),

    #[error("voice channel {0} does not exist")]
    ChannelNotFound(ChannelId),

    #[error("message {0} does not exist")]
    MessageNotFound(MessageId),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Errors surfaced by the coordination layer.
#[derive(Error, Debug)]
pub enum CoordError {
    #[error("a session is already active in channel {0}")]
    SessionAlreadyActive(ChannelId),

    #[error("no session is active in channel {0}")]
    NoActiveSession(ChannelId),

    #[error("participant {user} is unreachable: {source}")]
    ParticipantUnreachable {
        user: UserId,
        #[source]
        source: ServiceError,
    },

    #[error("status display unavailable: {0}")]
    DisplayUnavailable(#[source] ServiceError),

    #[error("no voice channel matches {0:?}")]
    ChannelNotFound(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub type CoordResult<T> = std::result::Result<T, CoordError>;

/// JSON error body returned by the HTTP layer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub status: u16,
    /// Reason phrase (e.g. "Conflict").
    pub error: String,
    pub message: String,
    pub path: String,
}

impl ApiError {
    pub fn new(
        status: u16,
        error: impl Into<String>,
        message: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: now_ms(),
            status,
            error: error.into(),
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(400, "Bad Request", message, path)
    }

    pub fn not_found(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(404, "Not Found", message, path)
    }

    pub fn conflict(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(409, "Conflict", message, path)
    }

    pub fn bad_gateway(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(502, "Bad Gateway", message, path)
    }

    /// Maps a coordination error onto the matching HTTP error body.
    pub fn from_coord(err: &CoordError, path: impl Into<String>) -> Self {
        let message = err.to_string();
        match err {
            CoordError::SessionAlreadyActive(_) => Self::conflict(message, path),
            CoordError::NoActiveSession(_) | CoordError::ChannelNotFound(_) => {
                Self::not_found(message, path)
            }
            CoordError::Service(ServiceError::ChannelNotFound(_))
            | CoordError::Service(ServiceError::MemberNotFound(_)) => {
                Self::not_found(message, path)
            }
            CoordError::ParticipantUnreachable { .. }
            | CoordError::DisplayUnavailable(_)
            | CoordError::Service(_) => Self::bad_gateway(message, path),
        }
    }
}
