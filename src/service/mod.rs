//! Collaborator seams: the voice platform (membership, mute, move) and the
//! text surface used to render session status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{ChannelId, Member, MessageId, ServiceError};

pub mod local;
pub mod status;

pub use local::LocalVoice;
pub use status::StatusMessage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceChannel {
    pub id: ChannelId,
    pub name: String,
}

/// Handle to a posted status message, used for subsequent edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHandle {
    pub id: MessageId,
    pub channel: ChannelId,
}

#[async_trait]
pub trait VoiceService: Send + Sync {
    /// Current members of a voice channel.
    async fn channel_members(&self, channel: ChannelId) -> Result<Vec<Member>, ServiceError>;

    /// Server-side mute. Fails when the member has left voice.
    async fn set_mute(&self, member: &Member, muted: bool) -> Result<(), ServiceError>;

    async fn voice_channels(&self) -> Result<Vec<VoiceChannel>, ServiceError>;

    async fn move_member(&self, member: &Member, to: ChannelId) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait MessageService: Send + Sync {
    async fn send_message(&self, channel: ChannelId, text: &str)
    -> Result<MessageHandle, ServiceError>;

    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> Result<(), ServiceError>;
}
