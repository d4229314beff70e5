//! Bulk member moves between voice channels.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    batch::{self, Skip},
    common::{ChannelId, CoordError, CoordResult, Member, UserId},
    service::{VoiceChannel, VoiceService},
};

pub mod resolve;

pub use resolve::{levenshtein, normalize, resolve};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveReport {
    pub target: VoiceChannel,
    pub moved: Vec<Member>,
    pub failed: Vec<UserId>,
}

impl MoveReport {
    /// The reply shown to whoever issued the move.
    pub fn summary(&self) -> String {
        if self.moved.is_empty() {
            return "No members to move.".to_string();
        }
        let names: Vec<&str> = self.moved.iter().map(|m| m.display_name.as_str()).collect();
        format!("Moved {} to {}", names.join(", "), self.target.name)
    }
}

async fn resolve_target(voice: &dyn VoiceService, query: &str) -> CoordResult<VoiceChannel> {
    let channels = voice.voice_channels().await?;
    resolve(&channels, query)
        .cloned()
        .ok_or_else(|| CoordError::ChannelNotFound(query.to_string()))
}

async fn move_batch(
    voice: &dyn VoiceService,
    members: Vec<Member>,
    target: VoiceChannel,
) -> MoveReport {
    let to = target.id;
    let report = batch::run(members, &Skip::None, |member: Member| async move {
        voice.move_member(&member, to).await
    })
    .await;

    let moved: Vec<Member> = report.succeeded().cloned().collect();
    let failed: Vec<UserId> = report
        .failed()
        .map(|(member, e)| {
            warn!(user = %member.id, "Could not move member: {}", e);
            member.id
        })
        .collect();

    info!(
        channel = %to,
        "Moved {} member(s) to {}, {} failed",
        moved.len(),
        target.name,
        failed.len()
    );
    MoveReport {
        target,
        moved,
        failed,
    }
}

/// Moves `members` (first occurrence of each) to the channel best matching
/// `target`. Members who cannot be moved are left out of the report.
pub async fn move_members(
    voice: &dyn VoiceService,
    members: Vec<Member>,
    target: &str,
) -> CoordResult<MoveReport> {
    let target = resolve_target(voice, target).await?;

    let mut seen = HashSet::new();
    let members: Vec<Member> = members
        .into_iter()
        .filter(|m| seen.insert(m.id))
        .collect();

    Ok(move_batch(voice, members, target).await)
}

/// Moves every member of `from` to the channel best matching `target`.
pub async fn move_all(
    voice: &dyn VoiceService,
    from: ChannelId,
    target: &str,
) -> CoordResult<MoveReport> {
    let target = resolve_target(voice, target).await?;
    let members = voice.channel_members(from).await?;
    Ok(move_batch(voice, members, target).await)
}
