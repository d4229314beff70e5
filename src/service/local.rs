use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    common::{ChannelId, Member, MessageId, ServiceError, UserId},
    service::{MessageHandle, MessageService, VoiceChannel, VoiceService},
};

struct LocalChannel {
    name: String,
    /// Join order.
    members: Vec<Member>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMessage {
    pub id: MessageId,
    pub channel: ChannelId,
    /// Current rendering.
    pub text: String,
    /// Every rendering, oldest first.
    pub history: Vec<String>,
}

/// In-process voice platform and text surface.
///
/// Mute state lives on the user, not the channel, the same way a server
/// mute survives channel hops. Mute calls against someone who is not in any
/// channel fail, which is how a departure surfaces to the coordinator.
pub struct LocalVoice {
    channels: DashMap<ChannelId, LocalChannel>,
    locations: DashMap<UserId, ChannelId>,
    muted: DashMap<UserId, bool>,
    rejected: DashMap<UserId, ()>,
    messages: Mutex<Vec<LocalMessage>>,
    display_available: AtomicBool,
    mute_calls: AtomicUsize,
    /// Round trip of a mute call, applied before the change lands.
    mute_delay_ms: AtomicU64,
}

impl Default for LocalVoice {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalVoice {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            locations: DashMap::new(),
            muted: DashMap::new(),
            rejected: DashMap::new(),
            messages: Mutex::new(Vec::new()),
            display_available: AtomicBool::new(true),
            mute_calls: AtomicUsize::new(0),
            mute_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates (or renames) a voice channel.
    pub fn create_channel(&self, id: ChannelId, name: impl Into<String>) {
        let name = name.into();
        self.channels
            .entry(id)
            .and_modify(|c| c.name = name.clone())
            .or_insert_with(|| LocalChannel {
                name,
                members: Vec::new(),
            });
    }

    /// Puts `member` into `channel`, leaving whatever channel they were in.
    pub fn join(&self, channel: ChannelId, member: Member) -> Result<(), ServiceError> {
        if !self.channels.contains_key(&channel) {
            return Err(ServiceError::ChannelNotFound(channel));
        }
        self.leave(member.id);

        if let Some(mut entry) = self.channels.get_mut(&channel) {
            entry.members.push(member.clone());
        }
        self.locations.insert(member.id, channel);
        Ok(())
    }

    /// Removes a user from voice. Returns the channel they were in.
    pub fn leave(&self, user: UserId) -> Option<ChannelId> {
        let (_, channel) = self.locations.remove(&user)?;
        if let Some(mut entry) = self.channels.get_mut(&channel) {
            entry.members.retain(|m| m.id != user);
        }
        Some(channel)
    }

    pub fn channel_of(&self, user: UserId) -> Option<ChannelId> {
        self.locations.get(&user).map(|c| *c)
    }

    pub fn member(&self, user: UserId) -> Option<Member> {
        let channel = self.channel_of(user)?;
        let entry = self.channels.get(&channel)?;
        entry.members.iter().find(|m| m.id == user).cloned()
    }

    pub fn is_muted(&self, user: UserId) -> bool {
        self.muted.get(&user).map(|m| *m).unwrap_or(false)
    }

    pub fn muted_users(&self) -> HashSet<UserId> {
        self.muted
            .iter()
            .filter(|e| *e.value())
            .map(|e| *e.key())
            .collect()
    }

    /// Makes every future mute call for `user` fail while they stay connected.
    pub fn reject_mutes_for(&self, user: UserId) {
        self.rejected.insert(user, ());
    }

    pub fn set_display_available(&self, available: bool) {
        self.display_available.store(available, Ordering::SeqCst);
    }

    /// Makes every later mute call take `delay` before it applies.
    pub fn set_mute_delay(&self, delay: Duration) {
        self.mute_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn mute_calls(&self) -> usize {
        self.mute_calls.load(Ordering::SeqCst)
    }

    pub fn messages_in(&self, channel: ChannelId) -> Vec<LocalMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }

    fn check_display(&self) -> Result<(), ServiceError> {
        if self.display_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::Rejected("message service unavailable".into()))
        }
    }
}

#[async_trait]
impl VoiceService for LocalVoice {
    async fn channel_members(&self, channel: ChannelId) -> Result<Vec<Member>, ServiceError> {
        self.channels
            .get(&channel)
            .map(|c| c.members.clone())
            .ok_or(ServiceError::ChannelNotFound(channel))
    }

    async fn set_mute(&self, member: &Member, muted: bool) -> Result<(), ServiceError> {
        self.mute_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.mute_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !self.locations.contains_key(&member.id) {
            return Err(ServiceError::MemberNotFound(member.id));
        }
        if self.rejected.contains_key(&member.id) {
            return Err(ServiceError::Rejected(format!(
                "missing permissions to mute {}",
                member.id
            )));
        }
        self.muted.insert(member.id, muted);
        Ok(())
    }

    async fn voice_channels(&self) -> Result<Vec<VoiceChannel>, ServiceError> {
        let mut channels: Vec<VoiceChannel> = self
            .channels
            .iter()
            .map(|e| VoiceChannel {
                id: *e.key(),
                name: e.value().name.clone(),
            })
            .collect();
        channels.sort_by_key(|c| c.id);
        Ok(channels)
    }

    async fn move_member(&self, member: &Member, to: ChannelId) -> Result<(), ServiceError> {
        if !self.locations.contains_key(&member.id) {
            return Err(ServiceError::MemberNotFound(member.id));
        }
        let current = self.member(member.id).unwrap_or_else(|| member.clone());
        self.join(to, current)
    }
}

#[async_trait]
impl MessageService for LocalVoice {
    async fn send_message(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> Result<MessageHandle, ServiceError> {
        self.check_display()?;
        let id = MessageId::generate();
        self.messages.lock().push(LocalMessage {
            id,
            channel,
            text: text.to_string(),
            history: vec![text.to_string()],
        });
        Ok(MessageHandle { id, channel })
    }

    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> Result<(), ServiceError> {
        self.check_display()?;
        let mut messages = self.messages.lock();
        let message = messages
            .iter_mut()
            .find(|m| m.id == handle.id)
            .ok_or(ServiceError::MessageNotFound(handle.id))?;
        message.text = text.to_string();
        message.history.push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn voice_with_room() -> LocalVoice {
        let voice = LocalVoice::new();
        voice.create_channel(ChannelId(1), "General");
        voice.create_channel(ChannelId(2), "AFK");
        voice.join(ChannelId(1), Member::new(10, "alice")).unwrap();
        voice.join(ChannelId(1), Member::new(11, "bob")).unwrap();
        voice
    }

    #[tokio::test]
    async fn test_membership_keeps_join_order() {
        let voice = voice_with_room();
        let members = voice.channel_members(ChannelId(1)).await.unwrap();
        let ids: Vec<u64> = members.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![10, 11]);
        assert_eq!(
            voice.channel_members(ChannelId(9)).await,
            Err(ServiceError::ChannelNotFound(ChannelId(9)))
        );
    }

    #[tokio::test]
    async fn test_mute_fails_after_leaving() {
        let voice = voice_with_room();
        let bob = Member::new(11, "bob");
        voice.set_mute(&bob, true).await.unwrap();
        assert!(voice.is_muted(bob.id));

        assert_eq!(voice.leave(bob.id), Some(ChannelId(1)));
        assert_eq!(
            voice.set_mute(&bob, false).await,
            Err(ServiceError::MemberNotFound(bob.id))
        );
        assert!(voice.is_muted(bob.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_delay_applies_late() {
        let voice = Arc::new(voice_with_room());
        voice.set_mute_delay(Duration::from_millis(500));
        let bob = Member::new(11, "bob");

        let call = tokio::spawn({
            let voice = voice.clone();
            let bob = bob.clone();
            async move { voice.set_mute(&bob, true).await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!voice.is_muted(bob.id));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(voice.is_muted(bob.id));
        assert_eq!(call.await.unwrap(), Ok(()));
        assert_eq!(voice.mute_calls(), 1);
    }

    #[tokio::test]
    async fn test_move_member_between_channels() {
        let voice = voice_with_room();
        let alice = Member::new(10, "alice");
        voice.move_member(&alice, ChannelId(2)).await.unwrap();

        assert_eq!(voice.channel_of(alice.id), Some(ChannelId(2)));
        assert_eq!(voice.channel_members(ChannelId(1)).await.unwrap().len(), 1);
        assert!(voice.move_member(&alice, ChannelId(5)).await.is_err());
    }
}
