use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::{
    batch::Skip,
    common::{ChannelId, Member, SessionId, UserId},
    service::{StatusMessage, VoiceService},
    stick::apply_mute,
    timer::{CancelSignal, Countdown, TickSink},
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteAllReport {
    pub id: SessionId,
    pub channel: ChannelId,
    pub cancelled: bool,
    pub restored: Vec<UserId>,
    pub unreachable: Vec<UserId>,
    pub display_failures: u32,
}

/// One-shot "everyone but me" mute with its own cancel signal.
pub struct MuteAllSession {
    id: SessionId,
    channel: ChannelId,
    initiator: Member,
    secs: u32,
    cancel: CancelSignal,
    /// Everyone to unmute at the end, joiners included.
    tracked: Mutex<HashSet<Member>>,
    /// Set under the `tracked` lock once the closing pass collected it.
    closing: AtomicBool,
}

impl MuteAllSession {
    pub(crate) fn new(channel: ChannelId, initiator: Member, secs: u32) -> Self {
        Self {
            id: SessionId::generate(),
            channel,
            initiator,
            secs,
            cancel: CancelSignal::new(),
            tracked: Mutex::new(HashSet::new()),
            closing: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn initiator(&self) -> &Member {
        &self.initiator
    }

    pub fn secs(&self) -> u32 {
        self.secs
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    pub(crate) fn track(&self, members: impl IntoIterator<Item = Member>) {
        self.tracked.lock().extend(members);
    }

    /// Tracks a joiner unless the closing pass already started.
    pub(crate) fn admit(&self, member: Member) -> bool {
        let mut tracked = self.tracked.lock();
        if self.is_closing() {
            return false;
        }
        tracked.insert(member);
        true
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn untrack(&self, member: &Member) {
        self.tracked.lock().remove(member);
    }

    /// Ends the countdown at its next tick; the unmute pass still runs.
    pub(crate) fn stop(&self) {
        self.cancel.set();
    }

    pub(crate) async fn drive(
        self: Arc<Self>,
        voice: Arc<dyn VoiceService>,
        mut status: StatusMessage,
    ) -> MuteAllReport {
        let outcome = Countdown::new(self.secs)
            .run(&self.cancel, &mut MuteAllDisplay { status: &mut status })
            .await;

        let mut members: Vec<Member> = {
            let tracked = self.tracked.lock();
            self.closing.store(true, Ordering::SeqCst);
            tracked.iter().cloned().collect()
        };
        members.sort_by_key(|m| m.id);

        let report = apply_mute(&*voice, members, &Skip::None, false).await;
        let mut restored: Vec<UserId> = report.succeeded().map(|m| m.id).collect();
        let mut unreachable: Vec<UserId> = report.failed().map(|(m, _)| m.id).collect();
        restored.sort();
        unreachable.sort();

        status.show("Unmuted all users.").await;
        info!(
            channel = %self.channel,
            "Muteall finished ({}), {} restored",
            if outcome.was_cancelled() { "stopped" } else { "elapsed" },
            restored.len()
        );

        MuteAllReport {
            id: self.id.clone(),
            channel: self.channel,
            cancelled: outcome.was_cancelled(),
            restored,
            unreachable,
            display_failures: status.failures(),
        }
    }
}

struct MuteAllDisplay<'a> {
    status: &'a mut StatusMessage,
}

#[async_trait]
impl TickSink for MuteAllDisplay<'_> {
    async fn on_tick(&mut self, remaining: u32) {
        self.status
            .show(&format!("Muted all users for {}s.", remaining))
            .await;
    }
}
