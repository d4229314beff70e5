//! Talking-stick and muteall sessions, keyed by voice channel.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    batch::{self, BatchReport, Skip},
    channel::{self, MoveReport},
    common::{ChannelId, CoordError, CoordResult, Member, ServiceError, SessionId, UserId},
    configs::StickConfig,
    service::{MessageService, StatusMessage, VoiceService},
    vote::{GateState, VoteGate, VoteOutcome, votes_needed},
};

pub mod muteall;
pub mod queue;
pub mod session;

pub use muteall::{MuteAllReport, MuteAllSession};
pub use queue::TurnQueue;
pub use session::{SessionReport, SessionState, StickSession, TurnRecord};

/// Sets the server mute of every member not in `skip`, concurrently.
pub(crate) async fn apply_mute(
    voice: &dyn VoiceService,
    members: impl IntoIterator<Item = Member>,
    skip: &Skip<Member>,
    muted: bool,
) -> BatchReport<Member, (), ServiceError> {
    batch::run(members, skip, |member: Member| async move {
        voice.set_mute(&member, muted).await
    })
    .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionKind {
    TalkingStick,
    MuteAll,
}

/// Point-in-time view of a running session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub channel: ChannelId,
    pub kind: SessionKind,
    pub initiator: Member,
    pub holder: Option<Member>,
    pub queued: Vec<Member>,
    pub secs: u32,
    pub draining: bool,
}

impl From<&StickSession> for SessionInfo {
    fn from(s: &StickSession) -> Self {
        Self {
            id: s.id().clone(),
            channel: s.channel(),
            kind: SessionKind::TalkingStick,
            initiator: s.initiator().clone(),
            holder: s.holder(),
            queued: s.queued(),
            secs: s.turn_secs(),
            draining: s.is_draining(),
        }
    }
}

impl From<&MuteAllSession> for SessionInfo {
    fn from(s: &MuteAllSession) -> Self {
        Self {
            id: s.id().clone(),
            channel: s.channel(),
            kind: SessionKind::MuteAll,
            initiator: s.initiator().clone(),
            holder: Some(s.initiator().clone()),
            queued: Vec::new(),
            secs: s.secs(),
            draining: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub channel: ChannelId,
    pub restored: Vec<UserId>,
    pub unreachable: Vec<UserId>,
}

pub struct StickHandle {
    session: Arc<StickSession>,
    task: JoinHandle<SessionReport>,
}

impl StickHandle {
    pub fn session(&self) -> &Arc<StickSession> {
        &self.session
    }

    /// Waits for the session to be destroyed.
    pub async fn join(self) -> Result<SessionReport, JoinError> {
        self.task.await
    }
}

pub struct MuteAllHandle {
    session: Arc<MuteAllSession>,
    task: JoinHandle<MuteAllReport>,
}

impl MuteAllHandle {
    pub fn session(&self) -> &Arc<MuteAllSession> {
        &self.session
    }

    pub async fn join(self) -> Result<MuteAllReport, JoinError> {
        self.task.await
    }
}

/// Entry point for the command layer.
///
/// At most one talking stick and one muteall run per channel; independent
/// channels never share state.
#[derive(Clone)]
pub struct Coordinator {
    voice: Arc<dyn VoiceService>,
    messages: Arc<dyn MessageService>,
    config: StickConfig,
    sticks: Arc<DashMap<ChannelId, Arc<StickSession>>>,
    mutes: Arc<DashMap<ChannelId, Arc<MuteAllSession>>>,
}

impl Coordinator {
    pub fn new(
        voice: Arc<dyn VoiceService>,
        messages: Arc<dyn MessageService>,
        config: StickConfig,
    ) -> Self {
        Self {
            voice,
            messages,
            config,
            sticks: Arc::new(DashMap::new()),
            mutes: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &StickConfig {
        &self.config
    }

    pub fn talking_stick(&self, channel: ChannelId) -> Option<Arc<StickSession>> {
        self.sticks.get(&channel).map(|s| s.value().clone())
    }

    pub fn muteall(&self, channel: ChannelId) -> Option<Arc<MuteAllSession>> {
        self.mutes.get(&channel).map(|s| s.value().clone())
    }

    fn running_stick(&self, channel: ChannelId) -> CoordResult<Arc<StickSession>> {
        self.talking_stick(channel)
            .filter(|s| s.state() == SessionState::Running)
            .ok_or(CoordError::NoActiveSession(channel))
    }

    /// Mutes everyone but `initiator`, hands them the stick and spawns the
    /// turn loop. Returns once the initial mute pass has settled.
    pub async fn start_talking_stick(
        &self,
        channel: ChannelId,
        initiator: Member,
        turn_secs: Option<i64>,
    ) -> CoordResult<StickHandle> {
        let turn_secs = self.config.clamp_turn(turn_secs);
        let session = Arc::new(StickSession::new(channel, initiator.clone(), turn_secs));

        match self.sticks.entry(channel) {
            Entry::Occupied(_) => {
                debug!(channel = %channel, "Rejected talking stick: already active");
                return Err(CoordError::SessionAlreadyActive(channel));
            }
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
            }
        }

        let members = match self.voice.channel_members(channel).await {
            Ok(members) => members,
            Err(e) => {
                self.sticks
                    .remove_if(&channel, |_, s| Arc::ptr_eq(s, &session));
                return Err(e.into());
            }
        };

        session.begin(&members);
        info!(
            channel = %channel,
            user = %initiator.id,
            session = %session.id(),
            "Talking stick started: {} member(s), {}s turns",
            members.len(),
            turn_secs
        );

        let report = apply_mute(&*self.voice, members, &Skip::One(initiator.clone()), true).await;
        for (member, e) in report.into_failed() {
            session.drop_participant(&member, &e);
        }

        let status = StatusMessage::post(
            self.messages.clone(),
            channel,
            &format!("{} has the talking stick.", initiator.display_name),
        )
        .await;

        let registry = self.sticks.clone();
        let voice = self.voice.clone();
        let driven = session.clone();
        let span = info_span!("stick", channel = %channel, session = %session.id());
        let task = tokio::spawn(
            async move {
                let report = driven.clone().drive(voice, status).await;
                registry.remove_if(&channel, |_, s| Arc::ptr_eq(s, &driven));
                report
            }
            .instrument(span),
        );

        Ok(StickHandle { session, task })
    }

    /// Votes to cut the current turn short, opening the vote if needed.
    pub async fn request_skip(&self, channel: ChannelId, voter: &Member) -> CoordResult<VoteOutcome> {
        let session = self.running_stick(channel)?;
        if session.is_draining() || !session.is_turn_open() {
            return Ok(VoteOutcome::Closed);
        }

        let pending = session
            .current_vote()
            .filter(|g| g.state() != GateState::Expired);

        let gate = match pending {
            Some(gate) => gate,
            None => {
                let member_count = match self.voice.channel_members(channel).await {
                    Ok(members) => members.len(),
                    Err(e) => {
                        warn!(channel = %channel, "Sizing skip vote from snapshot: {}", e);
                        session.snapshot().len()
                    }
                };
                let Some((gate, opened)) =
                    session.vote_for_turn(votes_needed(member_count), self.config.vote_timeout())
                else {
                    return Ok(VoteOutcome::Closed);
                };
                if opened {
                    info!(
                        channel = %channel,
                        user = %voter.id,
                        "Skip vote opened, {} vote(s) needed",
                        gate.votes_needed()
                    );
                    self.spawn_vote_display(channel, session.holder(), gate.clone());
                }
                gate
            }
        };

        let outcome = gate.cast(voter.id);
        match outcome {
            VoteOutcome::ThresholdReached => {
                info!(channel = %channel, "Skip vote passed, ending the current turn")
            }
            _ => debug!(channel = %channel, user = %voter.id, "Skip vote: {:?}", outcome),
        }
        Ok(outcome)
    }

    fn spawn_vote_display(&self, channel: ChannelId, holder: Option<Member>, gate: Arc<VoteGate>) {
        let messages = self.messages.clone();
        let target = holder
            .map(|h| h.display_name)
            .unwrap_or_else(|| "current user".to_string());
        let span = info_span!("skip_vote", channel = %channel);

        tokio::spawn(
            async move {
                let needed = gate.votes_needed();
                let mut tally = gate.subscribe_tally();
                let mut status = StatusMessage::post(
                    messages,
                    channel,
                    &format!("Vote to skip {}. Need {} votes to skip.", target, needed),
                )
                .await;

                let result = loop {
                    tokio::select! {
                        state = gate.wait() => break state,
                        changed = tally.changed() => {
                            if changed.is_err() {
                                break gate.wait().await;
                            }
                            let votes = *tally.borrow_and_update();
                            status
                                .show(&format!("Vote to skip {}. {}/{} votes.", target, votes, needed))
                                .await;
                        }
                    }
                };

                let text = match result {
                    GateState::Passed => "Skipping user.",
                    _ => "Not enough votes to skip user.",
                };
                status.show(text).await;
            }
            .instrument(span),
        );
    }

    /// Drains the queue with zero-length turns so everyone ends up unmuted.
    pub fn stop_talking_stick(&self, channel: ChannelId) -> CoordResult<()> {
        let session = self.running_stick(channel)?;
        info!(channel = %channel, session = %session.id(), "Talking stick teardown requested");
        session.request_drain();
        Ok(())
    }

    /// Mutes everyone but `initiator` for `secs`, then unmutes everyone.
    pub async fn start_muteall(
        &self,
        channel: ChannelId,
        initiator: Member,
        secs: i64,
    ) -> CoordResult<MuteAllHandle> {
        let secs = self.config.clamp_muteall(secs);
        let session = Arc::new(MuteAllSession::new(channel, initiator.clone(), secs));

        match self.mutes.entry(channel) {
            Entry::Occupied(_) => return Err(CoordError::SessionAlreadyActive(channel)),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
            }
        }

        let members = match self.voice.channel_members(channel).await {
            Ok(members) => members,
            Err(e) => {
                self.mutes.remove_if(&channel, |_, s| Arc::ptr_eq(s, &session));
                return Err(e.into());
            }
        };

        session.track(members.iter().cloned());
        info!(
            channel = %channel,
            user = %initiator.id,
            "Muteall started for {}s over {} member(s)",
            secs,
            members.len()
        );

        let report = apply_mute(&*self.voice, members, &Skip::One(initiator), true).await;
        for (member, e) in report.into_failed() {
            warn!(channel = %channel, user = %member.id, "Muteall could not mute: {}", e);
            session.untrack(&member);
        }

        let status = StatusMessage::post(self.messages.clone(), channel, "Muted all users.").await;

        let registry = self.mutes.clone();
        let voice = self.voice.clone();
        let driven = session.clone();
        let span = info_span!("muteall", channel = %channel, session = %session.id());
        let task = tokio::spawn(
            async move {
                let report = driven.clone().drive(voice, status).await;
                registry.remove_if(&channel, |_, s| Arc::ptr_eq(s, &driven));
                report
            }
            .instrument(span),
        );

        Ok(MuteAllHandle { session, task })
    }

    pub fn stop_muteall(&self, channel: ChannelId) -> CoordResult<()> {
        let session = self
            .muteall(channel)
            .ok_or(CoordError::NoActiveSession(channel))?;
        session.stop();
        Ok(())
    }

    /// Mutes a member who entered a channel with an active session.
    /// Returns whether the member stays muted.
    ///
    /// Each session admits the member before the mute, so its closing
    /// unmute pass covers them. A session that started closing meanwhile
    /// no longer admits anyone, and a mute that lands after every session
    /// closed is undone here.
    pub async fn on_member_joined(&self, channel: ChannelId, member: Member) -> bool {
        let stick = self
            .running_stick(channel)
            .ok()
            .filter(|s| s.admit(&member));
        let muteall = self
            .muteall(channel)
            .filter(|m| *m.initiator() != member && m.admit(member.clone()));
        if stick.is_none() && muteall.is_none() {
            return false;
        }

        if let Err(e) = self.voice.set_mute(&member, true).await {
            warn!(channel = %channel, user = %member.id, "Could not mute joiner: {}", e);
            if let Some(session) = &stick {
                session.drop_participant(&member, &e);
            }
            if let Some(session) = &muteall {
                session.untrack(&member);
            }
            return false;
        }

        let covered = stick
            .as_ref()
            .is_some_and(|s| s.state() == SessionState::Running)
            || muteall.as_ref().is_some_and(|m| !m.is_closing());
        if !covered {
            debug!(channel = %channel, user = %member.id, "Session closed during join, unmuting");
            if let Err(e) = self.voice.set_mute(&member, false).await {
                warn!(channel = %channel, user = %member.id, "Could not unmute joiner: {}", e);
            }
            return false;
        }

        debug!(channel = %channel, user = %member.id, "Muted joiner");
        true
    }

    /// Unmutes every current member of `channel`, whatever state any
    /// session is in. Recovery for sessions that never finished.
    pub async fn force_unmute_channel(&self, channel: ChannelId) -> CoordResult<RecoveryReport> {
        let members = self.voice.channel_members(channel).await?;
        let report = apply_mute(&*self.voice, members, &Skip::None, false).await;

        let restored = report.succeeded().map(|m| m.id).collect();
        let unreachable: Vec<UserId> = report.failed().map(|(m, _)| m.id).collect();
        info!(
            channel = %channel,
            "Force-unmuted channel, {} unreachable",
            unreachable.len()
        );

        Ok(RecoveryReport {
            channel,
            restored,
            unreachable,
        })
    }

    /// Drains every talking stick and stops every muteall. Returns how many
    /// sessions were signalled.
    pub fn stop_all(&self) -> usize {
        let mut signalled = 0;
        for entry in self.sticks.iter() {
            if entry.value().state() == SessionState::Running && !entry.value().is_draining() {
                entry.value().request_drain();
                signalled += 1;
            }
        }
        for entry in self.mutes.iter() {
            entry.value().stop();
            signalled += 1;
        }
        signalled
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sticks
            .iter()
            .map(|entry| SessionInfo::from(entry.value().as_ref()))
            .collect();
        sessions.extend(
            self.mutes
                .iter()
                .map(|entry| SessionInfo::from(entry.value().as_ref())),
        );

        sessions.sort_by_key(|s| s.channel);
        sessions
    }

    pub async fn move_members(&self, members: Vec<Member>, target: &str) -> CoordResult<MoveReport> {
        channel::move_members(&*self.voice, members, target).await
    }

    pub async fn move_all(&self, from: ChannelId, target: &str) -> CoordResult<MoveReport> {
        channel::move_all(&*self.voice, from, target).await
    }
}

#[cfg(test)]
mod tests;
