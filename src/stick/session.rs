use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    batch::Skip,
    common::{ChannelId, CoordError, Member, ServiceError, SessionId, UserId},
    service::{StatusMessage, VoiceService},
    stick::{
        apply_mute,
        queue::{TurnQueue, newcomers},
    },
    timer::{CancelSignal, Countdown, TickSink},
    vote::{GateState, VoteGate},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Running,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub holder: UserId,
    pub cancelled: bool,
}

/// What a finished talking-stick session did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub id: SessionId,
    pub channel: ChannelId,
    pub turns: Vec<TurnRecord>,
    /// Unmuted by the closing pass.
    pub restored: Vec<UserId>,
    /// Dropped after a failed mute/unmute and never seen again.
    pub dropped: Vec<UserId>,
    pub display_failures: u32,
}

struct Roster {
    state: SessionState,
    holder: Option<Member>,
    queue: TurnQueue,
    snapshot: HashSet<Member>,
    dropped: HashSet<UserId>,
}

/// A talking-stick session bound to one voice channel.
///
/// The turn loop in [`StickSession::drive`] is the main writer of the
/// roster. Skip votes only touch `cancel`; the join hook only appends.
pub struct StickSession {
    id: SessionId,
    channel: ChannelId,
    initiator: Member,
    turn_secs: u32,
    roster: Mutex<Roster>,
    cancel: CancelSignal,
    draining: AtomicBool,
    /// True while a countdown may run. Only changed under the `vote` lock,
    /// so no gate exists between turns.
    turn_open: AtomicBool,
    vote: Mutex<Option<Arc<VoteGate>>>,
}

impl StickSession {
    pub(crate) fn new(channel: ChannelId, initiator: Member, turn_secs: u32) -> Self {
        Self {
            id: SessionId::generate(),
            channel,
            initiator,
            turn_secs,
            roster: Mutex::new(Roster {
                state: SessionState::Idle,
                holder: None,
                queue: TurnQueue::default(),
                snapshot: HashSet::new(),
                dropped: HashSet::new(),
            }),
            cancel: CancelSignal::new(),
            draining: AtomicBool::new(false),
            turn_open: AtomicBool::new(false),
            vote: Mutex::new(None),
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

    pub fn turn_secs(&self) -> u32 {
        self.turn_secs
    }

    pub fn state(&self) -> SessionState {
        self.roster.lock().state
    }

    pub fn holder(&self) -> Option<Member> {
        self.roster.lock().holder.clone()
    }

    pub fn queued(&self) -> Vec<Member> {
        self.roster.lock().queue.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.roster.lock().snapshot.iter().map(|m| m.id).collect();
        ids.sort();
        ids
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Whether the holder's countdown is live and can be voted down.
    pub fn is_turn_open(&self) -> bool {
        self.turn_open.load(Ordering::SeqCst)
    }

    /// Idle -> Running: the initiator holds the stick, everyone else queues.
    pub(crate) fn begin(&self, members: &[Member]) {
        let mut roster = self.roster.lock();
        roster.snapshot = members.iter().cloned().collect();
        roster.snapshot.insert(self.initiator.clone());
        roster.queue = TurnQueue::seeded(members.iter().cloned(), &self.initiator);
        roster.holder = Some(self.initiator.clone());
        roster.state = SessionState::Running;
        drop(roster);
        self.open_turn();
    }

    /// Takes in a member who joined mid-session. Newcomers go to the queue
    /// tail; members already in the snapshot keep their place. Returns
    /// false for the holder and once the session stopped running.
    pub(crate) fn admit(&self, member: &Member) -> bool {
        let mut roster = self.roster.lock();
        if roster.state != SessionState::Running || roster.holder.as_ref() == Some(member) {
            return false;
        }
        if roster.snapshot.insert(member.clone()) {
            roster.dropped.remove(&member.id);
            roster.queue.append_many([member.clone()]);
        }
        true
    }

    /// Runs every remaining turn as a zero-length one, then tears down.
    pub(crate) fn request_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        self.cancel.set();
        self.end_vote();
    }

    /// The skip vote for the current turn, opening one if none is pending.
    /// Returns whether this call opened it, or `None` between turns.
    pub(crate) fn vote_for_turn(
        &self,
        votes_needed: usize,
        timeout: Duration,
    ) -> Option<(Arc<VoteGate>, bool)> {
        let mut slot = self.vote.lock();
        if !self.is_turn_open() {
            return None;
        }
        if let Some(gate) = slot.as_ref() {
            if gate.state() != GateState::Expired {
                return Some((gate.clone(), false));
            }
        }
        let gate = Arc::new(VoteGate::open(votes_needed, timeout, self.cancel.clone()));
        *slot = Some(gate.clone());
        Some((gate, true))
    }

    pub fn current_vote(&self) -> Option<Arc<VoteGate>> {
        self.vote.lock().clone()
    }

    fn end_vote(&self) {
        if let Some(gate) = self.vote.lock().take() {
            gate.close();
        }
    }

    pub(crate) fn drop_participant(&self, member: &Member, cause: &ServiceError) {
        let err = CoordError::ParticipantUnreachable {
            user: member.id,
            source: cause.clone(),
        };
        warn!(channel = %self.channel, "Dropping participant: {}", err);

        let mut roster = self.roster.lock();
        roster.snapshot.remove(member);
        roster.queue.remove(member.id);
        roster.dropped.insert(member.id);
    }

    /// Folds members not seen before into the snapshot and the queue tail.
    fn reconcile(&self, current: &[Member]) -> Vec<Member> {
        let mut roster = self.roster.lock();
        let joined = newcomers(current, &roster.snapshot);
        for member in &joined {
            roster.snapshot.insert(member.clone());
            roster.dropped.remove(&member.id);
        }
        roster.queue.append_many(joined.iter().cloned());
        joined
    }

    fn pop_next(&self) -> Option<Member> {
        let mut roster = self.roster.lock();
        let next = roster.queue.pop_front();
        if next.is_none() {
            roster.holder = None;
        }
        next
    }

    fn set_holder(&self, holder: Member) {
        self.roster.lock().holder = Some(holder);
    }

    fn open_turn(&self) {
        let _slot = self.vote.lock();
        self.turn_open.store(true, Ordering::SeqCst);
    }

    /// Closes the turn's vote and stops new ones until the next countdown.
    /// A pass that landed after the countdown finished belongs to this
    /// turn, so the signal is cleared too.
    fn finish_turn(&self) {
        {
            let mut slot = self.vote.lock();
            self.turn_open.store(false, Ordering::SeqCst);
            if let Some(gate) = slot.take() {
                gate.close();
            }
        }
        if !self.is_draining() {
            self.cancel.take();
        }
    }

    /// Unmutes queued members until one answers; that one becomes holder.
    async fn advance(&self, voice: &dyn VoiceService) -> Option<Member> {
        while let Some(next) = self.pop_next() {
            match voice.set_mute(&next, false).await {
                Ok(()) => {
                    self.set_holder(next.clone());
                    return Some(next);
                }
                Err(e) => self.drop_participant(&next, &e),
            }
        }
        None
    }

    async fn refresh_membership(&self, voice: &dyn VoiceService) {
        let current = match voice.channel_members(self.channel).await {
            Ok(current) => current,
            Err(e) => {
                warn!(channel = %self.channel, "Membership refresh failed: {}", e);
                return;
            }
        };

        let joined = self.reconcile(&current);
        if joined.is_empty() {
            return;
        }
        info!(
            channel = %self.channel,
            "{} member(s) joined mid-session, queued at the back",
            joined.len()
        );
        let report = apply_mute(voice, joined, &Skip::None, true).await;
        for (member, e) in report.into_failed() {
            self.drop_participant(&member, &e);
        }
    }

    /// The turn loop. Runs until the queue is exhausted, then restores
    /// everyone still in the snapshot.
    pub(crate) async fn drive(
        self: Arc<Self>,
        voice: Arc<dyn VoiceService>,
        mut status: StatusMessage,
    ) -> SessionReport {
        let mut turns = Vec::new();

        while let Some(holder) = self.holder() {
            self.open_turn();
            if self.is_draining() {
                self.cancel.set();
            }

            let outcome = {
                let mut display = TurnDisplay {
                    status: &mut status,
                    holder: &holder,
                };
                Countdown::new(self.turn_secs)
                    .run(&self.cancel, &mut display)
                    .await
            };
            self.finish_turn();
            debug!(
                channel = %self.channel,
                user = %holder.id,
                "Turn over ({:?})",
                outcome
            );
            turns.push(TurnRecord {
                holder: holder.id,
                cancelled: outcome.was_cancelled(),
            });

            if let Err(e) = voice.set_mute(&holder, true).await {
                self.drop_participant(&holder, &e);
            }

            self.refresh_membership(&*voice).await;

            if let Some(next) = self.advance(&*voice).await {
                status
                    .show(&format!("{} has the talking stick.", next.display_name))
                    .await;
            }
        }

        self.destroy(&*voice, &mut status, turns).await
    }

    async fn destroy(
        &self,
        voice: &dyn VoiceService,
        status: &mut StatusMessage,
        turns: Vec<TurnRecord>,
    ) -> SessionReport {
        // Destroyed before the closing pass so the join hook stops admitting.
        let mut members: Vec<Member> = {
            let mut roster = self.roster.lock();
            roster.state = SessionState::Destroyed;
            roster.holder = None;
            roster.snapshot.iter().cloned().collect()
        };
        members.sort_by_key(|m| m.id);

        let report = apply_mute(voice, members, &Skip::None, false).await;
        let mut restored: Vec<UserId> = report.succeeded().map(|m| m.id).collect();
        restored.sort();
        for (member, e) in report.into_failed() {
            self.drop_participant(&member, &e);
        }

        status.show("Talking stick has been destroyed.").await;

        let mut dropped: Vec<UserId> = self.roster.lock().dropped.iter().copied().collect();
        dropped.sort();
        self.end_vote();

        info!(
            channel = %self.channel,
            "Talking stick destroyed after {} turn(s), {} restored, {} dropped",
            turns.len(),
            restored.len(),
            dropped.len()
        );

        SessionReport {
            id: self.id.clone(),
            channel: self.channel,
            turns,
            restored,
            dropped,
            display_failures: status.failures(),
        }
    }
}

struct TurnDisplay<'a> {
    status: &'a mut StatusMessage,
    holder: &'a Member,
}

#[async_trait]
impl TickSink for TurnDisplay<'_> {
    async fn on_tick(&mut self, remaining: u32) {
        let text = format!(
            "{} has the talking stick for {}s.",
            self.holder.display_name, remaining
        );
        self.status.show(&text).await;
    }
}
