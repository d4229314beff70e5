//! Threshold vote with a bounded lifetime.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::{common::UserId, timer::CancelSignal};

pub const DEFAULT_VOTE_TIMEOUT: Duration = Duration::from_secs(15);

/// Distinct votes required out of `member_count` participants: half, rounded up.
pub fn votes_needed(member_count: usize) -> usize {
    member_count.div_ceil(2).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GateState {
    Open,
    Passed,
    /// Timed out, or closed before reaching the threshold.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum VoteOutcome {
    /// Counted (or already counted); threshold not reached yet.
    Accepted { votes: usize, needed: usize },
    ThresholdReached,
    Closed,
}

/// Collects distinct votes until `votes_needed` is reached or the deadline
/// passes. Reaching the threshold raises `on_pass` exactly once.
pub struct VoteGate {
    votes_needed: usize,
    deadline: Instant,
    voters: Mutex<HashSet<UserId>>,
    state: watch::Sender<GateState>,
    tally: watch::Sender<usize>,
    on_pass: CancelSignal,
}

impl VoteGate {
    pub fn open(votes_needed: usize, timeout: Duration, on_pass: CancelSignal) -> Self {
        let (state, _) = watch::channel(GateState::Open);
        let (tally, _) = watch::channel(0);
        Self {
            votes_needed: votes_needed.max(1),
            deadline: Instant::now() + timeout,
            voters: Mutex::new(HashSet::new()),
            state,
            tally,
            on_pass,
        }
    }

    pub fn cast(&self, voter: UserId) -> VoteOutcome {
        let mut voters = self.voters.lock();
        if self.state() != GateState::Open {
            return VoteOutcome::Closed;
        }
        if Instant::now() >= self.deadline {
            self.settle(GateState::Expired);
            return VoteOutcome::Closed;
        }

        let counted = voters.insert(voter);
        if counted {
            self.tally.send_replace(voters.len());
        }
        if counted && voters.len() >= self.votes_needed {
            if !self.settle(GateState::Passed) {
                return VoteOutcome::Closed;
            }
            tracing::debug!("Vote passed with {} votes", voters.len());
            self.on_pass.set();
            return VoteOutcome::ThresholdReached;
        }

        VoteOutcome::Accepted {
            votes: voters.len(),
            needed: self.votes_needed,
        }
    }

    /// Closes an open gate without firing its signal.
    pub fn close(&self) {
        let _voters = self.voters.lock();
        self.settle(GateState::Expired);
    }

    /// Resolves once the gate passes, is closed, or its deadline elapses.
    pub async fn wait(&self) -> GateState {
        let mut rx = self.state.subscribe();
        let settled = tokio::time::timeout_at(
            self.deadline,
            rx.wait_for(|s| *s != GateState::Open),
        )
        .await;

        match settled {
            Ok(Ok(state)) => *state,
            _ => {
                self.settle(GateState::Expired);
                self.state()
            }
        }
    }

    /// Vote count updates, for live progress displays.
    pub fn subscribe_tally(&self) -> watch::Receiver<usize> {
        self.tally.subscribe()
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn votes(&self) -> usize {
        self.voters.lock().len()
    }

    pub fn votes_needed(&self) -> usize {
        self.votes_needed
    }

    pub fn is_open(&self) -> bool {
        self.state() == GateState::Open
    }

    /// Moves an open gate to `to`. Returns false if it had already settled.
    fn settle(&self, to: GateState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == GateState::Open {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}
