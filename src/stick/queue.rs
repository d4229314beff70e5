use std::collections::{HashSet, VecDeque};

use crate::common::{Member, UserId};

/// FIFO of participants waiting for the stick. Nobody is queued twice.
#[derive(Debug, Default, Clone)]
pub struct TurnQueue {
    order: VecDeque<Member>,
    queued: HashSet<UserId>,
}

impl TurnQueue {
    /// Queues `members` in order, leaving out the current holder.
    pub fn seeded(members: impl IntoIterator<Item = Member>, holder: &Member) -> Self {
        let mut queue = Self::default();
        queue.append_many(members.into_iter().filter(|m| m != holder));
        queue
    }

    pub fn pop_front(&mut self) -> Option<Member> {
        let member = self.order.pop_front()?;
        self.queued.remove(&member.id);
        Some(member)
    }

    /// Appends everyone not already queued. Returns how many were added.
    pub fn append_many(&mut self, members: impl IntoIterator<Item = Member>) -> usize {
        let mut added = 0;
        for member in members {
            if self.queued.insert(member.id) {
                self.order.push_back(member);
                added += 1;
            }
        }
        added
    }

    pub fn remove(&mut self, user: UserId) -> bool {
        if !self.queued.remove(&user) {
            return false;
        }
        self.order.retain(|m| m.id != user);
        true
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.queued.contains(&user)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.order.iter()
    }
}

/// Members of `current` missing from `known`, in `current`'s order.
pub fn newcomers(current: &[Member], known: &HashSet<Member>) -> Vec<Member> {
    current
        .iter()
        .filter(|m| !known.contains(*m))
        .cloned()
        .collect()
}
