//! Fan-out/fan-in over a set of participants.
//!
//! Every action of a batch is polled concurrently on the calling task and the
//! call returns once all of them have settled. One failure never cancels its
//! siblings; it is reported next to the participant it belongs to.

use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;

use futures::future::join_all;

/// Participants to leave out of a batch.
#[derive(Debug, Clone)]
pub enum Skip<P> {
    None,
    One(P),
    Set(HashSet<P>),
}

impl<P: Eq + Hash> Skip<P> {
    pub fn contains(&self, participant: &P) -> bool {
        match self {
            Self::None => false,
            Self::One(p) => p == participant,
            Self::Set(set) => set.contains(participant),
        }
    }
}

impl<P> From<Option<P>> for Skip<P> {
    fn from(value: Option<P>) -> Self {
        value.map_or(Self::None, Self::One)
    }
}

impl<P: Eq + Hash> From<HashSet<P>> for Skip<P> {
    fn from(value: HashSet<P>) -> Self {
        Self::Set(value)
    }
}

/// Per-participant results of a batch, in dispatch order.
#[derive(Debug)]
pub struct BatchReport<P, T, E> {
    pub results: Vec<(P, Result<T, E>)>,
}

impl<P, T, E> BatchReport<P, T, E> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &P> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(p, _)| p)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&P, &E)> {
        self.results
            .iter()
            .filter_map(|(p, r)| r.as_ref().err().map(|e| (p, e)))
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    /// Consumes the report, keeping only the participants whose action failed.
    pub fn into_failed(self) -> Vec<(P, E)> {
        self.results
            .into_iter()
            .filter_map(|(p, r)| r.err().map(|e| (p, e)))
            .collect()
    }
}

/// Runs `action` for every participant not in `skip` and waits for all of them.
pub async fn run<P, I, T, E, F, Fut>(participants: I, skip: &Skip<P>, action: F) -> BatchReport<P, T, E>
where
    I: IntoIterator<Item = P>,
    P: Eq + Hash + Clone,
    F: Fn(P) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let dispatched: Vec<P> = participants
        .into_iter()
        .filter(|p| !skip.contains(p))
        .collect();

    let futs: Vec<_> = dispatched.iter().cloned().map(&action).collect();
    let outcomes = join_all(futs).await;

    let report = BatchReport {
        results: dispatched.into_iter().zip(outcomes).collect(),
    };
    tracing::debug!(
        "Batch settled: {} dispatched, {} failed",
        report.len(),
        report.failure_count()
    );
    report
}
