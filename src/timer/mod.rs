//! One-second countdown with cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

/// Cancellation flag owned by one session and consumed by its active timer.
///
/// Setting it is idempotent; the timer clears it when it observes it, so a
/// single `set` ends exactly one countdown.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Reads and clears the flag.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Receives the remaining seconds before each tick's sleep.
///
/// `on_tick` has no error path: the sink owns its failures. It logs or
/// counts them itself and returns, and the countdown keeps its cadence
/// whatever the sink did.
#[async_trait]
pub trait TickSink: Send {
    async fn on_tick(&mut self, remaining: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownOutcome {
    Completed,
    /// Cut short with `remaining` seconds left on the clock.
    Cancelled { remaining: u32 },
}

impl CountdownOutcome {
    pub fn was_cancelled(self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub struct Countdown {
    total_secs: u32,
    tick: Duration,
}

impl Countdown {
    pub fn new(total_secs: u32) -> Self {
        Self {
            total_secs,
            tick: Duration::from_secs(1),
        }
    }

    pub fn total_secs(&self) -> u32 {
        self.total_secs
    }

    /// Ticks from `total_secs` down to 1, checking `cancel` before each one.
    pub async fn run<S: TickSink + ?Sized>(&self, cancel: &CancelSignal, sink: &mut S) -> CountdownOutcome {
        for remaining in (1..=self.total_secs).rev() {
            if cancel.take() {
                tracing::debug!("Countdown cancelled with {}s left", remaining);
                return CountdownOutcome::Cancelled { remaining };
            }
            sink.on_tick(remaining).await;
            tokio::time::sleep(self.tick).await;
        }

        // A signal raised during the final sleep targets this countdown, not
        // the next one.
        cancel.take();
        CountdownOutcome::Completed
    }
}
