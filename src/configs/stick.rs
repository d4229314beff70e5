use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard ceiling on a single turn or muteall countdown, in seconds.
pub const MAX_COUNTDOWN_SECS: u32 = 60;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StickConfig {
    /// Turn length used when the caller does not pass one.
    #[serde(default = "default_turn_secs")]
    pub default_turn_secs: u32,
    #[serde(default = "default_max_secs")]
    pub max_turn_secs: u32,
    #[serde(default = "default_vote_timeout_secs")]
    pub vote_timeout_secs: u64,
    #[serde(default = "default_max_secs")]
    pub muteall_max_secs: u32,
}

impl Default for StickConfig {
    fn default() -> Self {
        Self {
            default_turn_secs: default_turn_secs(),
            max_turn_secs: default_max_secs(),
            vote_timeout_secs: default_vote_timeout_secs(),
            muteall_max_secs: default_max_secs(),
        }
    }
}

impl StickConfig {
    /// Clamps a requested turn length into `[1, max_turn_secs]`.
    pub fn clamp_turn(&self, requested: Option<i64>) -> u32 {
        let requested = requested.unwrap_or(self.default_turn_secs as i64);
        clamp_secs(requested, self.max_turn_secs)
    }

    pub fn clamp_muteall(&self, requested: i64) -> u32 {
        clamp_secs(requested, self.muteall_max_secs)
    }

    pub fn vote_timeout(&self) -> Duration {
        Duration::from_secs(self.vote_timeout_secs.max(1))
    }
}

fn clamp_secs(requested: i64, configured_max: u32) -> u32 {
    let max = configured_max.clamp(1, MAX_COUNTDOWN_SECS) as i64;
    requested.clamp(1, max) as u32
}

fn default_turn_secs() -> u32 {
    60
}

fn default_max_secs() -> u32 {
    MAX_COUNTDOWN_SECS
}

fn default_vote_timeout_secs() -> u64 {
    15
}
