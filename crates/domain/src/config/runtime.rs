use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task streaming and cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cadence of the stream listener and lifetimes of the cancellation keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Longest a listener waits on an empty channel before re-checking
    /// timeout and stop conditions.
    #[serde(default = "d_1000")]
    pub poll_interval_ms: u64,
    #[serde(default = "d_10")]
    pub ping_interval_secs: u64,
    /// Hard ceiling on one task's stream.
    #[serde(default = "d_600")]
    pub listen_timeout_secs: u64,
    /// Lifetime of the belongs-to marker.
    #[serde(default = "d_1800")]
    pub task_owner_ttl_secs: u64,
    /// Lifetime of the stopped marker.
    #[serde(default = "d_600")]
    pub task_stopped_ttl_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: d_1000(),
            ping_interval_secs: d_10(),
            listen_timeout_secs: d_600(),
            task_owner_ttl_secs: d_1800(),
            task_stopped_ttl_secs: d_600(),
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }
    pub fn task_owner_ttl(&self) -> Duration {
        Duration::from_secs(self.task_owner_ttl_secs)
    }
    pub fn task_stopped_ttl(&self) -> Duration {
        Duration::from_secs(self.task_stopped_ttl_secs)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_1000() -> u64 {
    1000
}
fn d_10() -> u64 {
    10
}
fn d_600() -> u64 {
    600
}
fn d_1800() -> u64 {
    1800
}
