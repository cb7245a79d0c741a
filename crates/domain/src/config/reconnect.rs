use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconnect policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Automatic reconnection after an established connection is lost.
///
/// The delay before attempt `n` (1-based) is
/// `min(base_delay_ms * 2^(n-1), max_delay_ms)` plus a uniform random jitter
/// in `[0, jitter_max_ms]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempts allowed per loss; once exhausted the client stays
    /// disconnected until `connect()` is called again.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: d_base_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            max_attempts: d_max_attempts(),
            jitter_max_ms: d_jitter_max_ms(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_base_delay_ms() -> u64 {
    1_000
}
fn d_max_delay_ms() -> u64 {
    30_000
}
fn d_max_attempts() -> u32 {
    10
}
fn d_jitter_max_ms() -> u64 {
    1_000
}
