use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounds for the caller-context → intent id association table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentsConfig {
    /// Entries older than this are forgotten.
    #[serde(default = "d_context_ttl_secs")]
    pub context_ttl_secs: u64,
    /// Oldest entries are evicted beyond this many.
    #[serde(default = "d_context_capacity")]
    pub context_capacity: usize,
}

impl Default for IntentsConfig {
    fn default() -> Self {
        Self {
            context_ttl_secs: d_context_ttl_secs(),
            context_capacity: d_context_capacity(),
        }
    }
}

impl IntentsConfig {
    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }
}

fn d_context_ttl_secs() -> u64 {
    3_600
}
fn d_context_capacity() -> usize {
    1_024
}
