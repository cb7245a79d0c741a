use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Governance endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// WebSocket URL of the governance service (`ws://` or `wss://`).
    #[serde(default = "d_url")]
    pub url: String,
    /// Environment variable holding the API key sent as
    /// `Authorization: Bearer <key>`.  Unset or empty means no bearer header.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Upper bound on the WebSocket handshake.
    #[serde(default = "d_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Default deadline for a correlated request.
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Inbound messages larger than this are dropped before parsing.
    #[serde(default = "d_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            url: d_url(),
            api_key_env: d_api_key_env(),
            connect_timeout_ms: d_connect_timeout_ms(),
            request_timeout_ms: d_request_timeout_ms(),
            max_message_bytes: d_max_message_bytes(),
        }
    }
}

impl GovernanceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_url() -> String {
    "ws://127.0.0.1:8765/a2g".into()
}
fn d_api_key_env() -> String {
    "A2G_API_KEY".into()
}
fn d_connect_timeout_ms() -> u64 {
    10_000
}
fn d_request_timeout_ms() -> u64 {
    5_000
}
fn d_max_message_bytes() -> usize {
    1024 * 1024
}
