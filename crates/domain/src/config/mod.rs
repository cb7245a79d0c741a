mod governance;
mod identity;
mod intents;
mod reconnect;

pub use governance::*;
pub use identity::*;
pub use intents::*;
pub use reconnect::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub intents: IntentsConfig,
}

impl Config {
    /// Load a TOML config file.  A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: &str, message: String| {
            errors.push(ConfigError {
                severity,
                field: field.into(),
                message,
            })
        };

        let url = self.governance.url.as_str();
        if url.is_empty() {
            push(
                ConfigSeverity::Error,
                "governance.url",
                "url must not be empty".into(),
            );
        } else if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            push(
                ConfigSeverity::Error,
                "governance.url",
                format!("expected a ws:// or wss:// url, got {url:?}"),
            );
        } else if url.starts_with("ws://") && !is_loopback_url(url) {
            push(
                ConfigSeverity::Warning,
                "governance.url",
                "unencrypted transport to a non-loopback host".into(),
            );
        }

        if self.governance.connect_timeout_ms == 0 {
            push(
                ConfigSeverity::Error,
                "governance.connect_timeout_ms",
                "must be greater than 0".into(),
            );
        }
        if self.governance.request_timeout_ms == 0 {
            push(
                ConfigSeverity::Error,
                "governance.request_timeout_ms",
                "must be greater than 0".into(),
            );
        }

        if self.reconnect.enabled {
            if self.reconnect.base_delay_ms == 0 {
                push(
                    ConfigSeverity::Error,
                    "reconnect.base_delay_ms",
                    "must be greater than 0".into(),
                );
            }
            if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
                push(
                    ConfigSeverity::Error,
                    "reconnect.max_delay_ms",
                    "must not be smaller than base_delay_ms".into(),
                );
            }
            if self.reconnect.max_attempts == 0 {
                push(
                    ConfigSeverity::Warning,
                    "reconnect.max_attempts",
                    "0 attempts means a lost connection is never re-established".into(),
                );
            }
        }

        if self.intents.context_capacity == 0 {
            push(
                ConfigSeverity::Warning,
                "intents.context_capacity",
                "context tracking is disabled".into(),
            );
        }

        errors
    }
}

/// Whether the host of a `ws://`/`wss://` URL is a loopback address.
pub fn is_loopback_url(url: &str) -> bool {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);

    let host = if let Some(bracketed) = host_port.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or("")
    } else {
        host_port.split(':').next().unwrap_or("")
    };

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn plaintext_remote_url_is_a_warning() {
        let mut cfg = Config::default();
        cfg.governance.url = "ws://governance.example.com/a2g".into();
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Warning);
        assert_eq!(issues[0].field, "governance.url");
    }

    #[test]
    fn non_websocket_url_is_an_error() {
        let mut cfg = Config::default();
        cfg.governance.url = "https://governance.example.com".into();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "governance.url"));
    }

    #[test]
    fn inverted_backoff_bounds_are_an_error() {
        let mut cfg = Config::default();
        cfg.reconnect.base_delay_ms = 5_000;
        cfg.reconnect.max_delay_ms = 1_000;
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "reconnect.max_delay_ms"));
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_url("ws://localhost:8765/a2g"));
        assert!(is_loopback_url("ws://127.0.0.1/a2g"));
        assert!(is_loopback_url("ws://127.8.9.1:1"));
        assert!(is_loopback_url("ws://[::1]:8765/"));
        assert!(is_loopback_url("ws://user:pw@localhost:1/"));
        assert!(!is_loopback_url("ws://10.0.0.5:8765/"));
        assert!(!is_loopback_url("ws://governance.example.com/"));
        assert!(!is_loopback_url("ws://localhost.evil.com/"));
    }

    #[test]
    fn display_tags_severity() {
        let e = ConfigError {
            severity: ConfigSeverity::Error,
            field: "governance.url".into(),
            message: "url must not be empty".into(),
        };
        assert_eq!(e.to_string(), "[ERROR] governance.url: url must not be empty");
    }
}
