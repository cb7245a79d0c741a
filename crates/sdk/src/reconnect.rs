//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

use a2g_domain::config::ReconnectConfig;
use rand::Rng;

/// Controls how the client reconnects after an established connection drops.
///
/// Only losses of a live session trigger this policy; a failed explicit
/// `connect()` is reported to the caller and never retried.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// When `false`, a lost connection stays down.
    pub enabled: bool,
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Cap applied to the exponential part of the delay.
    pub max_delay: Duration,
    /// Attempts allowed per loss.  `0` disables reconnection.
    pub max_attempts: u32,
    /// Upper bound of the uniform random jitter added to each delay.
    pub jitter_max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_attempts: cfg.max_attempts,
            jitter_max: Duration::from_millis(cfg.jitter_max_ms),
        }
    }
}

impl ReconnectBackoff {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// `min(base * 2^(attempt-1), max)` for a 1-based attempt number.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay before `attempt` (1-based), including random jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter_max.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay_for_attempt(attempt) + Duration::from_millis(jitter)
    }

    /// Whether `attempt` (1-based) is past the allowed number of attempts.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        !self.enabled || attempt > self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectBackoff {
        ReconnectBackoff {
            enabled: true,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            max_attempts: 5,
            jitter_max: Duration::from_millis(50),
        }
    }

    #[test]
    fn default_policy_values() {
        let p = ReconnectBackoff::default();
        assert!(p.enabled);
        assert_eq!(p.base_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(30));
        assert_eq!(p.max_attempts, 10);
    }

    #[test]
    fn base_delay_doubles_per_attempt() {
        let p = policy();
        assert_eq!(p.base_delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(p.base_delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(p.base_delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(p.base_delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn base_delay_capped_at_max() {
        let p = policy();
        assert_eq!(p.base_delay_for_attempt(5), Duration::from_millis(1_000));
        assert_eq!(p.base_delay_for_attempt(64), Duration::from_millis(1_000));
        assert_eq!(p.base_delay_for_attempt(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let p = policy();
        for attempt in 1..=8 {
            let floor = p.base_delay_for_attempt(attempt);
            for _ in 0..50 {
                let d = p.delay_for_attempt(attempt);
                assert!(d >= floor, "attempt {attempt}: {d:?} < {floor:?}");
                assert!(d <= floor + p.jitter_max, "attempt {attempt}: {d:?} too large");
            }
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let p = ReconnectBackoff {
            jitter_max: Duration::ZERO,
            ..policy()
        };
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(200));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let p = policy();
        assert!(!p.should_give_up(1));
        assert!(!p.should_give_up(5));
        assert!(p.should_give_up(6));
    }

    #[test]
    fn disabled_always_gives_up() {
        let p = ReconnectBackoff::disabled();
        assert!(p.should_give_up(1));
    }

    #[test]
    fn zero_attempts_never_reconnects() {
        let p = ReconnectBackoff {
            max_attempts: 0,
            ..policy()
        };
        assert!(p.should_give_up(1));
    }
}
