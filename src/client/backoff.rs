// src/client/backoff.rs — Reconnection backoff for the real-time channel
//
// delay(attempt) = min(base * 2^attempt, max) for attempts 1..=max_attempts.
// With the defaults that is 2s, 4s, 8s, 16s, 30s and then nothing.

use std::time::Duration;

use crate::infra::config::ClientConfig;

const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 30_000;
const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl From<&ClientConfig> for ReconnectPolicy {
    fn from(c: &ClientConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(c.base_delay_ms),
            max_delay: Duration::from_millis(c.max_delay_ms),
            max_attempts: c.max_reconnect_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based). `None` once the
    /// attempts are exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(factor)
            .min(self.max_delay.as_millis() as u64);
        Some(Duration::from_millis(delay_ms))
    }

    /// The whole schedule, for status display.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).filter_map(|a| self.delay(a)).collect()
    }
}
