use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Tuning knobs for probing, retries and waits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Lookups per element before "not rendered yet" becomes a hard failure.
    pub retry_attempts: u32,
    /// Delay between element lookups; doubles after every attempt.
    pub retry_backoff_ms: u64,
    /// Upper bound for a single collaborator call.
    pub action_timeout_ms: u64,
    /// Cap applied to `wait` and `wait_for_page` durations from configs.
    pub max_wait_ms: u64,
    /// Polling interval while waiting for a page.
    pub poll_interval_ms: u64,
    /// How long a run may wait for another run to release the device.
    pub queue_timeout_ms: u64,
    /// Minimum share of anchors that must be present for a structural match.
    pub structural_match_threshold: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_backoff_ms: 200,
            action_timeout_ms: 10_000,
            max_wait_ms: 60_000,
            poll_interval_ms: 100,
            queue_timeout_ms: 300_000,
            structural_match_threshold: 0.6,
        }
    }
}

impl EngineSettings {
    /// Defaults overlaid with `UIROUTE_*` environment variables.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        read_env("UIROUTE_RETRY_ATTEMPTS", &mut settings.retry_attempts);
        read_env("UIROUTE_RETRY_BACKOFF_MS", &mut settings.retry_backoff_ms);
        read_env("UIROUTE_ACTION_TIMEOUT_MS", &mut settings.action_timeout_ms);
        read_env("UIROUTE_MAX_WAIT_MS", &mut settings.max_wait_ms);
        read_env("UIROUTE_POLL_INTERVAL_MS", &mut settings.poll_interval_ms);
        read_env("UIROUTE_QUEUE_TIMEOUT_MS", &mut settings.queue_timeout_ms);
        settings
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Clamp a configured wait to `max_wait_ms`.
    pub fn bounded_wait(&self, requested_ms: u64) -> Duration {
        Duration::from_millis(requested_ms.min(self.max_wait_ms))
    }
}

fn read_env<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = env::var(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring {key}={raw:?}: not a valid value"),
        }
    }
}
