pub mod batch;
pub mod controller;
pub mod loop_worker;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use batch::{BatchField, ReadingBatch};
pub use controller::PollerController;
pub use loop_worker::{PollOutcome, Poller, StopReason};

/// Longest tick interval accepted from the config file or a profile override.
pub const MAX_INTERVAL_SECS: f64 = 3_600.0;
const FALLBACK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Tick interval when the active profile has no override.
    pub default_interval_secs: f64,
    /// Upper bound on a single parameter read. Keep it above the adapter's
    /// own read timeout so the adapter reports the failure first.
    pub parameter_timeout_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 1.0,
            parameter_timeout_ms: 3_000,
        }
    }
}

impl PollingConfig {
    pub fn default_interval(&self) -> Duration {
        interval_from_secs(self.default_interval_secs).unwrap_or(FALLBACK_INTERVAL)
    }

    pub fn parameter_timeout(&self) -> Duration {
        Duration::from_millis(self.parameter_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if interval_from_secs(self.default_interval_secs).is_none() {
            return Err(ConfigError::new(format!(
                "polling.default_interval_secs must be in (0, {MAX_INTERVAL_SECS}]"
            )));
        }
        if self.parameter_timeout_ms == 0 {
            return Err(ConfigError::new("polling.parameter_timeout_ms must be positive"));
        }
        Ok(())
    }
}

/// `None` unless `secs` is in `(0, MAX_INTERVAL_SECS]`.
pub fn interval_from_secs(secs: f64) -> Option<Duration> {
    if secs > 0.0 && secs <= MAX_INTERVAL_SECS {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

/// Interval for a profile's override. Profiles come from an external store,
/// so an out-of-range override falls back to `default` instead of failing.
pub fn effective_interval(override_secs: Option<f64>, default: Duration) -> Duration {
    override_secs.and_then(interval_from_secs).unwrap_or(default)
}
