pub mod manager;
pub mod state;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use manager::ConnectionManager;
pub use state::ConnectionState;

pub const MAX_BACKOFF_SECS: f64 = 3_600.0;
pub const MAX_ATTEMPT_TIMEOUT_SECS: f64 = 600.0;
const FALLBACK_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// One connect attempt per entry. Each entry is the wait before its
    /// attempt, measured from the previous failure.
    pub backoff_secs: Vec<f64>,
    /// Upper bound on a single adapter connect call.
    pub attempt_timeout_secs: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff_secs: vec![0.0, 1.0, 2.0, 5.0, 10.0, 30.0],
            attempt_timeout_secs: 10.0,
        }
    }
}

impl ConnectionConfig {
    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_secs
            .iter()
            .map(|secs| Duration::try_from_secs_f64(*secs).unwrap_or_default())
            .collect()
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.attempt_timeout_secs)
            .unwrap_or(FALLBACK_ATTEMPT_TIMEOUT)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_secs.is_empty() {
            return Err(ConfigError::new("connection.backoff_secs must not be empty"));
        }
        if self
            .backoff_secs
            .iter()
            .any(|secs| !(0.0..=MAX_BACKOFF_SECS).contains(secs))
        {
            return Err(ConfigError::new(format!(
                "connection.backoff_secs entries must be in [0, {MAX_BACKOFF_SECS}]"
            )));
        }
        if self.backoff_secs.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(ConfigError::new("connection.backoff_secs must be ascending"));
        }
        if !(self.attempt_timeout_secs > 0.0 && self.attempt_timeout_secs <= MAX_ATTEMPT_TIMEOUT_SECS) {
            return Err(ConfigError::new(format!(
                "connection.attempt_timeout_secs must be in (0, {MAX_ATTEMPT_TIMEOUT_SECS}]"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_durations_are_rejected() {
        let config = ConnectionConfig {
            backoff_secs: vec![0.0, 1e20],
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.backoff()[1], Duration::ZERO);

        let config = ConnectionConfig {
            backoff_secs: vec![0.0, f64::NAN],
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());

        for secs in [1e20, f64::NAN, 0.0] {
            let config = ConnectionConfig {
                attempt_timeout_secs: secs,
                ..ConnectionConfig::default()
            };
            assert!(config.validate().is_err(), "{secs} accepted");
            assert_eq!(config.attempt_timeout(), FALLBACK_ATTEMPT_TIMEOUT);
        }
    }

    #[test]
    fn state_defaults_to_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn default_schedule_is_valid() {
        let config = ConnectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backoff().len(), 6);
        assert_eq!(config.attempt_timeout(), Duration::from_secs(10));
    }
}
