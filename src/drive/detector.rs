//! RPM-driven drive state machine.
//!
//! `Idle -> DriveStarting -> Driving -> DriveEnding -> Idle`. The two
//! intermediate states are debounce windows: the condition has to hold for
//! the configured duration without a single contrary sample, otherwise the
//! detector falls back to where it came from.
//!
//! A window's length counts the time its samples cover: from the first
//! sample to the last, plus one sampling interval for the last sample. Ten
//! samples one second apart therefore cover ten seconds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::DriveDetectorConfig;

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DriveState {
    #[default]
    Idle,
    DriveStarting,
    Driving,
    DriveEnding,
}

/// A confirmed state change. `at` is the first sample of the window that
/// confirmed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveTransition {
    Started { at: DateTime<Utc> },
    Ended { at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct DriveDetector {
    config: DriveDetectorConfig,
    state: DriveState,
    window_start: Option<DateTime<Utc>>,
}

impl DriveDetector {
    pub fn new(config: DriveDetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: DriveState::default(),
            window_start: None,
        })
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn config(&self) -> &DriveDetectorConfig {
        &self.config
    }

    /// Feeds one RPM sample. A missing sample neither extends nor breaks a
    /// window.
    pub fn observe(
        &mut self,
        rpm: Option<f64>,
        at: DateTime<Utc>,
        interval: Duration,
    ) -> Option<DriveTransition> {
        let rpm = rpm?;

        match self.state {
            DriveState::Idle | DriveState::DriveStarting => {
                if rpm < self.config.start_rpm {
                    self.state = DriveState::Idle;
                    self.window_start = None;
                    return None;
                }

                let window_start = *self.window_start.get_or_insert(at);
                self.state = DriveState::DriveStarting;
                if covered_secs(window_start, at, interval) >= self.config.start_duration_secs {
                    self.state = DriveState::Driving;
                    self.window_start = None;
                    return Some(DriveTransition::Started { at: window_start });
                }
                None
            }
            DriveState::Driving | DriveState::DriveEnding => {
                if rpm > self.config.end_rpm {
                    self.state = DriveState::Driving;
                    self.window_start = None;
                    return None;
                }

                let window_start = *self.window_start.get_or_insert(at);
                self.state = DriveState::DriveEnding;
                if covered_secs(window_start, at, interval) >= self.config.end_duration_secs {
                    self.state = DriveState::Idle;
                    self.window_start = None;
                    return Some(DriveTransition::Ended { at: window_start });
                }
                None
            }
        }
    }

    /// Drops any drive in progress, e.g. after the session was closed externally.
    pub fn reset(&mut self) {
        self.state = DriveState::Idle;
        self.window_start = None;
    }
}

fn covered_secs(window_start: DateTime<Utc>, at: DateTime<Utc>, interval: Duration) -> f64 {
    let spanned = (at - window_start).num_milliseconds().max(0) as f64 / 1000.0;
    spanned + interval.as_secs_f64()
}
