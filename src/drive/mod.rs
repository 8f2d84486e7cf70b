pub mod controller;
pub mod detector;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use controller::DriveSessionController;
pub use detector::{DriveDetector, DriveState, DriveTransition};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveDetectorConfig {
    /// RPM at or above which the engine counts as driving.
    pub start_rpm: f64,
    pub start_duration_secs: f64,
    /// RPM at or below which the engine counts as stopped.
    pub end_rpm: f64,
    pub end_duration_secs: f64,
}

impl Default for DriveDetectorConfig {
    fn default() -> Self {
        Self {
            start_rpm: 500.0,
            start_duration_secs: 10.0,
            end_rpm: 0.0,
            end_duration_secs: 60.0,
        }
    }
}

impl DriveDetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.start_rpm.is_finite() || !self.end_rpm.is_finite() {
            return Err(ConfigError::new("drive thresholds must be finite"));
        }
        if self.end_rpm < 0.0 {
            return Err(ConfigError::new("drive.end_rpm must not be negative"));
        }
        if self.end_rpm >= self.start_rpm {
            return Err(ConfigError::new(format!(
                "drive.end_rpm ({}) must be below drive.start_rpm ({})",
                self.end_rpm, self.start_rpm
            )));
        }
        for (name, secs) in [
            ("start_duration_secs", self.start_duration_secs),
            ("end_duration_secs", self.end_duration_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::new(format!(
                    "drive.{name} must be a non-negative number of seconds"
                )));
            }
        }
        Ok(())
    }
}
