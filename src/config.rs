use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    adapter::AdapterConfig,
    alerts::AlertConfig,
    connection::ConnectionConfig,
    drive::DriveDetectorConfig,
    error::ConfigError,
    polling::PollingConfig,
    retention::RetentionConfig,
    statistics::StatisticsConfig,
    vehicle::VehicleConfig,
};

pub const CONFIG_PATH_ENV: &str = "DRIVELOG_CONFIG";
pub const DEFAULT_PROFILE_ID: &str = "daily";

/// Top-level configuration, one section per pipeline component.
///
/// Every section carries `#[serde(default)]`, so a config file only needs
/// the keys it wants to change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    /// Profile seeded and activated when the store has no active profile.
    pub default_profile_id: String,
    pub adapter: AdapterConfig,
    pub connection: ConnectionConfig,
    pub polling: PollingConfig,
    pub drive: DriveDetectorConfig,
    pub alerts: AlertConfig,
    pub statistics: StatisticsConfig,
    pub retention: RetentionConfig,
    pub vehicle: VehicleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("drivelog.sqlite3"),
            default_profile_id: DEFAULT_PROFILE_ID.into(),
            adapter: AdapterConfig::default(),
            connection: ConnectionConfig::default(),
            polling: PollingConfig::default(),
            drive: DriveDetectorConfig::default(),
            alerts: AlertConfig::default(),
            statistics: StatisticsConfig::default(),
            retention: RetentionConfig::default(),
            vehicle: VehicleConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    /// Path from `DRIVELOG_CONFIG`, or `drivelog.json` in the working directory.
    pub fn path_from_env() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("drivelog.json"))
    }

    /// Checks every section. A failure here must stop the pipeline from starting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_profile_id.trim().is_empty() {
            return Err(ConfigError::new("default_profile_id must not be empty"));
        }
        self.adapter.validate()?;
        self.connection.validate()?;
        self.polling.validate()?;
        self.drive.validate()?;
        self.alerts.validate()?;
        self.statistics.validate()?;
        self.retention.validate()?;
        self.vehicle.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let raw = r#"{ "drive": { "start_rpm": 900.0 }, "retention": { "statistics_days": 365 } }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.drive.start_rpm, 900.0);
        assert_eq!(
            config.drive.end_rpm,
            DriveDetectorConfig::default().end_rpm
        );
        assert_eq!(config.retention.statistics_days, 365);
        assert_eq!(config.default_profile_id, DEFAULT_PROFILE_ID);
    }

    #[test]
    fn invalid_section_fails_validation() {
        let mut config = AppConfig::default();
        config.drive.end_rpm = config.drive.start_rpm;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_durations_fail_validation() {
        let mut config = AppConfig::default();
        config.polling.default_interval_secs = 1e20;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retention.reading_days = 100_000_000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.connection.attempt_timeout_secs = 1e20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.default_profile_id, DEFAULT_PROFILE_ID);
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drivelog.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
