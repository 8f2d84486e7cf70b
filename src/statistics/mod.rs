//! Per-profile descriptive statistics over stored readings.
//!
//! Snapshots are keyed by `(parameter, profile, analysis date)`; the
//! analysis date is the UTC date of the window end. Recomputing a date
//! replaces that date's row and leaves earlier dates alone.
//!
//! A drive ending writes a snapshot for the drive's window. The daily job
//! later finalizes each closed day with a snapshot over the whole UTC day,
//! so the row for a past date always covers that full day while today's row
//! reflects the latest drive. Each row records the window it covers.

pub mod compute;

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    db::{Database, DriveSession, StatisticsSnapshot},
    error::{ConfigError, StatisticsError},
    events::{EventBus, PipelineEvent},
};

pub use compute::{binned_mode, summarize, Summary};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Fewest samples a window needs. Must be at least 2.
    pub min_samples: usize,
    /// Outlier bounds are `avg ∓ outlier_k·σ`.
    pub outlier_k: f64,
    pub mode_bin_width: f64,
    /// Finalize the previous UTC day's statistics from the daily scheduler.
    pub daily_recompute: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            min_samples: 2,
            outlier_k: 2.0,
            mode_bin_width: 1.0,
            daily_recompute: true,
        }
    }
}

impl StatisticsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_samples < 2 {
            return Err(ConfigError::new("statistics.min_samples must be at least 2"));
        }
        if !self.outlier_k.is_finite() || self.outlier_k < 0.0 {
            return Err(ConfigError::new("statistics.outlier_k must be non-negative"));
        }
        if !self.mode_bin_width.is_finite() || self.mode_bin_width <= 0.0 {
            return Err(ConfigError::new("statistics.mode_bin_width must be positive"));
        }
        Ok(())
    }
}

/// Scalar differences of one profile's latest snapshot against the baseline
/// profile (`this - baseline`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDelta {
    pub max: f64,
    pub min: f64,
    pub avg: f64,
    pub mode: f64,
    pub std_1: f64,
    pub sample_count: i64,
}

impl SnapshotDelta {
    fn between(current: &StatisticsSnapshot, baseline: &StatisticsSnapshot) -> Self {
        Self {
            max: current.max - baseline.max,
            min: current.min - baseline.min,
            avg: current.avg - baseline.avg,
            mode: current.mode - baseline.mode,
            std_1: current.std_1 - baseline.std_1,
            sample_count: current.sample_count as i64 - baseline.sample_count as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileComparison {
    pub profile_id: String,
    pub snapshot: Option<StatisticsSnapshot>,
    /// `None` for the baseline itself or when either side has no snapshot.
    pub delta: Option<SnapshotDelta>,
}

#[derive(Clone)]
pub struct StatisticsEngine {
    db: Database,
    config: StatisticsConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl StatisticsEngine {
    pub fn new(
        db: Database,
        config: StatisticsConfig,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            db,
            config,
            clock,
            events,
        })
    }

    pub fn config(&self) -> &StatisticsConfig {
        &self.config
    }

    /// Computes and stores the snapshot for one parameter over
    /// `start..=end`. Nothing is written when the window is underpopulated.
    pub async fn calculate(
        &self,
        parameter: &str,
        profile_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<StatisticsSnapshot, StatisticsError> {
        let values = self
            .db
            .get_numeric_values(parameter, profile_id, start, end)
            .await?;

        let insufficient = || StatisticsError::InsufficientData {
            parameter: parameter.to_string(),
            found: values.len(),
            required: self.config.min_samples,
        };
        if values.len() < self.config.min_samples {
            return Err(insufficient());
        }
        let summary = summarize(&values, self.config.outlier_k, self.config.mode_bin_width)
            .ok_or_else(insufficient)?;

        let snapshot = StatisticsSnapshot {
            parameter: parameter.to_string(),
            profile_id: profile_id.to_string(),
            analysis_date: end.date_naive(),
            max: summary.max,
            min: summary.min,
            avg: summary.mean,
            mode: summary.mode,
            std_1: summary.std_dev,
            std_2: 2.0 * summary.std_dev,
            outlier_min: summary.outlier_min,
            outlier_max: summary.outlier_max,
            sample_count: summary.count as u64,
            window_start: start,
            window_end: end,
            computed_at: self.clock.now(),
        };

        self.db.upsert_statistics(&snapshot).await?;
        self.events
            .publish(PipelineEvent::StatisticsAvailable(snapshot.clone()));
        Ok(snapshot)
    }

    /// Every numeric parameter recorded for the profile inside the window.
    /// Underpopulated parameters are skipped.
    pub async fn calculate_window(
        &self,
        profile_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StatisticsSnapshot>> {
        let parameters = self.db.get_numeric_parameters(profile_id, start, end).await?;
        let mut snapshots = Vec::with_capacity(parameters.len());

        for parameter in parameters {
            match self.calculate(&parameter, profile_id, start, end).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(StatisticsError::InsufficientData { found, required, .. }) => {
                    log_info!(
                        "Skipping statistics for {parameter}: {found} samples, need {required}"
                    );
                }
                Err(StatisticsError::Persistence(err)) => {
                    log_warn!("Statistics for {parameter} not stored: {err:?}");
                }
            }
        }

        Ok(snapshots)
    }

    /// Statistics for a closed drive session's window.
    pub async fn calculate_session(
        &self,
        session: &DriveSession,
    ) -> anyhow::Result<Vec<StatisticsSnapshot>> {
        let end = session.end_time.unwrap_or_else(|| self.clock.now());
        self.calculate_window(&session.profile_id, session.start_time, end)
            .await
    }

    /// Whole-day statistics for `date`, replacing that date's rows.
    pub async fn calculate_day(
        &self,
        profile_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<StatisticsSnapshot>> {
        let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::default()));
        let end = start + Duration::days(1) - Duration::milliseconds(1);
        self.calculate_window(profile_id, start, end).await
    }

    /// Finalizes the last complete UTC day. Used by the daily scheduler; the
    /// current day's rows are left to drive-end snapshots.
    pub async fn finalize_previous_day(
        &self,
        profile_id: &str,
    ) -> anyhow::Result<Vec<StatisticsSnapshot>> {
        match self.clock.now().date_naive().pred_opt() {
            Some(yesterday) => self.calculate_day(profile_id, yesterday).await,
            None => Ok(Vec::new()),
        }
    }

    /// Latest snapshot per profile for `parameter`, diffed against the first
    /// profile in `profile_ids`. Reads stored snapshots only.
    pub async fn compare_profiles(
        &self,
        parameter: &str,
        profile_ids: &[String],
    ) -> anyhow::Result<Vec<ProfileComparison>> {
        let mut comparisons = Vec::with_capacity(profile_ids.len());
        for profile_id in profile_ids {
            let snapshot = self.db.get_latest_statistics(parameter, profile_id).await?;
            comparisons.push(ProfileComparison {
                profile_id: profile_id.clone(),
                snapshot,
                delta: None,
            });
        }

        let baseline = comparisons.first().and_then(|c| c.snapshot.clone());
        if let Some(baseline) = baseline {
            for comparison in comparisons.iter_mut().skip(1) {
                comparison.delta = comparison
                    .snapshot
                    .as_ref()
                    .map(|snapshot| SnapshotDelta::between(snapshot, &baseline));
            }
        }

        Ok(comparisons)
    }
}
