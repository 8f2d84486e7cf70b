//! Age-based pruning of the store.
//!
//! Each table is cleaned in its own transaction, so a failure in one table
//! leaves the others committed. A retention of `-1` days means "keep
//! forever" and skips the table without issuing a delete.

pub mod scheduler;

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    db::{CleanupResult, Database, RetainedTable, RetentionSummary, TableCleanup, VacuumOutcome},
    error::ConfigError,
    telemetry::{TelemetryEvent, TelemetrySink},
};

pub use scheduler::{next_run_after, DailyScheduler, ScheduledJob};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const KEEP_FOREVER: i64 = -1;
/// A century. Larger windows are rejected rather than clamped.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Applies to readings and the connection log.
    pub reading_days: i64,
    /// Per-profile reading retention, overriding `reading_days`.
    pub profile_reading_days: BTreeMap<String, i64>,
    pub anomaly_days: i64,
    pub statistics_days: i64,
    /// Compact the store after a run that removed rows.
    pub vacuum: bool,
    /// UTC hour of the daily run.
    pub run_at_hour: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            reading_days: 30,
            profile_reading_days: BTreeMap::new(),
            anomaly_days: 90,
            statistics_days: KEEP_FOREVER,
            vacuum: true,
            run_at_hour: 3,
        }
    }
}

impl RetentionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_range = |days: i64| (1..=MAX_RETENTION_DAYS).contains(&days);

        if !in_range(self.reading_days) {
            return Err(ConfigError::new(format!(
                "retention.reading_days must be 1-{MAX_RETENTION_DAYS}"
            )));
        }
        for (profile, days) in &self.profile_reading_days {
            if !in_range(*days) {
                return Err(ConfigError::new(format!(
                    "retention.profile_reading_days.{profile} must be 1-{MAX_RETENTION_DAYS}"
                )));
            }
        }
        for (name, days) in [
            ("anomaly_days", self.anomaly_days),
            ("statistics_days", self.statistics_days),
        ] {
            if days != KEEP_FOREVER && !in_range(days) {
                return Err(ConfigError::new(format!(
                    "retention.{name} must be 1-{MAX_RETENTION_DAYS}, or -1 to keep forever"
                )));
            }
        }
        if self.run_at_hour > 23 {
            return Err(ConfigError::new("retention.run_at_hour must be 0-23"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct RetentionManager {
    db: Database,
    config: RetentionConfig,
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
}

impl RetentionManager {
    pub fn new(
        db: Database,
        config: RetentionConfig,
        telemetry: Arc<dyn TelemetrySink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            db,
            config,
            telemetry,
            clock,
        })
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Runs one cleanup pass. Never fails: table and vacuum errors are
    /// recorded in the returned result, which is also written to the
    /// cleanup log.
    pub async fn run_cleanup(&self) -> CleanupResult {
        let started_at = self.clock.now();
        let started = Instant::now();

        let mut tables = Vec::with_capacity(RetainedTable::ALL.len());
        for table in RetainedTable::ALL {
            tables.push(self.clean_table(table, started_at).await);
        }

        let success = tables.iter().all(|t| t.error.is_none());
        let removed: u64 = tables.iter().map(|t| t.rows_removed).sum();

        let vacuum = if self.config.vacuum && removed > 0 {
            Some(self.vacuum().await)
        } else {
            None
        };

        let mut result = CleanupResult {
            id: None,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            tables,
            vacuum,
            success,
        };

        match self.db.insert_cleanup_result(&result).await {
            Ok(id) => result.id = Some(id),
            Err(err) => log_error!("Failed to record cleanup result: {err:?}"),
        }

        log_info!(
            "Retention cleanup removed {removed} rows in {}ms (success: {success})",
            result.duration_ms
        );
        self.telemetry.record(TelemetryEvent::CleanupCompleted {
            rows_removed: removed,
            success,
            duration_ms: result.duration_ms,
        });

        result
    }

    fn retention_days(&self, table: RetainedTable) -> i64 {
        match table {
            RetainedTable::Readings | RetainedTable::ConnectionLog => self.config.reading_days,
            RetainedTable::Anomalies => self.config.anomaly_days,
            RetainedTable::Statistics => self.config.statistics_days,
        }
    }

    async fn clean_table(&self, table: RetainedTable, now: DateTime<Utc>) -> TableCleanup {
        let name = table.table_name().to_string();
        let days = self.retention_days(table);
        if days == KEEP_FOREVER {
            return TableCleanup {
                table: name,
                rows_removed: 0,
                skipped: true,
                error: None,
            };
        }

        let cutoff = cutoff_before(now, days);
        let outcome = match table {
            RetainedTable::Readings => {
                let profile_cutoffs = self
                    .config
                    .profile_reading_days
                    .iter()
                    .map(|(profile, days)| (profile.clone(), cutoff_before(now, *days)))
                    .collect();
                self.db.delete_readings_before(cutoff, profile_cutoffs).await
            }
            _ => self.db.delete_rows_before(table, cutoff).await,
        };

        match outcome {
            Ok(rows_removed) => TableCleanup {
                table: name,
                rows_removed,
                skipped: false,
                error: None,
            },
            Err(err) => {
                log_error!("Cleanup of {name} failed and was rolled back: {err:?}");
                TableCleanup {
                    table: name,
                    rows_removed: 0,
                    skipped: false,
                    error: Some(format!("{err:#}")),
                }
            }
        }
    }

    async fn vacuum(&self) -> VacuumOutcome {
        match self.db.vacuum().await {
            Ok(duration_ms) => VacuumOutcome {
                success: true,
                duration_ms,
                error: None,
            },
            Err(err) => {
                log_warn!("Vacuum after cleanup failed: {err:?}");
                VacuumOutcome {
                    success: false,
                    duration_ms: 0,
                    error: Some(format!("{err:#}")),
                }
            }
        }
    }

    /// Row counts and oldest entries per table, plus the last run.
    pub async fn retention_summary(&self) -> anyhow::Result<RetentionSummary> {
        let mut tables = Vec::with_capacity(RetainedTable::ALL.len());
        for table in RetainedTable::ALL {
            tables.push(self.db.table_summary(table).await?);
        }
        Ok(RetentionSummary {
            tables,
            last_cleanup: self.db.get_last_cleanup_result().await?,
        })
    }
}

/// `now` minus `days`, saturating at the earliest representable instant.
fn cutoff_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
