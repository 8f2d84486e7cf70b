//! Retention run results.
//!
//! A `CleanupResult` is written to `cleanup_log` after every run so the
//! retention summary can report what the last run did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableCleanup {
    pub table: String,
    pub rows_removed: u64,
    /// True when retention for the table is `-1` and no delete was issued.
    pub skipped: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VacuumOutcome {
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub tables: Vec<TableCleanup>,
    pub vacuum: Option<VacuumOutcome>,
    /// False if any table failed. A failed vacuum does not flip this.
    pub success: bool,
}

impl CleanupResult {
    pub fn total_removed(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_removed).sum()
    }

    pub fn removed_from(&self, table: &str) -> u64 {
        self.tables
            .iter()
            .find(|t| t.table == table)
            .map(|t| t.rows_removed)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub table: String,
    pub row_count: u64,
    pub oldest: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSummary {
    pub tables: Vec<TableSummary>,
    pub last_cleanup: Option<CleanupResult>,
}
