use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Descriptive statistics for one parameter, profile and analysis date.
///
/// `std_1` and `std_2` are the one- and two-sigma band half-widths;
/// `outlier_min`/`outlier_max` are `avg ∓ k·σ` for the configured `k`.
/// `window_start..=window_end` is the reading range the row summarizes: a
/// drive session or a whole UTC day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub parameter: String,
    pub profile_id: String,
    pub analysis_date: NaiveDate,
    pub max: f64,
    pub min: f64,
    pub avg: f64,
    pub mode: f64,
    pub std_1: f64,
    pub std_2: f64,
    pub outlier_min: f64,
    pub outlier_max: f64,
    pub sample_count: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
}
