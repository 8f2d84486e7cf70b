use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DriveSessionStatus {
    Open,
    Completed,
    /// Closed by shutdown or crash recovery rather than a confirmed drive end.
    Interrupted,
}

impl DriveSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveSessionStatus::Open => "Open",
            DriveSessionStatus::Completed => "Completed",
            DriveSessionStatus::Interrupted => "Interrupted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveSession {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub profile_id: String,
    pub status: DriveSessionStatus,
}

impl DriveSession {
    pub fn is_open(&self) -> bool {
        self.status == DriveSessionStatus::Open
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_seconds())
    }
}
