use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A threshold breach observed in one poll tick. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub variable: String,
    pub value: f64,
    pub description: String,
    pub profile_id: Option<String>,
}
