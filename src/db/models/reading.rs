//! Reading data model.
//!
//! One row per parameter per poll tick. Append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value reported by the adapter for a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Number(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Number(value) => Some(*value),
            ParameterValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(value) => Some(value),
            ParameterValue::Number(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub parameter: String,
    /// `None` when the adapter could not provide the parameter this tick.
    pub value: Option<ParameterValue>,
    pub unit: String,
    pub profile_id: String,
}
