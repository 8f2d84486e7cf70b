//! Driving profile data model.
//!
//! Profiles are managed outside the pipeline; the pipeline only reads the
//! active one to pick thresholds and the polling interval.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Inclusive acceptable range for one parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Threshold {
    pub min: f64,
    pub max: f64,
}

impl Threshold {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub thresholds: BTreeMap<String, Threshold>,
    pub polling_interval_secs: Option<f64>,
    pub is_active: bool,
}

impl Profile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            thresholds: BTreeMap::new(),
            polling_interval_secs: None,
            is_active: false,
        }
    }
}
