use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{ParameterValue, Reading};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchField {
    pub parameter: String,
    pub unit: String,
    /// `None` when the read failed this tick.
    pub value: Option<ParameterValue>,
}

/// Every parameter read in one poll tick, in catalogue order.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadingBatch {
    pub timestamp: DateTime<Utc>,
    pub profile_id: String,
    pub fields: Vec<BatchField>,
}

impl ReadingBatch {
    pub fn new(timestamp: DateTime<Utc>, profile_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            profile_id: profile_id.into(),
            fields: Vec::new(),
        }
    }

    pub fn push(
        &mut self,
        parameter: impl Into<String>,
        unit: impl Into<String>,
        value: Option<ParameterValue>,
    ) {
        self.fields.push(BatchField {
            parameter: parameter.into(),
            unit: unit.into(),
            value,
        });
    }

    pub fn get(&self, parameter: &str) -> Option<&ParameterValue> {
        self.fields
            .iter()
            .find(|field| field.parameter == parameter)
            .and_then(|field| field.value.as_ref())
    }

    pub fn numeric(&self, parameter: &str) -> Option<f64> {
        self.get(parameter).and_then(ParameterValue::as_f64)
    }

    /// Fields that actually carry a numeric value.
    pub fn numeric_fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields.iter().filter_map(|field| {
            field
                .value
                .as_ref()
                .and_then(ParameterValue::as_f64)
                .map(|value| (field.parameter.as_str(), value))
        })
    }

    pub fn missing_count(&self) -> usize {
        self.fields.iter().filter(|field| field.value.is_none()).count()
    }

    /// One reading per field, tagged with the tick timestamp and profile.
    pub fn to_readings(&self) -> Vec<Reading> {
        self.fields
            .iter()
            .map(|field| Reading {
                id: None,
                timestamp: self.timestamp,
                parameter: field.parameter.clone(),
                value: field.value.clone(),
                unit: field.unit.clone(),
                profile_id: self.profile_id.clone(),
            })
            .collect()
    }
}
