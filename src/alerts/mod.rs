//! Threshold evaluation for poll batches.
//!
//! Thresholds come from two layers: the global defaults in
//! [`AlertConfig`] and the active profile's own map, which wins per
//! parameter. Every breach becomes its own [`Anomaly`]; suppression and
//! acknowledgement happen downstream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    db::{Anomaly, Database, Profile, Threshold},
    error::ConfigError,
    events::{EventBus, PipelineEvent},
    polling::ReadingBatch,
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub default_thresholds: BTreeMap<String, Threshold>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        let default_thresholds = [
            ("RPM", Threshold::new(0.0, 6500.0)),
            ("SPEED", Threshold::new(0.0, 200.0)),
            ("COOLANT_TEMP", Threshold::new(-40.0, 110.0)),
            ("ENGINE_LOAD", Threshold::new(0.0, 95.0)),
            ("INTAKE_TEMP", Threshold::new(-40.0, 60.0)),
            ("SHORT_FUEL_TRIM_1", Threshold::new(-25.0, 25.0)),
            ("LONG_FUEL_TRIM_1", Threshold::new(-25.0, 25.0)),
        ]
        .into_iter()
        .map(|(name, threshold)| (name.to_string(), threshold))
        .collect();

        Self { default_thresholds }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_thresholds("alerts.default_thresholds", &self.default_thresholds)
    }
}

pub fn validate_thresholds(
    scope: &str,
    thresholds: &BTreeMap<String, Threshold>,
) -> Result<(), ConfigError> {
    for (name, threshold) in thresholds {
        if !threshold.is_valid() {
            return Err(ConfigError::new(format!(
                "{scope}.{name}: min {} must not exceed max {}",
                threshold.min, threshold.max
            )));
        }
    }
    Ok(())
}

/// Defaults overlaid with the profile's thresholds, parameter by parameter.
pub fn effective_thresholds(
    defaults: &BTreeMap<String, Threshold>,
    profile: Option<&Profile>,
) -> BTreeMap<String, Threshold> {
    let mut merged = defaults.clone();
    if let Some(profile) = profile {
        for (name, threshold) in &profile.thresholds {
            merged.insert(name.clone(), *threshold);
        }
    }
    merged
}

/// One anomaly per numeric field outside its threshold. Fields without a
/// threshold, or without a value this tick, are never flagged.
pub fn evaluate(batch: &ReadingBatch, thresholds: &BTreeMap<String, Threshold>) -> Vec<Anomaly> {
    batch
        .numeric_fields()
        .filter_map(|(parameter, value)| {
            let threshold = thresholds.get(parameter)?;
            if threshold.contains(value) {
                return None;
            }

            let side = if value < threshold.min { "below" } else { "above" };
            Some(Anomaly {
                id: None,
                timestamp: batch.timestamp,
                variable: parameter.to_string(),
                value,
                description: format!(
                    "{parameter} = {value} is {side} the expected range [{}, {}]",
                    threshold.min, threshold.max
                ),
                profile_id: Some(batch.profile_id.clone()),
            })
        })
        .collect()
}

/// Evaluates, persists and publishes anomalies for each tick.
#[derive(Clone)]
pub struct AnomalyEvaluator {
    db: Database,
    events: EventBus,
}

impl AnomalyEvaluator {
    pub fn new(db: Database, events: EventBus) -> Self {
        Self { db, events }
    }

    /// A failed write is logged and the anomalies are still published.
    pub async fn process(
        &self,
        batch: &ReadingBatch,
        thresholds: &BTreeMap<String, Threshold>,
    ) -> Vec<Anomaly> {
        let anomalies = evaluate(batch, thresholds);
        if anomalies.is_empty() {
            return anomalies;
        }

        for anomaly in &anomalies {
            log_warn!("Anomaly: {}", anomaly.description);
        }

        if let Err(err) = self.db.insert_anomalies(&anomalies).await {
            log_error!(
                "Failed to persist {} anomalies for tick {}: {err:?}",
                anomalies.len(),
                batch.timestamp
            );
        }

        for anomaly in &anomalies {
            self.events.publish(PipelineEvent::Anomaly(anomaly.clone()));
        }
        anomalies
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::ParameterValue;

    fn batch(values: &[(&str, Option<f64>)]) -> ReadingBatch {
        let mut batch = ReadingBatch::new(Utc::now(), "track");
        for (name, value) in values {
            batch.push(*name, "", value.map(ParameterValue::Number));
        }
        batch
    }

    fn thresholds() -> BTreeMap<String, Threshold> {
        AlertConfig::default().default_thresholds
    }

    #[test]
    fn every_breach_yields_one_anomaly() {
        let batch = batch(&[
            ("RPM", Some(7200.0)),
            ("COOLANT_TEMP", Some(118.0)),
            ("SPEED", Some(80.0)),
            ("INTAKE_TEMP", Some(-45.0)),
        ]);

        let anomalies = evaluate(&batch, &thresholds());

        let flagged: Vec<_> = anomalies
            .iter()
            .map(|a| (a.variable.as_str(), a.value))
            .collect();
        assert_eq!(
            flagged,
            vec![("RPM", 7200.0), ("COOLANT_TEMP", 118.0), ("INTAKE_TEMP", -45.0)]
        );
        assert!(anomalies[0].description.contains("[0, 6500]"));
        assert!(anomalies[2].description.contains("below"));
    }

    #[test]
    fn in_range_missing_and_unconfigured_fields_are_quiet() {
        let batch = batch(&[
            ("RPM", Some(6500.0)),
            ("COOLANT_TEMP", None),
            ("MAF", Some(9000.0)),
        ]);
        assert!(evaluate(&batch, &thresholds()).is_empty());
    }

    #[test]
    fn profile_overrides_defaults_per_field() {
        let mut profile = Profile::new("track", "Track day");
        profile
            .thresholds
            .insert("RPM".into(), Threshold::new(0.0, 7500.0));
        profile
            .thresholds
            .insert("MAF".into(), Threshold::new(0.0, 250.0));

        let merged = effective_thresholds(&thresholds(), Some(&profile));
        assert_eq!(merged["RPM"], Threshold::new(0.0, 7500.0));
        assert_eq!(merged["COOLANT_TEMP"], Threshold::new(-40.0, 110.0));

        let batch = batch(&[("RPM", Some(7200.0)), ("MAF", Some(300.0))]);
        let anomalies = evaluate(&batch, &merged);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].variable, "MAF");
    }

    #[test]
    fn inverted_threshold_is_rejected() {
        let mut config = AlertConfig::default();
        config
            .default_thresholds
            .insert("SPEED".into(), Threshold::new(100.0, 10.0));
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn anomalies_are_persisted_and_published() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("alerts.sqlite3")).unwrap();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let evaluator = AnomalyEvaluator::new(db.clone(), events);

        let batch = batch(&[("RPM", Some(9000.0)), ("SPEED", Some(250.0))]);
        let produced = evaluator.process(&batch, &thresholds()).await;
        assert_eq!(produced.len(), 2);

        let stored = db
            .list_anomalies(batch.timestamp, batch.timestamp)
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(matches!(rx.try_recv(), Ok(PipelineEvent::Anomaly(a)) if a.variable == "RPM"));
    }
}
