use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime, parse_optional_datetime},
    models::{ParameterValue, Reading},
};

fn row_to_reading(row: &Row) -> Result<Reading> {
    let timestamp: String = row.get("timestamp")?;
    let number: Option<f64> = row.get("value")?;
    let text: Option<String> = row.get("value_text")?;

    let value = match (number, text) {
        (Some(number), _) => Some(ParameterValue::Number(number)),
        (None, Some(text)) => Some(ParameterValue::Text(text)),
        (None, None) => None,
    };

    Ok(Reading {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        parameter: row.get("parameter")?,
        value,
        unit: row.get("unit")?,
        profile_id: row.get("profile_id")?,
    })
}

impl Database {
    /// Appends one tick's readings in a single transaction.
    pub async fn insert_readings(&self, readings: &[Reading]) -> Result<usize> {
        let records = readings.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO readings (timestamp, parameter, value, value_text, unit, profile_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for record in &records {
                    let number = record.value.as_ref().and_then(ParameterValue::as_f64);
                    let text = record
                        .value
                        .as_ref()
                        .and_then(ParameterValue::as_text)
                        .map(str::to_string);
                    stmt.execute(params![
                        format_timestamp(&record.timestamp),
                        record.parameter,
                        number,
                        text,
                        record.unit,
                        record.profile_id,
                    ])?;
                }
            }
            tx.commit().context("failed to commit readings")?;
            Ok(records.len())
        })
        .await
    }

    /// Non-null numeric values for one parameter and profile, `start <= ts <= end`.
    pub async fn get_numeric_values(
        &self,
        parameter: &str,
        profile_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        let parameter = parameter.to_string();
        let profile_id = profile_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT value FROM readings
                 WHERE parameter = ?1
                   AND profile_id = ?2
                   AND timestamp >= ?3
                   AND timestamp <= ?4
                   AND value IS NOT NULL
                 ORDER BY timestamp ASC",
            )?;

            let values = stmt
                .query_map(
                    params![
                        parameter,
                        profile_id,
                        format_timestamp(&start),
                        format_timestamp(&end)
                    ],
                    |row| row.get::<_, f64>(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(values)
        })
        .await
    }

    pub async fn get_readings_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, parameter, value, value_text, unit, profile_id
                 FROM readings
                 WHERE timestamp >= ?1 AND timestamp <= ?2
                 ORDER BY timestamp ASC, id ASC",
            )?;

            let mut rows =
                stmt.query(params![format_timestamp(&start), format_timestamp(&end)])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_reading(row)?);
            }

            Ok(readings)
        })
        .await
    }

    /// Distinct parameters with numeric readings for a profile inside a window.
    pub async fn get_numeric_parameters(
        &self,
        profile_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let profile_id = profile_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT parameter FROM readings
                 WHERE profile_id = ?1
                   AND timestamp >= ?2
                   AND timestamp <= ?3
                   AND value IS NOT NULL
                 ORDER BY parameter ASC",
            )?;

            let parameters = stmt
                .query_map(
                    params![profile_id, format_timestamp(&start), format_timestamp(&end)],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(parameters)
        })
        .await
    }

    pub async fn latest_reading_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.execute(|conn| {
            let latest: Option<String> = conn
                .query_row("SELECT MAX(timestamp) FROM readings", [], |row| row.get(0))
                .optional()?
                .flatten();
            parse_optional_datetime(latest, "timestamp")
        })
        .await
    }
}
