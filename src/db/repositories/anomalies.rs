use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime},
    models::Anomaly,
};

fn row_to_anomaly(row: &Row) -> Result<Anomaly> {
    let timestamp: String = row.get("timestamp")?;
    Ok(Anomaly {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        variable: row.get("variable")?,
        value: row.get("value")?,
        description: row.get("description")?,
        profile_id: row.get("profile_id")?,
    })
}

impl Database {
    /// Inserts all anomalies of one evaluation atomically.
    pub async fn insert_anomalies(&self, anomalies: &[Anomaly]) -> Result<usize> {
        if anomalies.is_empty() {
            return Ok(0);
        }

        let records = anomalies.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO anomalies (timestamp, variable, value, description, profile_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for record in &records {
                    stmt.execute(params![
                        format_timestamp(&record.timestamp),
                        record.variable,
                        record.value,
                        record.description,
                        record.profile_id,
                    ])?;
                }
            }
            tx.commit().context("failed to commit anomalies")?;
            Ok(records.len())
        })
        .await
    }

    pub async fn list_anomalies(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Anomaly>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, variable, value, description, profile_id
                 FROM anomalies
                 WHERE timestamp >= ?1 AND timestamp <= ?2
                 ORDER BY timestamp ASC, id ASC",
            )?;

            let mut rows =
                stmt.query(params![format_timestamp(&start), format_timestamp(&end)])?;
            let mut anomalies = Vec::new();
            while let Some(row) = rows.next()? {
                anomalies.push(row_to_anomaly(row)?);
            }

            Ok(anomalies)
        })
        .await
    }
}
