use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime},
    models::ConnectionLogEntry,
};

fn row_to_entry(row: &Row) -> Result<ConnectionLogEntry> {
    let timestamp: String = row.get("timestamp")?;
    let attempt: Option<i64> = row.get("attempt")?;
    Ok(ConnectionLogEntry {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        event_type: row.get("event_type")?,
        attempt: attempt.map(|a| a as u32),
        detail: row.get("detail")?,
    })
}

impl Database {
    pub async fn insert_connection_event(&self, entry: &ConnectionLogEntry) -> Result<()> {
        let record = entry.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO connection_log (timestamp, event_type, attempt, detail)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    format_timestamp(&record.timestamp),
                    record.event_type,
                    record.attempt.map(i64::from),
                    record.detail,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Most recent entries first.
    pub async fn list_connection_events(&self, limit: usize) -> Result<Vec<ConnectionLogEntry>> {
        let limit = limit as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, event_type, attempt, detail
                 FROM connection_log
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![limit])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
        .await
    }
}
