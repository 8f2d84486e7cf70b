use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::{
    connection::Database,
    helpers::{format_date, format_timestamp, parse_datetime, to_i64, to_u64},
    models::{CleanupResult, TableSummary},
};

/// Tables the retention manager prunes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetainedTable {
    Readings,
    Anomalies,
    Statistics,
    ConnectionLog,
}

impl RetainedTable {
    pub const ALL: [RetainedTable; 4] = [
        RetainedTable::Readings,
        RetainedTable::Anomalies,
        RetainedTable::Statistics,
        RetainedTable::ConnectionLog,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            RetainedTable::Readings => "readings",
            RetainedTable::Anomalies => "anomalies",
            RetainedTable::Statistics => "statistics",
            RetainedTable::ConnectionLog => "connection_log",
        }
    }

    fn age_column(&self) -> &'static str {
        match self {
            RetainedTable::Statistics => "analysis_date",
            _ => "timestamp",
        }
    }

    fn format_cutoff(&self, cutoff: &DateTime<Utc>) -> String {
        match self {
            RetainedTable::Statistics => format_date(&cutoff.date_naive()),
            _ => format_timestamp(cutoff),
        }
    }
}

fn row_to_cleanup(row: &Row) -> Result<CleanupResult> {
    let started_at: String = row.get("started_at")?;
    let duration_ms: i64 = row.get("duration_ms")?;
    let tables_json: String = row.get("tables_json")?;
    let vacuum_json: Option<String> = row.get("vacuum_json")?;
    let success: i64 = row.get("success")?;

    Ok(CleanupResult {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        duration_ms: to_u64(duration_ms, "duration_ms")?,
        tables: serde_json::from_str(&tables_json).context("failed to parse cleanup tables")?,
        vacuum: vacuum_json
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .context("failed to parse cleanup vacuum outcome")?,
        success: success != 0,
    })
}

impl Database {
    /// Deletes readings older than their profile's cutoff in one transaction.
    ///
    /// Profiles listed in `profile_cutoffs` use their own cutoff; every other
    /// row uses `default_cutoff`.
    pub async fn delete_readings_before(
        &self,
        default_cutoff: DateTime<Utc>,
        profile_cutoffs: Vec<(String, DateTime<Utc>)>,
    ) -> Result<u64> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0usize;

            for (profile_id, cutoff) in &profile_cutoffs {
                removed += tx.execute(
                    "DELETE FROM readings WHERE profile_id = ?1 AND timestamp < ?2",
                    params![profile_id, format_timestamp(cutoff)],
                )?;
            }

            let mut sql = String::from("DELETE FROM readings WHERE timestamp < ?1");
            let mut values = vec![Value::Text(format_timestamp(&default_cutoff))];
            if !profile_cutoffs.is_empty() {
                let placeholders = (0..profile_cutoffs.len())
                    .map(|i| format!("?{}", i + 2))
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!(" AND profile_id NOT IN ({placeholders})"));
                values.extend(
                    profile_cutoffs
                        .iter()
                        .map(|(profile_id, _)| Value::Text(profile_id.clone())),
                );
            }
            removed += tx.execute(&sql, params_from_iter(values))?;

            tx.commit().context("failed to commit readings cleanup")?;
            Ok(removed as u64)
        })
        .await
    }

    /// Deletes rows of `table` older than `cutoff` in one transaction.
    pub async fn delete_rows_before(
        &self,
        table: RetainedTable,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE {} < ?1",
                    table.table_name(),
                    table.age_column()
                ),
                params![table.format_cutoff(&cutoff)],
            )?;
            tx.commit()
                .with_context(|| format!("failed to commit {} cleanup", table.table_name()))?;
            Ok(removed as u64)
        })
        .await
    }

    /// Checkpoints the WAL and rebuilds the database file. Returns elapsed ms.
    ///
    /// Fails without vacuuming when another connection keeps the WAL pinned.
    pub async fn vacuum(&self) -> Result<u64> {
        self.execute(|conn| {
            let started = Instant::now();
            let busy: i64 = conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))
                .context("failed to checkpoint WAL")?;
            if busy != 0 {
                bail!("WAL checkpoint blocked by an open reader");
            }
            conn.execute_batch("VACUUM").context("VACUUM failed")?;
            Ok(started.elapsed().as_millis() as u64)
        })
        .await
    }

    pub async fn insert_cleanup_result(&self, result: &CleanupResult) -> Result<i64> {
        let record = result.clone();
        self.execute(move |conn| {
            let tables_json =
                serde_json::to_string(&record.tables).context("failed to serialize tables")?;
            let vacuum_json = record
                .vacuum
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("failed to serialize vacuum outcome")?;

            conn.execute(
                "INSERT INTO cleanup_log (started_at, duration_ms, tables_json, vacuum_json, success)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    format_timestamp(&record.started_at),
                    to_i64(record.duration_ms)?,
                    tables_json,
                    vacuum_json,
                    record.success as i64,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_last_cleanup_result(&self) -> Result<Option<CleanupResult>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, duration_ms, tables_json, vacuum_json, success
                 FROM cleanup_log
                 ORDER BY id DESC
                 LIMIT 1",
            )?;
            let mut rows = stmt.query([])?;
            let result = match rows.next()? {
                Some(row) => Some(row_to_cleanup(row)?),
                None => None,
            };
            Ok(result)
        })
        .await
    }

    pub async fn table_summary(&self, table: RetainedTable) -> Result<TableSummary> {
        self.execute(move |conn| {
            let (row_count, oldest): (i64, Option<String>) = conn
                .query_row(
                    &format!(
                        "SELECT COUNT(*), MIN({}) FROM {}",
                        table.age_column(),
                        table.table_name()
                    ),
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .unwrap_or((0, None));

            Ok(TableSummary {
                table: table.table_name().to_string(),
                row_count: to_u64(row_count, "row_count")?,
                oldest,
            })
        })
        .await
    }
}
