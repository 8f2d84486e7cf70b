use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_date, format_timestamp, parse_date, parse_datetime, to_i64, to_u64},
    models::StatisticsSnapshot,
};

const SNAPSHOT_COLUMNS: &str = "parameter, profile_id, analysis_date, max_value, min_value, avg_value, \
     mode_value, std_1, std_2, outlier_min, outlier_max, sample_count, window_start, window_end, \
     computed_at";

fn row_to_snapshot(row: &Row) -> Result<StatisticsSnapshot> {
    let analysis_date: String = row.get("analysis_date")?;
    let computed_at: String = row.get("computed_at")?;
    let window_start: String = row.get("window_start")?;
    let window_end: String = row.get("window_end")?;
    let sample_count: i64 = row.get("sample_count")?;

    Ok(StatisticsSnapshot {
        parameter: row.get("parameter")?,
        profile_id: row.get("profile_id")?,
        analysis_date: parse_date(&analysis_date, "analysis_date")?,
        max: row.get("max_value")?,
        min: row.get("min_value")?,
        avg: row.get("avg_value")?,
        mode: row.get("mode_value")?,
        std_1: row.get("std_1")?,
        std_2: row.get("std_2")?,
        outlier_min: row.get("outlier_min")?,
        outlier_max: row.get("outlier_max")?,
        sample_count: to_u64(sample_count, "sample_count")?,
        window_start: parse_datetime(&window_start, "window_start")?,
        window_end: parse_datetime(&window_end, "window_end")?,
        computed_at: parse_datetime(&computed_at, "computed_at")?,
    })
}

impl Database {
    /// Writes the snapshot for its analysis date, replacing only that date's row.
    pub async fn upsert_statistics(&self, snapshot: &StatisticsSnapshot) -> Result<()> {
        let record = snapshot.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO statistics (
                    parameter, profile_id, analysis_date, max_value, min_value, avg_value,
                    mode_value, std_1, std_2, outlier_min, outlier_max, sample_count,
                    window_start, window_end, computed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(parameter, profile_id, analysis_date) DO UPDATE SET
                    max_value = excluded.max_value,
                    min_value = excluded.min_value,
                    avg_value = excluded.avg_value,
                    mode_value = excluded.mode_value,
                    std_1 = excluded.std_1,
                    std_2 = excluded.std_2,
                    outlier_min = excluded.outlier_min,
                    outlier_max = excluded.outlier_max,
                    sample_count = excluded.sample_count,
                    window_start = excluded.window_start,
                    window_end = excluded.window_end,
                    computed_at = excluded.computed_at",
                params![
                    record.parameter,
                    record.profile_id,
                    format_date(&record.analysis_date),
                    record.max,
                    record.min,
                    record.avg,
                    record.mode,
                    record.std_1,
                    record.std_2,
                    record.outlier_min,
                    record.outlier_max,
                    to_i64(record.sample_count)?,
                    format_timestamp(&record.window_start),
                    format_timestamp(&record.window_end),
                    format_timestamp(&record.computed_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_latest_statistics(
        &self,
        parameter: &str,
        profile_id: &str,
    ) -> Result<Option<StatisticsSnapshot>> {
        let parameter = parameter.to_string();
        let profile_id = profile_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM statistics
                 WHERE parameter = ?1 AND profile_id = ?2
                 ORDER BY analysis_date DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query(params![parameter, profile_id])?;
            let snapshot = match rows.next()? {
                Some(row) => Some(row_to_snapshot(row)?),
                None => None,
            };
            Ok(snapshot)
        })
        .await
    }

    /// Snapshot history for one parameter and profile, oldest first.
    pub async fn list_statistics(
        &self,
        parameter: &str,
        profile_id: &str,
    ) -> Result<Vec<StatisticsSnapshot>> {
        let parameter = parameter.to_string();
        let profile_id = profile_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM statistics
                 WHERE parameter = ?1 AND profile_id = ?2
                 ORDER BY analysis_date ASC"
            ))?;

            let mut rows = stmt.query(params![parameter, profile_id])?;
            let mut snapshots = Vec::new();
            while let Some(row) = rows.next()? {
                snapshots.push(row_to_snapshot(row)?);
            }
            Ok(snapshots)
        })
        .await
    }
}
