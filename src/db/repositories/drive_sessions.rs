use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime, parse_optional_datetime, parse_session_status},
    models::{DriveSession, DriveSessionStatus},
};

const SESSION_COLUMNS: &str = "id, start_time, end_time, profile_id, status";

fn row_to_drive_session(row: &Row) -> Result<DriveSession> {
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let status: String = row.get("status")?;

    Ok(DriveSession {
        id: row.get("id")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        profile_id: row.get("profile_id")?,
        status: parse_session_status(&status)?,
    })
}

impl Database {
    pub async fn insert_drive_session(&self, session: &DriveSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let now = format_timestamp(&Utc::now());
            conn.execute(
                "INSERT INTO drive_sessions (id, start_time, end_time, profile_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    format_timestamp(&record.start_time),
                    record.end_time.as_ref().map(format_timestamp),
                    record.profile_id,
                    record.status.as_str(),
                    now,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Closes an open session. Closing an already-closed session is an error.
    pub async fn close_drive_session(
        &self,
        session_id: &str,
        end_time: DateTime<Utc>,
        status: DriveSessionStatus,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE drive_sessions
                 SET end_time = ?1,
                     status = ?2,
                     updated_at = ?3
                 WHERE id = ?4 AND status = 'Open'",
                params![
                    format_timestamp(&end_time),
                    status.as_str(),
                    format_timestamp(&Utc::now()),
                    session_id,
                ],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("no open drive session with id {session_id}"));
            }

            Ok(())
        })
        .await
    }

    pub async fn get_drive_session(&self, session_id: &str) -> Result<Option<DriveSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM drive_sessions WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![session_id])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_drive_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    pub async fn get_open_drive_session(&self) -> Result<Option<DriveSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM drive_sessions
                 WHERE status = 'Open'
                 ORDER BY start_time DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query([])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_drive_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    pub async fn list_drive_sessions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DriveSession>> {
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM drive_sessions
                 ORDER BY start_time DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;

            let mut rows = stmt.query(params![limit, offset])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_drive_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    /// Closes every session left open by a crash as `Interrupted`.
    ///
    /// The end time is the last reading recorded at or after the session
    /// start, or the start itself when no reading followed it.
    pub async fn interrupt_open_drive_sessions(&self) -> Result<Vec<DriveSession>> {
        self.execute(|conn| {
            let tx = conn.transaction()?;
            let open = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM drive_sessions WHERE status = 'Open'"
                ))?;
                let mut rows = stmt.query([])?;
                let mut open = Vec::new();
                while let Some(row) = rows.next()? {
                    open.push(row_to_drive_session(row)?);
                }
                open
            };

            let mut recovered = Vec::with_capacity(open.len());
            for mut session in open {
                let last_seen: Option<String> = tx.query_row(
                    "SELECT MAX(timestamp) FROM readings WHERE timestamp >= ?1",
                    params![format_timestamp(&session.start_time)],
                    |row| row.get(0),
                )?;
                let end_time = parse_optional_datetime(last_seen, "timestamp")?
                    .unwrap_or(session.start_time);

                tx.execute(
                    "UPDATE drive_sessions
                     SET end_time = ?1, status = ?2, updated_at = ?3
                     WHERE id = ?4",
                    params![
                        format_timestamp(&end_time),
                        DriveSessionStatus::Interrupted.as_str(),
                        format_timestamp(&Utc::now()),
                        session.id,
                    ],
                )?;

                session.end_time = Some(end_time);
                session.status = DriveSessionStatus::Interrupted;
                recovered.push(session);
            }

            tx.commit()?;
            Ok(recovered)
        })
        .await
    }
}
