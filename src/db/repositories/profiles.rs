use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::format_timestamp,
    models::Profile,
};

const PROFILE_COLUMNS: &str = "id, name, thresholds_json, polling_interval_secs, is_active";

fn row_to_profile(row: &Row) -> Result<Profile> {
    let thresholds_json: String = row.get("thresholds_json")?;
    let is_active: i64 = row.get("is_active")?;

    Ok(Profile {
        id: row.get("id")?,
        name: row.get("name")?,
        thresholds: serde_json::from_str(&thresholds_json)
            .context("failed to parse profile thresholds")?,
        polling_interval_secs: row.get("polling_interval_secs")?,
        is_active: is_active != 0,
    })
}

impl Database {
    /// Inserts or updates a profile. The active flag is managed by
    /// [`Database::set_active_profile`] and is left untouched on update.
    pub async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let record = profile.clone();
        self.execute(move |conn| {
            let thresholds_json = serde_json::to_string(&record.thresholds)
                .context("failed to serialize profile thresholds")?;
            let now = format_timestamp(&Utc::now());
            conn.execute(
                "INSERT INTO profiles (id, name, thresholds_json, polling_interval_secs, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    thresholds_json = excluded.thresholds_json,
                    polling_interval_secs = excluded.polling_interval_secs,
                    updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.name,
                    thresholds_json,
                    record.polling_interval_secs,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_profile(&self, profile_id: &str) -> Result<Option<Profile>> {
        let profile_id = profile_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![profile_id])?;
            let profile = match rows.next()? {
                Some(row) => Some(row_to_profile(row)?),
                None => None,
            };
            Ok(profile)
        })
        .await
    }

    pub async fn get_active_profile(&self) -> Result<Option<Profile>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles WHERE is_active = 1 LIMIT 1"
            ))?;
            let mut rows = stmt.query([])?;
            let profile = match rows.next()? {
                Some(row) => Some(row_to_profile(row)?),
                None => None,
            };
            Ok(profile)
        })
        .await
    }

    /// Makes `profile_id` the only active profile.
    pub async fn set_active_profile(&self, profile_id: &str) -> Result<()> {
        let profile_id = profile_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("UPDATE profiles SET is_active = 0 WHERE is_active = 1", [])?;
            let rows_affected = tx.execute(
                "UPDATE profiles SET is_active = 1, updated_at = ?1 WHERE id = ?2",
                params![format_timestamp(&Utc::now()), profile_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Profile {profile_id} not found"));
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY id ASC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut profiles = Vec::new();
            while let Some(row) = rows.next()? {
                profiles.push(row_to_profile(row)?);
            }
            Ok(profiles)
        })
        .await
    }
}
