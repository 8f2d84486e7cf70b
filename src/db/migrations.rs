use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Schema scripts in order; entry `i` upgrades `user_version` `i` to `i + 1`.
const MIGRATIONS: &[(&str, &str)] = &[
    ("schema_v1.sql", include_str!("schemas/schema_v1.sql")),
    ("schema_v2.sql", include_str!("schemas/schema_v2.sql")),
    ("schema_v3.sql", include_str!("schemas/schema_v3.sql")),
];

fn latest_version() -> i32 {
    MIGRATIONS.len() as i32
}

/// Applies every pending script in one transaction and stamps `user_version`.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("cannot read user_version")?;
    let latest = latest_version();

    if current > latest {
        bail!("store schema v{current} is newer than this build (v{latest})");
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction().context("cannot open migration transaction")?;
    for (name, script) in &MIGRATIONS[current as usize..] {
        tx.execute_batch(script)
            .with_context(|| format!("{name} failed"))?;
    }
    tx.pragma_update(None, "user_version", latest)
        .context("cannot stamp user_version")?;
    tx.commit().context("cannot commit migrations")?;

    log::info!("Store schema migrated v{current} -> v{latest}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(conn: &Connection) -> i32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        assert_eq!(version(&conn), latest_version());

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('readings', 'drive_sessions', 'anomalies', 'statistics',
                              'profiles', 'vehicle_static', 'connection_log', 'cleanup_log')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 8);
    }

    #[test]
    fn upgrades_from_first_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0].1).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();

        run_migrations(&mut conn).unwrap();

        assert_eq!(version(&conn), latest_version());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", latest_version() + 1)
            .unwrap();
        assert!(run_migrations(&mut conn).is_err());
    }
}
