use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::db::models::DriveSessionStatus;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Fixed-width RFC 3339 so that string order in SQLite is chronological order.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn format_date(value: &NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").with_context(|| format!("failed to parse {field}"))
}

pub fn parse_session_status(value: &str) -> Result<DriveSessionStatus> {
    match value {
        "Open" => Ok(DriveSessionStatus::Open),
        "Completed" => Ok(DriveSessionStatus::Completed),
        "Interrupted" => Ok(DriveSessionStatus::Interrupted),
        other => Err(anyhow!("unknown drive session status {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexically() {
        let whole = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let fractional = whole + chrono::Duration::milliseconds(250);
        let later = whole + chrono::Duration::seconds(1);

        let a = format_timestamp(&whole);
        let b = format_timestamp(&fractional);
        let c = format_timestamp(&later);
        assert_eq!(a, "2024-05-01T12:00:00.000Z");
        assert!(a < b && b < c);
        assert_eq!(parse_datetime(&b, "ts").unwrap(), fractional);
    }
}
