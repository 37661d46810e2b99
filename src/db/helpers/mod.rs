use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::EventKind;

/// Fixed-width RFC 3339 so that text order in SQLite equals time order.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_event_kind(value: &str) -> Result<EventKind> {
    match value {
        "start_game" => Ok(EventKind::StartGame),
        "stop_game" => Ok(EventKind::StopGame),
        "ping" => Ok(EventKind::Ping),
        other => Err(anyhow!("unknown measurement event {other}")),
    }
}

pub fn to_adc(value: i64, field: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| anyhow!("{field} value {value} is not a 16-bit reading"))
}
