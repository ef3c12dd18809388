// src/store/compat.rs

//! Lenient readers for documents written by earlier tools sharing the data
//! directory: naive local timestamps, exclude patterns joined into a single
//! string, and a missing `updated_at`. Records are always written back in the
//! current shape.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::types::Status;

use super::record::{Progress, Record, empty_options};

/// On-disk record as accepted on load; converted into [`Record`].
#[derive(Deserialize)]
pub(super) struct StoredRecord {
    id: String,
    name: String,
    source: String,
    destination: String,
    #[serde(default)]
    operation_type: Option<String>,
    #[serde(default = "empty_options", alias = "rsync_args", alias = "rclone_args")]
    options: Value,
    #[serde(default, deserialize_with = "patterns")]
    excludes: Vec<String>,
    #[serde(default)]
    status: Status,
    #[serde(default)]
    retry_count: u32,
    max_retries: u32,
    #[serde(deserialize_with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    progress: Option<Progress>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    return_code: Option<i32>,
}

impl From<StoredRecord> for Record {
    fn from(stored: StoredRecord) -> Self {
        Record {
            id: stored.id,
            name: stored.name,
            source: stored.source,
            destination: stored.destination,
            operation_type: stored.operation_type,
            options: stored.options,
            excludes: stored.excludes,
            status: stored.status,
            retry_count: stored.retry_count,
            max_retries: stored.max_retries,
            created_at: stored.created_at,
            // Never updated since creation.
            updated_at: stored.updated_at.unwrap_or(stored.created_at),
            progress: stored.progress,
            error_message: stored.error_message,
            return_code: stored.return_code,
        }
    }
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` read as local time.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

pub(super) fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Patterns {
    List(Vec<String>),
    Joined(String),
}

/// A list of patterns, or one whitespace-separated string of them.
fn patterns<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Patterns>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Patterns::List(list)) => list,
        Some(Patterns::Joined(joined)) => joined.split_whitespace().map(str::to_string).collect(),
    })
}
