// src/store/record.rs

//! Persisted record shape plus the input and patch types used to create and
//! mutate it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{RecordKind, Status};

use super::compat::StoredRecord;

/// One transfer job (rsync) or operation (rclone).
///
/// Loaded through [`StoredRecord`], which also accepts the older on-disk
/// shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredRecord")]
pub struct Record {
    pub id: String,
    pub name: String,
    pub source: String,
    pub destination: String,

    /// rclone verb (`copy`, `sync`, ...). Always `None` for jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,

    /// Opaque tool options, interpreted only by the command builder.
    pub options: Value,

    pub excludes: Vec<String>,

    pub status: Status,

    pub retry_count: u32,
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
}

pub(super) fn empty_options() -> Value {
    Value::Object(Default::default())
}

impl Record {
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Live progress of the current (or last) execution attempt.
///
/// Every field is optional; see [`Progress::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_transferred: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_transferred: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_files: Option<u64>,
    /// Preformatted "10.5M / 100.0M" style figure from rclone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transferred_display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "super::compat::optional_timestamp"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "super::compat::optional_timestamp"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "super::compat::optional_timestamp"
    )]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "super::compat::optional_timestamp"
    )]
    pub stopped_at: Option<DateTime<Utc>>,
}

macro_rules! merge_fields {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

impl Progress {
    pub fn with_status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Overlay every field that is set in `update`; unset fields keep their
    /// previous values.
    pub fn merge(&mut self, update: &Progress) {
        merge_fields!(
            self,
            update,
            status,
            percent,
            bytes_transferred,
            total_bytes,
            files_transferred,
            total_files,
            transferred_display,
            speed,
            eta,
            retry_attempt,
            started_at,
            completed_at,
            failed_at,
            stopped_at,
        );
    }

    pub fn is_empty(&self) -> bool {
        *self == Progress::default()
    }
}

/// Caller-supplied fields for a new record.
///
/// Identity, status, timestamps and retry counters are assigned by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub name: String,
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub operation_type: Option<String>,
    #[serde(default = "empty_options")]
    pub options: Value,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// A whole-field change set applied under the store lock.
///
/// `progress` is merged into the existing progress rather than replacing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub name: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub options: Option<Value>,
    pub excludes: Option<Vec<String>>,
    pub status: Option<Status>,
    pub retry_count: Option<u32>,
    pub max_retries: Option<u32>,
    pub progress: Option<Progress>,
    /// `Some(None)` clears the message.
    pub error_message: Option<Option<String>>,
    pub return_code: Option<Option<i32>>,
}

impl RecordPatch {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self.return_code = Some(None);
        self
    }

    pub fn apply(&self, record: &mut Record) {
        if let Some(v) = &self.name {
            record.name = v.clone();
        }
        if let Some(v) = &self.source {
            record.source = v.clone();
        }
        if let Some(v) = &self.destination {
            record.destination = v.clone();
        }
        if let Some(v) = &self.options {
            record.options = v.clone();
        }
        if let Some(v) = &self.excludes {
            record.excludes = v.clone();
        }
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = self.retry_count {
            record.retry_count = v;
        }
        if let Some(v) = self.max_retries {
            record.max_retries = v;
        }
        if let Some(update) = &self.progress {
            record
                .progress
                .get_or_insert_with(Progress::default)
                .merge(update);
        }
        if let Some(v) = &self.error_message {
            record.error_message = v.clone();
        }
        if let Some(v) = self.return_code {
            record.return_code = v;
        }
    }
}

/// `job_<uuid-v4>` / `rclone_<uuid-v4>`.
pub fn generate_id(kind: RecordKind) -> String {
    format!("{}_{}", kind.id_prefix(), Uuid::new_v4())
}
