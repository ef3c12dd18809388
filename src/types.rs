// src/types.rs

//! Shared vocabulary: record kinds and lifecycle statuses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which store a record belongs to.
///
/// - `Job`: local transfer driven by `rsync`.
/// - `Operation`: remote transfer driven by `rclone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Job,
    Operation,
}

impl RecordKind {
    /// Prefix used for generated record IDs.
    pub fn id_prefix(self) -> &'static str {
        match self {
            RecordKind::Job => "job",
            RecordKind::Operation => "rclone",
        }
    }

    /// Top-level key of the persisted JSON document.
    pub fn document_key(self) -> &'static str {
        match self {
            RecordKind::Job => "jobs",
            RecordKind::Operation => "operations",
        }
    }

    /// Human-facing noun used in per-job log lines.
    pub fn noun(self) -> &'static str {
        match self {
            RecordKind::Job => "job",
            RecordKind::Operation => "operation",
        }
    }

    /// Capitalized noun for the start of a sentence.
    pub fn title(self) -> &'static str {
        match self {
            RecordKind::Job => "Job",
            RecordKind::Operation => "Operation",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

/// Lifecycle status of a record.
///
/// Serialized values are lowercase identifiers (`[a-z_]+`) so that UI layers
/// can use them verbatim as CSS classes. Retry attempts are reported in
/// `Progress::retry_attempt`, never by decorating the status. Decorated
/// values found in older documents (`running (retrying...)`) load as their
/// leading identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Status {
    #[default]
    Created,
    Pending,
    PendingRestart,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
    // Operation-only statuses.
    Scanning,
    PendingApproval,
    Initializing,
    PreviewFailed,
}

impl Status {
    pub const ALL: [Status; 12] = [
        Status::Created,
        Status::Pending,
        Status::PendingRestart,
        Status::Running,
        Status::Paused,
        Status::Stopped,
        Status::Completed,
        Status::Failed,
        Status::Scanning,
        Status::PendingApproval,
        Status::Initializing,
        Status::PreviewFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Pending => "pending",
            Status::PendingRestart => "pending_restart",
            Status::Running => "running",
            Status::Paused => "paused",
            Status::Stopped => "stopped",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Scanning => "scanning",
            Status::PendingApproval => "pending_approval",
            Status::Initializing => "initializing",
            Status::PreviewFailed => "preview_failed",
        }
    }

    /// Whether a record in this status implies a live worker should exist.
    ///
    /// Operations have a richer set of transient statuses than jobs.
    pub fn is_transient_for(self, kind: RecordKind) -> bool {
        match kind {
            RecordKind::Job => matches!(self, Status::Running | Status::Paused | Status::Pending),
            RecordKind::Operation => matches!(
                self,
                Status::Running
                    | Status::Paused
                    | Status::Pending
                    | Status::Scanning
                    | Status::PendingApproval
                    | Status::PreviewFailed
                    | Status::Initializing
            ),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Status {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let lowered = raw.trim().to_lowercase();
        let end = lowered
            .find(|c: char| !(c.is_ascii_lowercase() || c == '_'))
            .unwrap_or(lowered.len());
        lowered[..end].parse()
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| format!("invalid status: {wanted}"))
    }
}
