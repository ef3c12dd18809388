// src/engine/lifecycle.rs

//! Pure lifecycle rules: which status changes are legal and how a finished
//! attempt settles. No I/O here; the supervisor applies the results.
//!
//! ```text
//! created ──start──▶ running ──exit 0──▶ completed
//!                     │  ▲  ──exit≠0───▶ failed ──retry/restart──▶ running
//!               pause │  │ resume        (scanning pauses the same way
//!                     ▼  │               and resumes as running)
//!                    paused ──stop──▶ stopped
//! ```

use std::time::Duration;

use crate::exec::AttemptOutcome;
use crate::types::{RecordKind, Status};

/// Whether `from -> to` is a legal lifecycle move.
pub fn can_transition(from: Status, to: Status) -> bool {
    use Status::*;
    match (from, to) {
        (Running | Scanning, Paused) => true,
        (Paused, Running) => true,
        (Running | Paused | Scanning, Stopped) => true,
        (Running | Scanning, Completed | Failed) => true,
        (Scanning, Running) | (Running, Scanning) => true,
        // Anything not currently live may be (re)started.
        (from, Running) => !matches!(from, Running | Paused | Scanning),
        // Administrative moves used by restart / approve / reconcile.
        (_, PendingRestart | Created) => !matches!(from, Running | Paused | Scanning),
        (_, Failed) => from.is_transient_for(RecordKind::Operation),
        _ => false,
    }
}

/// How a finished attempt is written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub status: Status,
    pub error_message: Option<String>,
    pub return_code: Option<i32>,
    /// Whether the retry scheduler should consider another attempt.
    pub retry: bool,
    /// Line appended to the record's log.
    pub log_line: String,
}

/// Settle an attempt. `Err` carries the spawn/runtime failure text.
pub fn settle(kind: RecordKind, outcome: &Result<AttemptOutcome, String>) -> Settlement {
    let noun = kind.title();
    match outcome {
        Ok(AttemptOutcome::Exited(0)) => Settlement {
            status: Status::Completed,
            error_message: None,
            return_code: Some(0),
            retry: false,
            log_line: format!("{noun} completed successfully"),
        },
        Ok(AttemptOutcome::Exited(code)) => {
            let message = format!("{noun} failed with return code {code}");
            Settlement {
                status: Status::Failed,
                error_message: Some(message.clone()),
                return_code: Some(*code),
                retry: true,
                log_line: message,
            }
        }
        // Killed from outside with no exit code: surfaced, not retried.
        Ok(AttemptOutcome::Died) => {
            let message = format!("{noun} process died unexpectedly");
            Settlement {
                status: Status::Failed,
                error_message: Some(message.clone()),
                return_code: None,
                retry: false,
                log_line: message,
            }
        }
        Ok(AttemptOutcome::Cancelled) => Settlement {
            status: Status::Stopped,
            error_message: None,
            return_code: None,
            retry: false,
            log_line: format!("{noun} stopped"),
        },
        Err(error) => {
            let message = format!("{noun} execution error: {error}");
            Settlement {
                status: Status::Failed,
                error_message: Some(message.clone()),
                return_code: None,
                retry: true,
                log_line: message,
            }
        }
    }
}

/// Settle a dry-run preview of an operation.
///
/// `timed_out_after` is set when the preview was cancelled by its own
/// deadline rather than by a stop request. Previews never retry.
pub fn settle_preview(
    operation_type: Option<&str>,
    outcome: &Result<AttemptOutcome, String>,
    timed_out_after: Option<Duration>,
) -> Settlement {
    let failure = match (outcome, timed_out_after) {
        (_, Some(limit)) => format!("Preview timed out after {}s", limit.as_secs()),
        (Ok(AttemptOutcome::Exited(0)), None) => {
            return Settlement {
                status: Status::PendingApproval,
                error_message: None,
                return_code: Some(0),
                retry: false,
                log_line: "Preview completed; awaiting approval".to_string(),
            };
        }
        (Ok(AttemptOutcome::Cancelled), None) => {
            return Settlement {
                status: Status::Stopped,
                error_message: None,
                return_code: None,
                retry: false,
                log_line: "Preview stopped".to_string(),
            };
        }
        (Ok(AttemptOutcome::Exited(code)), None) => {
            format!("Preview failed with return code {code}")
        }
        (Ok(AttemptOutcome::Died), None) => "Preview process died unexpectedly".to_string(),
        (Err(error), None) => format!("Preview execution error: {error}"),
    };

    let message = if operation_type == Some("move") {
        format!("{failure}. Move operations may have limited preview functionality.")
    } else {
        failure
    };
    Settlement {
        status: Status::PreviewFailed,
        error_message: Some(message.clone()),
        return_code: match outcome {
            Ok(AttemptOutcome::Exited(code)) if timed_out_after.is_none() => Some(*code),
            _ => None,
        },
        retry: false,
        log_line: message,
    }
}
