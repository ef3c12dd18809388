// src/engine/preview.rs

//! Dry-run previews for operations.
//!
//! A previewed operation is created as `initializing`, run once with
//! `--dry-run` and end-of-run stats, then parked in `pending_approval` (or
//! `preview_failed`) until someone approves or starts it. The stored options
//! are never modified; the dry-run flags only go into the preview's argv.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info};

use crate::errors::{FerrymanError, Result};
use crate::exec::progress::parse_line;
use crate::exec::{AttemptOutcome, ExecEvent, run_process};
use crate::store::{NewRecord, Progress, Record, RecordPatch};
use crate::types::{RecordKind, Status};

use super::lifecycle::settle_preview;
use super::supervisor::Supervisor;

/// What a preview found out.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewReport {
    pub id: String,
    /// `pending_approval`, `preview_failed`, or `stopped` if it was stopped
    /// while running.
    pub status: Status,
    /// Counters parsed from the dry-run output.
    pub stats: Progress,
    pub error_message: Option<String>,
    pub timed_out: bool,
}

impl Supervisor {
    /// Create an operation and run a dry-run preview of it before anything
    /// is transferred.
    ///
    /// The record is kept whatever the preview outcome; a failed preview can
    /// still be started by hand.
    pub async fn submit_with_preview(&self, new: NewRecord) -> Result<PreviewReport> {
        let inner = &self.inner;
        if inner.kind != RecordKind::Operation {
            return Err(FerrymanError::Unsupported(format!(
                "{} records have no preview step",
                inner.kind.noun()
            )));
        }

        let id = self.submit(new)?;
        let Some(record) = inner
            .store
            .update(&id, RecordPatch::status(Status::Initializing))?
        else {
            return Err(FerrymanError::NotFound(id));
        };
        let Some(registration) = inner.registry.try_register(&id) else {
            return Err(FerrymanError::IdCollision(id));
        };

        let argv = match inner.command.build(&preview_copy(&record)) {
            Ok(argv) => argv,
            Err(e) => {
                inner.registry.unregister(&id, registration.generation);
                return self.finish_preview(&id, Err(format!("{e:#}")), false, Progress::default());
            }
        };
        inner.log.append(&id, "Running preview (dry run)");
        inner.log.append(&id, format!("Command: {}", argv.join(" ")));
        info!(%id, "operation preview started");

        let (tx, mut rx) = mpsc::channel(256);
        let runner = tokio::spawn(run_process(
            argv,
            registration.cancel.clone(),
            tx,
            Arc::clone(&inner.controller),
            inner.settings.stop_timeout,
        ));

        let mut stats = Progress::default();
        let mut timed_out = false;
        let deadline = sleep(inner.settings.preview_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(ExecEvent::Spawned { pid }) => {
                        inner.registry.set_pid(&id, registration.generation, pid);
                        inner.log.append(&id, format!("Process started (pid {pid})"));
                    }
                    Some(ExecEvent::Line(line)) => {
                        inner.log.append(&id, &line);
                        if let Some(update) = parse_line(inner.kind, &line) {
                            stats.merge(&update);
                        }
                    }
                    None => break,
                },
                _ = &mut deadline, if !timed_out => {
                    timed_out = true;
                    registration.cancel.cancel();
                }
            }
        }

        let outcome = match runner.await {
            Ok(result) => result.map_err(|e| format!("{e:#}")),
            Err(e) => Err(format!("process runner task failed: {e}")),
        };
        inner.registry.unregister(&id, registration.generation);
        let _ = registration.done.send(true);

        self.finish_preview(&id, outcome, timed_out, stats)
    }

    fn finish_preview(
        &self,
        id: &str,
        outcome: std::result::Result<AttemptOutcome, String>,
        timed_out: bool,
        mut stats: Progress,
    ) -> Result<PreviewReport> {
        let inner = &self.inner;
        if let Err(e) = &outcome {
            error!(%id, error = %e, "preview attempt failed");
        }

        let operation_type = inner.store.get(id).and_then(|r| r.operation_type);
        let limit = timed_out.then_some(inner.settings.preview_timeout);
        let settlement = settle_preview(operation_type.as_deref(), &outcome, limit);
        inner.log.append(id, &settlement.log_line);

        // Stop already persisted `stopped`.
        if settlement.status != Status::Stopped {
            stats.status = Some(settlement.status);
            let patch = RecordPatch::status(settlement.status).with_progress(stats.clone());
            let patch = match &settlement.error_message {
                Some(message) => RecordPatch {
                    return_code: Some(settlement.return_code),
                    ..patch.with_error(message.clone())
                },
                None => patch.clear_error(),
            };
            inner.store.update(id, patch)?;
        }
        info!(%id, status = %settlement.status, timed_out, "operation preview finished");

        Ok(PreviewReport {
            id: id.to_string(),
            status: settlement.status,
            stats,
            error_message: settlement.error_message,
            timed_out,
        })
    }
}

/// The record as the preview runs it: dry run, stats printed once at the end.
fn preview_copy(record: &Record) -> Record {
    let mut options = match &record.options {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    options.insert("dry_run".to_string(), Value::Bool(true));
    options.insert("stats".to_string(), Value::Bool(true));
    options.insert("stats_interval".to_string(), Value::String("0".to_string()));

    Record {
        options: Value::Object(options),
        ..record.clone()
    }
}
