// src/engine/supervisor.rs

//! Process Supervisor.
//!
//! Each started record gets one detached worker task that builds the argv,
//! runs the attempt through [`run_process`], persists progress as output
//! arrives and settles the record when the attempt ends. Failed attempts are
//! handed to the retry scheduler, which re-enters the same worker routine.
//!
//! Control operations return `Ok(false)` when they do not apply (unknown ID,
//! already running, nothing to stop) and `Err` only for real faults such as
//! a failed store write.

use std::collections::HashSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigFile, KindSection};
use crate::errors::{FerrymanError, Result};
use crate::exec::progress::parse_line;
use crate::exec::{
    AttemptOutcome, CommandBuilder, ExecEvent, JobLog, ProcessController, RcloneCommandBuilder,
    RsyncCommandBuilder, SignalController, run_process,
};
use crate::store::{NewRecord, Progress, Record, RecordPatch, RecordStore, StoreOptions};
use crate::types::{RecordKind, Status};
use crate::validate::validate_new_record;

use super::ProgressCallback;
use super::lifecycle::{self, Settlement, can_transition};
use super::registry::{LiveRegistry, Registration};
use super::retry::{RetryTask, RetryTimer, TokioRetryTimer, backoff_delay};

/// Timing knobs for one supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Upper bound on the retry backoff.
    pub backoff_cap: Duration,
    /// Wait after terminate before kill (stop and worker cleanup).
    pub stop_timeout: Duration,
    /// Wait for the worker to finish after kill.
    pub join_timeout: Duration,
    /// Age after which an untracked transient operation counts as a zombie.
    pub zombie_grace: Duration,
    /// Deadline for an operation's dry-run preview.
    pub preview_timeout: Duration,
}

impl SupervisorSettings {
    pub fn for_kind(kind: RecordKind) -> Self {
        Self::from_config(&ConfigFile::default(), kind)
    }

    pub fn from_config(cfg: &ConfigFile, kind: RecordKind) -> Self {
        Self {
            backoff_cap: cfg.kind(kind).backoff_cap(),
            stop_timeout: cfg.config.stop_timeout(),
            join_timeout: cfg.config.join_timeout(),
            zombie_grace: cfg.config.zombie_grace(),
            preview_timeout: cfg.config.preview_timeout(),
        }
    }
}

pub(super) struct Inner {
    pub(super) kind: RecordKind,
    pub(super) store: Arc<RecordStore>,
    pub(super) log: JobLog,
    pub(super) command: Arc<dyn CommandBuilder>,
    pub(super) controller: Arc<dyn ProcessController>,
    pub(super) timer: Arc<dyn RetryTimer>,
    pub(super) registry: LiveRegistry,
    pub(super) settings: SupervisorSettings,
}

/// Cheap to clone; clones share workers and registry.
#[derive(Clone)]
pub struct Supervisor {
    pub(super) inner: Arc<Inner>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("kind", &self.inner.kind)
            .field("store", &self.inner.store.path())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

pub struct SupervisorBuilder {
    store: Arc<RecordStore>,
    log_dir: PathBuf,
    command: Option<Arc<dyn CommandBuilder>>,
    controller: Option<Arc<dyn ProcessController>>,
    timer: Option<Arc<dyn RetryTimer>>,
    settings: SupervisorSettings,
}

impl SupervisorBuilder {
    pub fn command_builder(mut self, command: Arc<dyn CommandBuilder>) -> Self {
        self.command = Some(command);
        self
    }

    pub fn controller(mut self, controller: Arc<dyn ProcessController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn retry_timer(mut self, timer: Arc<dyn RetryTimer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Supervisor {
        let kind = self.store.kind();
        let command = self.command.unwrap_or_else(|| default_command_builder(kind, None));
        Supervisor {
            inner: Arc::new(Inner {
                kind,
                store: self.store,
                log: JobLog::new(self.log_dir),
                command,
                controller: self
                    .controller
                    .unwrap_or_else(|| Arc::new(SignalController)),
                timer: self.timer.unwrap_or_else(|| Arc::new(TokioRetryTimer)),
                registry: LiveRegistry::new(),
                settings: self.settings,
            }),
        }
    }
}

fn default_command_builder(kind: RecordKind, section: Option<&KindSection>) -> Arc<dyn CommandBuilder> {
    match (kind, section) {
        (RecordKind::Job, Some(s)) => Arc::new(RsyncCommandBuilder::new(s.binary.as_str())),
        (RecordKind::Job, None) => Arc::new(RsyncCommandBuilder::default()),
        (RecordKind::Operation, Some(s)) => Arc::new(RcloneCommandBuilder::new(s.binary.as_str())),
        (RecordKind::Operation, None) => Arc::new(RcloneCommandBuilder::default()),
    }
}

impl Supervisor {
    pub fn builder(store: Arc<RecordStore>, log_dir: impl Into<PathBuf>) -> SupervisorBuilder {
        let settings = SupervisorSettings::for_kind(store.kind());
        SupervisorBuilder {
            store,
            log_dir: log_dir.into(),
            command: None,
            controller: None,
            timer: None,
            settings,
        }
    }

    /// Open the store for `kind` and wire a supervisor from configuration.
    pub fn from_config(cfg: &ConfigFile, kind: RecordKind) -> Result<Self> {
        let section = cfg.kind(kind);
        let store = RecordStore::open(
            kind,
            cfg.store_path(kind),
            StoreOptions {
                backup_count: cfg.config.backup_count,
                default_max_retries: section.max_retries,
            },
        )?;

        Ok(Self::builder(Arc::new(store), cfg.config.log_dir.clone())
            .command_builder(default_command_builder(kind, Some(section)))
            .settings(SupervisorSettings::from_config(cfg, kind))
            .build())
    }

    pub fn kind(&self) -> RecordKind {
        self.inner.kind
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.inner.store
    }

    pub fn settings(&self) -> SupervisorSettings {
        self.inner.settings
    }

    /// Validate and persist a new record. Returns its ID.
    pub fn submit(&self, new: NewRecord) -> Result<String> {
        validate_new_record(self.inner.kind, &new)?;
        let name = new.name.clone();
        let id = self.inner.store.create(new)?;
        self.inner
            .log
            .append(&id, format!("{} created: {name}", self.inner.kind.title()));
        info!(kind = %self.inner.kind, %id, "record submitted");
        Ok(id)
    }

    pub async fn start(&self, id: &str) -> Result<bool> {
        self.start_with_callback(id, None).await
    }

    /// Start a fresh execution of `id`.
    ///
    /// `Ok(false)` when the record does not exist or already has a live
    /// worker. Any pending automatic retry is superseded.
    pub async fn start_with_callback(
        &self,
        id: &str,
        callback: Option<ProgressCallback>,
    ) -> Result<bool> {
        let inner = &self.inner;
        let Some(record) = inner.store.get(id) else {
            warn!(kind = %inner.kind, id, "start requested for unknown record");
            return Ok(false);
        };

        if inner.registry.cancel_retry(id) {
            debug!(id, "pending retry superseded by manual start");
        }
        let Some(registration) = inner.registry.try_register(id) else {
            info!(kind = %inner.kind, id, "already running; start ignored");
            return Ok(false);
        };
        if let Some(callback) = callback {
            inner.registry.set_callback(id, callback);
        }

        let reset = inner.store.update_with(id, |r| {
            r.retry_count = 0;
            r.progress = None;
            r.error_message = None;
            r.return_code = None;
        });
        if let Err(e) = reset {
            inner.registry.unregister(id, registration.generation);
            return Err(e);
        }

        inner
            .log
            .append(id, format!("Starting {}: {}", inner.kind.noun(), record.name));
        Arc::clone(inner).spawn_worker(id.to_string(), registration, None);
        Ok(true)
    }

    /// Mark `id` as `pending_restart`, then start it.
    pub async fn restart(&self, id: &str) -> Result<bool> {
        let inner = &self.inner;
        if inner.registry.contains(id) {
            info!(id, "restart ignored; record is live");
            return Ok(false);
        }
        let marked = inner.store.update_with(id, |r| {
            if can_transition(r.status, Status::PendingRestart) {
                r.status = Status::PendingRestart;
            }
        })?;
        if marked.is_none() {
            return Ok(false);
        }
        inner.log.append(id, "Restart requested");
        self.start(id).await
    }

    /// Start every failed record that still has retry budget.
    pub async fn restart_failed(&self) -> Result<usize> {
        let mut restarted = 0;
        for record in self.inner.store.list_by_status(Status::Failed) {
            if !record.has_retry_budget() {
                continue;
            }
            if self.start(&record.id).await? {
                restarted += 1;
            }
        }
        info!(kind = %self.inner.kind, restarted, "restart of failed records finished");
        Ok(restarted)
    }

    /// Release an operation waiting in `pending_approval` and start it.
    pub async fn approve(&self, id: &str) -> Result<bool> {
        let inner = &self.inner;
        if inner.kind != RecordKind::Operation {
            return Ok(false);
        }
        let Some(record) = inner.store.get(id) else {
            return Ok(false);
        };
        if record.status != Status::PendingApproval {
            info!(id, status = %record.status, "approve ignored; not awaiting approval");
            return Ok(false);
        }
        inner
            .store
            .update(id, RecordPatch::status(Status::Created))?;
        inner.log.append(id, "Operation approved");
        self.start(id).await
    }

    /// Stop if live, drop any pending retry, then remove the record.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        if self.inner.registry.contains(id) {
            self.stop(id).await?;
        }
        self.inner.registry.cancel_retry(id);
        self.inner.registry.remove_callback(id);
        let deleted = self.inner.store.delete(id)?;
        if deleted {
            info!(kind = %self.inner.kind, id, "record deleted");
        }
        Ok(deleted)
    }

    /// Register (or replace) the progress callback for `id`.
    pub fn set_progress_callback(&self, id: &str, callback: ProgressCallback) {
        self.inner.registry.set_callback(id, callback);
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.inner.registry.contains(id)
    }

    pub fn is_paused(&self, id: &str) -> bool {
        self.inner.registry.is_paused(id)
    }

    pub fn has_pending_retry(&self, id: &str) -> bool {
        self.inner.registry.has_retry(id)
    }

    /// Attempt number of the retry `id` is waiting on, if any.
    pub fn pending_retry_attempt(&self, id: &str) -> Option<u32> {
        self.inner.registry.pending_retry_attempt(id)
    }

    pub fn is_idle(&self) -> bool {
        self.inner.registry.is_idle()
    }

    pub fn running_ids(&self) -> HashSet<String> {
        self.inner.registry.live_ids()
    }

    /// Path of the append-only log for `id`.
    pub fn log_file(&self, id: &str) -> PathBuf {
        self.inner.log.path_for(id)
    }

    pub fn log_dir(&self) -> &Path {
        self.inner.log.dir()
    }

    pub fn read_log(&self, id: &str) -> Result<String> {
        self.inner.log.read(id)
    }

    /// Wait until `id` has neither a live worker nor a pending retry, then
    /// return the record as persisted.
    pub async fn wait_until_idle(&self, id: &str, poll: Duration) -> Result<Record> {
        loop {
            if !self.is_running(id) && !self.has_pending_retry(id) {
                return self
                    .inner
                    .store
                    .get(id)
                    .ok_or_else(|| FerrymanError::NotFound(id.to_string()));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

impl Inner {
    fn spawn_worker(self: Arc<Self>, id: String, registration: Registration, attempt: Option<u32>) {
        tokio::spawn(self.execute(id, registration, attempt));
    }

    /// One full attempt: run, settle, clean up, maybe schedule a retry.
    async fn execute(self: Arc<Self>, id: String, registration: Registration, attempt: Option<u32>) {
        let Registration {
            generation,
            cancel,
            done,
        } = registration;

        // Re-read: the record may have been edited since it was scheduled.
        let outcome = match self.store.get(&id) {
            Some(record) => self
                .run_attempt(&id, generation, &cancel, &record, attempt)
                .await
                .map_err(|e| format!("{e:#}")),
            None => Err("record no longer exists".to_string()),
        };
        if let Err(e) = &outcome {
            error!(kind = %self.kind, %id, error = %e, "execution attempt failed");
        }

        let settlement = lifecycle::settle(self.kind, &outcome);
        self.log.append(&id, &settlement.log_line);
        self.persist_settlement(&id, &settlement);

        // Queued before the ID is released so the record never looks idle
        // between attempts.
        if settlement.retry {
            self.schedule_retry(&id);
        }

        self.registry.unregister(&id, generation);
        let _ = done.send(true);
    }

    async fn run_attempt(
        self: &Arc<Self>,
        id: &str,
        generation: u64,
        cancel: &CancellationToken,
        record: &Record,
        attempt: Option<u32>,
    ) -> anyhow::Result<AttemptOutcome> {
        let argv = self.command.build(record)?;
        self.log.append(id, format!("Command: {}", argv.join(" ")));

        let (tx, mut rx) = mpsc::channel(256);
        let runner = tokio::spawn(run_process(
            argv,
            cancel.clone(),
            tx,
            Arc::clone(&self.controller),
            self.settings.stop_timeout,
        ));

        while let Some(event) = rx.recv().await {
            match event {
                ExecEvent::Spawned { pid } => self.on_spawned(id, generation, pid, attempt),
                ExecEvent::Line(line) => self.on_line(id, &line),
            }
        }

        runner.await.context("process runner task failed")?
    }

    fn on_spawned(&self, id: &str, generation: u64, pid: u32, attempt: Option<u32>) {
        self.registry.set_pid(id, generation, pid);
        self.log.append(id, format!("Process started (pid {pid})"));

        let progress = Progress {
            status: Some(Status::Running),
            percent: Some(0),
            retry_attempt: attempt,
            started_at: Some(Utc::now()),
            ..Progress::default()
        };
        self.persist(id, RecordPatch::status(Status::Running).with_progress(progress));
    }

    fn on_line(&self, id: &str, line: &str) {
        self.log.append(id, line);

        let Some(mut update) = parse_line(self.kind, line) else {
            return;
        };
        // A buffered line must not flip a paused record back to running.
        if self.registry.is_paused(id) {
            update.status = None;
            if update.is_empty() {
                return;
            }
        }

        let patch = RecordPatch {
            status: update.status,
            progress: Some(update),
            ..RecordPatch::default()
        };
        self.persist(id, patch);
    }

    /// Apply `patch` and notify the progress callback; store faults are
    /// logged, never raised into the worker.
    pub(super) fn persist(&self, id: &str, patch: RecordPatch) {
        match self.store.update(id, patch) {
            Ok(Some(record)) => self.notify(&record),
            Ok(None) => {}
            Err(e) => warn!(kind = %self.kind, id, error = %e, "failed to persist record update"),
        }
    }

    fn notify(&self, record: &Record) {
        let (Some(callback), Some(progress)) =
            (self.registry.callback(&record.id), record.progress.as_ref())
        else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(&record.id, progress))).is_err() {
            warn!(id = %record.id, "progress callback panicked");
        }
    }

    fn persist_settlement(&self, id: &str, settlement: &Settlement) {
        let now = Utc::now();
        let mut progress = Progress::with_status(settlement.status);
        match settlement.status {
            Status::Completed => {
                progress.percent = Some(100);
                progress.completed_at = Some(now);
            }
            Status::Failed => progress.failed_at = Some(now),
            Status::Stopped => progress.stopped_at = Some(now),
            _ => {}
        }

        let mut patch = RecordPatch::status(settlement.status).with_progress(progress);
        patch.error_message = Some(settlement.error_message.clone());
        patch.return_code = Some(settlement.return_code);
        self.persist(id, patch);
    }

    /// Persist `stopped` with a stop timestamp.
    pub(super) fn mark_stopped(&self, id: &str) -> Result<()> {
        let progress = Progress {
            stopped_at: Some(Utc::now()),
            ..Progress::with_status(Status::Stopped)
        };
        let updated = self
            .store
            .update(id, RecordPatch::status(Status::Stopped).with_progress(progress))?;
        if let Some(record) = updated {
            self.notify(&record);
        }
        Ok(())
    }

    /// Retry Scheduler entry point, called after a failed attempt settled.
    fn schedule_retry(self: &Arc<Self>, id: &str) {
        let Some(record) = self.store.get(id) else {
            return;
        };
        if !record.has_retry_budget() {
            self.log.append(
                id,
                format!("Max retries ({}) exceeded, giving up", record.max_retries),
            );
            info!(kind = %self.kind, id, max_retries = record.max_retries, "retry budget exhausted");
            return;
        }

        let delay = backoff_delay(record.retry_count, self.settings.backoff_cap);
        let attempt = match self.store.increment_retry_count(id) {
            Ok(Some(count)) => count,
            Ok(None) => return,
            Err(e) => {
                error!(kind = %self.kind, id, error = %e, "failed to record retry; not retrying");
                return;
            }
        };

        let task = RetryTask {
            id: id.to_string(),
            attempt,
            max_retries: record.max_retries,
            delay,
        };
        self.log.append(
            id,
            format!(
                "Scheduling retry {}/{} in {}s",
                task.attempt,
                task.max_retries,
                delay.as_secs()
            ),
        );
        info!(kind = %self.kind, id, attempt, delay_secs = delay.as_secs(), "retry scheduled");

        let ticket = self.registry.insert_retry(id, attempt);
        let sleep = self.timer.sleep(delay);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = ticket.cancel.cancelled() => {
                    debug!(id = %task.id, "retry cancelled before firing");
                }
                _ = sleep => inner.fire_retry(task, ticket.ticket),
            }
        });
    }

    fn fire_retry(self: Arc<Self>, task: RetryTask, ticket: u64) {
        let Some(registration) = self.registry.promote_retry(&task.id, ticket) else {
            debug!(id = %task.id, "retry superseded or cancelled");
            return;
        };
        if self.store.get(&task.id).is_none() {
            warn!(id = %task.id, "record deleted while waiting; retry abandoned");
            self.registry.unregister(&task.id, registration.generation);
            return;
        }

        let attempt = task.attempt;
        let marked = self.store.update_with(&task.id, |r| {
            r.status = Status::Running;
            r.error_message = None;
            r.return_code = None;
            r.progress = Some(Progress {
                retry_attempt: Some(attempt),
                ..Progress::with_status(Status::Running)
            });
        });
        if let Err(e) = marked {
            error!(id = %task.id, error = %e, "failed to mark retry running; abandoning");
            self.registry.unregister(&task.id, registration.generation);
            return;
        }

        self.log.append(
            &task.id,
            format!("Retry attempt {}/{}", attempt, task.max_retries),
        );
        self.spawn_worker(task.id, registration, Some(attempt));
    }
}
