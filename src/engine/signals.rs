// src/engine/signals.rs

//! Stop / pause / resume.
//!
//! Registry state is snapshotted under the lock; signalling and waiting
//! happen after it is released. A group that has already exited counts as
//! the signal having achieved its goal.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::errors::{FerrymanError, Result};
use crate::exec::SignalOutcome;
use crate::store::Progress;
use crate::types::Status;

use super::lifecycle::can_transition;
use super::supervisor::Supervisor;

impl Supervisor {
    /// Stop `id`: cancel, terminate, escalate to kill after the stop
    /// timeout, then give the worker the join timeout to finish.
    ///
    /// A record waiting for an automatic retry is stopped by cancelling the
    /// retry. `Ok(false)` when there is nothing to stop.
    pub async fn stop(&self, id: &str) -> Result<bool> {
        let inner = &self.inner;
        let noun = inner.kind.noun();

        let Some(entry) = inner.registry.snapshot(id) else {
            if inner.registry.cancel_retry(id) {
                inner.log.append(id, "Pending retry cancelled; stopped by user");
                inner.mark_stopped(id)?;
                info!(kind = %inner.kind, id, "pending retry cancelled");
                return Ok(true);
            }
            return Ok(false);
        };

        inner.log.append(id, format!("Stopping {noun} gracefully..."));
        entry.cancel.cancel();

        if let Some(pid) = entry.pid {
            if let Err(e) = inner.controller.terminate(pid) {
                warn!(id, pid, error = %e, "terminate failed");
            }
            // SIGTERM stays pending on a stopped group until it continues.
            if entry.paused {
                if let Err(e) = inner.controller.resume(pid) {
                    warn!(id, pid, error = %e, "continue after terminate failed");
                }
            }
        }

        let mut done = entry.done;
        if !wait_done(&mut done, inner.settings.stop_timeout).await {
            if let Some(pid) = inner.registry.pid(id).or(entry.pid) {
                inner.log.append(
                    id,
                    format!(
                        "{} did not stop within {}s, force killing",
                        inner.kind.title(),
                        inner.settings.stop_timeout.as_secs()
                    ),
                );
                warn!(id, pid, "graceful stop timed out; killing process group");
                if let Err(e) = inner.controller.kill(pid) {
                    warn!(id, pid, error = %e, "kill failed");
                }
            }
            if !wait_done(&mut done, inner.settings.join_timeout).await {
                warn!(id, "worker still running after kill; detaching it");
                inner.log.append(id, "Worker did not finish after kill");
            }
        }

        // An attempt that failed just before the cancel may have queued a retry.
        inner.registry.cancel_retry(id);
        // Frees the ID for a new start even if the worker is stuck.
        inner.registry.unregister(id, entry.generation);
        inner.mark_stopped(id)?;
        inner.log.append(id, format!("{} stopped by user", inner.kind.title()));
        info!(kind = %inner.kind, id, "stopped");
        Ok(true)
    }

    /// Suspend the process group of a live record.
    ///
    /// `Err(Unsupported)` on platforms without group suspension.
    pub async fn pause(&self, id: &str) -> Result<bool> {
        let inner = &self.inner;
        if !inner.controller.supports_pause() {
            return Err(FerrymanError::Unsupported(format!(
                "cannot pause {id}: process suspension is unavailable"
            )));
        }

        let Some(entry) = inner.registry.snapshot(id) else {
            return Ok(false);
        };
        let Some(pid) = entry.pid else {
            return Ok(false);
        };
        if entry.paused || entry.cancel.is_cancelled() {
            return Ok(false);
        }
        // A record that is not in a pausable status (a preview still
        // initializing, an attempt that already settled) is left alone.
        let pausable = inner
            .store
            .get(id)
            .is_some_and(|r| can_transition(r.status, Status::Paused));
        if !pausable {
            return Ok(false);
        }

        if inner.controller.suspend(pid)? == SignalOutcome::AlreadyGone {
            return Ok(false);
        }
        inner.registry.set_paused(id, true);

        // Only a record still in a running state is flipped; an attempt that
        // settled in the meantime keeps its terminal status.
        let updated = inner.store.update_with(id, |r| {
            if can_transition(r.status, Status::Paused) {
                r.status = Status::Paused;
                r.progress
                    .get_or_insert_with(Progress::default)
                    .status = Some(Status::Paused);
            }
        })?;
        if updated.is_some_and(|r| r.status == Status::Paused) {
            inner.log.append(id, format!("{} paused", inner.kind.title()));
            info!(kind = %inner.kind, id, pid, "paused");
        }
        Ok(true)
    }

    /// Continue a paused process group.
    pub async fn resume(&self, id: &str) -> Result<bool> {
        let inner = &self.inner;
        if !inner.controller.supports_pause() {
            return Err(FerrymanError::Unsupported(format!(
                "cannot resume {id}: process suspension is unavailable"
            )));
        }

        let Some(entry) = inner.registry.snapshot(id) else {
            return Ok(false);
        };
        let Some(pid) = entry.pid else {
            return Ok(false);
        };
        if !entry.paused {
            return Ok(false);
        }

        let outcome = inner.controller.resume(pid)?;
        inner.registry.set_paused(id, false);
        if outcome == SignalOutcome::AlreadyGone {
            return Ok(false);
        }

        inner.store.update_with(id, |r| {
            if r.status == Status::Paused {
                r.status = Status::Running;
                r.progress
                    .get_or_insert_with(Progress::default)
                    .status = Some(Status::Running);
            }
        })?;
        inner.log.append(id, format!("{} resumed", inner.kind.title()));
        info!(kind = %inner.kind, id, pid, "resumed");
        Ok(true)
    }
}

/// True once the worker signalled completion (or dropped its sender).
async fn wait_done(done: &mut watch::Receiver<bool>, limit: Duration) -> bool {
    timeout(limit, done.wait_for(|finished| *finished))
        .await
        .is_ok()
}
