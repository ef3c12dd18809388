// src/engine/reconcile.rs

//! Zombie reconciliation: records whose status implies a live worker that
//! this process does not have.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use crate::errors::Result;
use crate::store::{Progress, RecordPatch};
use crate::types::{RecordKind, Status};

use super::supervisor::Supervisor;

impl Supervisor {
    /// Mark untracked transient records `failed`. Returns how many changed.
    ///
    /// Jobs are reclassified immediately. Operations are left alone until
    /// they are older than the zombie grace period, since some transient
    /// operation statuses (awaiting approval, previewing) legitimately sit
    /// without a worker for a while.
    pub fn reconcile_zombies(&self) -> Result<usize> {
        self.reconcile_zombies_at(Utc::now())
    }

    /// [`reconcile_zombies`](Self::reconcile_zombies) against a fixed clock.
    pub fn reconcile_zombies_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let inner = &self.inner;
        let grace = TimeDelta::from_std(inner.settings.zombie_grace).unwrap_or(TimeDelta::MAX);
        let live = inner.registry.live_ids();

        let mut reclassified = 0;
        for record in inner.store.list() {
            if !record.status.is_transient_for(inner.kind)
                || live.contains(&record.id)
                || inner.registry.has_retry(&record.id)
            {
                continue;
            }
            if inner.kind == RecordKind::Operation && now - record.created_at <= grace {
                continue;
            }

            let message = format!(
                "{} was {} but no worker is tracking it (supervisor restarted?)",
                inner.kind.title(),
                record.status
            );
            let progress = Progress {
                failed_at: Some(now),
                ..Progress::with_status(Status::Failed)
            };
            let patch = RecordPatch::status(Status::Failed)
                .with_progress(progress)
                .with_error(message.clone());

            if inner.store.update(&record.id, patch)?.is_some() {
                warn!(kind = %inner.kind, id = %record.id, was = %record.status, "zombie reclassified as failed");
                inner.log.append(&record.id, &message);
                reclassified += 1;
            }
        }

        if reclassified > 0 {
            info!(kind = %inner.kind, reclassified, "zombie reconciliation finished");
        }
        Ok(reclassified)
    }
}
