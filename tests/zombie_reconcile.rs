// tests/zombie_reconcile.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, NewRecordBuilder};
use crate::common::harness::HarnessBuilder;
use crate::common::init_tracing;

use std::error::Error;
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use ferryman::Ferryman;
use ferryman::store::{RecordPatch, RecordStore, StoreOptions};
use ferryman::types::{RecordKind, Status};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn untracked_running_jobs_fail_immediately() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "exit 0").build();
    let store = h.store();

    let running = store.create(NewRecordBuilder::job("running").build())?;
    let paused = store.create(NewRecordBuilder::job("paused").build())?;
    let done = store.create(NewRecordBuilder::job("done").build())?;
    store.update(&running, RecordPatch::status(Status::Running))?;
    store.update(&paused, RecordPatch::status(Status::Paused))?;
    store.update(&done, RecordPatch::status(Status::Completed))?;

    assert_eq!(h.supervisor.reconcile_zombies()?, 2);

    let record = store.get(&running).expect("record kept");
    assert_eq!(record.status, Status::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("Job was running but no worker is tracking it (supervisor restarted?)")
    );
    assert!(record.progress.and_then(|p| p.failed_at).is_some());
    assert_eq!(store.get(&paused).map(|r| r.status), Some(Status::Failed));
    assert_eq!(store.get(&done).map(|r| r.status), Some(Status::Completed));

    assert_eq!(h.supervisor.reconcile_zombies()?, 0, "second pass is a no-op");
    Ok(())
}

#[test]
fn operations_get_a_grace_period() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Operation, "exit 0")
        .zombie_grace(Duration::from_secs(3600))
        .build();
    let store = h.store();

    let scanning = store.create(NewRecordBuilder::operation("scan", "sync").build())?;
    let approval = store.create(NewRecordBuilder::operation("ask", "sync").build())?;
    store.update(&scanning, RecordPatch::status(Status::Scanning))?;
    store.update(&approval, RecordPatch::status(Status::PendingApproval))?;

    assert_eq!(h.supervisor.reconcile_zombies()?, 0);
    assert_eq!(store.get(&scanning).map(|r| r.status), Some(Status::Scanning));

    let later = Utc::now() + TimeDelta::hours(2);
    assert_eq!(h.supervisor.reconcile_zombies_at(later)?, 2);
    let record = store.get(&approval).expect("record kept");
    assert_eq!(record.status, Status::Failed);
    assert!(
        record
            .error_message
            .as_deref()
            .is_some_and(|m| m.starts_with("Operation was pending_approval"))
    );
    Ok(())
}

#[test]
fn opening_the_app_reconciles_leftovers() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let cfg = ConfigFileBuilder::new(dir.path()).build();

    let id = {
        let store = RecordStore::open(
            RecordKind::Job,
            cfg.store_path(RecordKind::Job),
            StoreOptions::for_kind(RecordKind::Job),
        )?;
        let id = store.create(NewRecordBuilder::job("orphan").build())?;
        store.update(&id, RecordPatch::status(Status::Running))?;
        id
    };

    let app = Ferryman::open(&cfg)?;
    let record = app.jobs.store().get(&id).expect("record kept");
    assert_eq!(record.status, Status::Failed);
    assert!(app.is_idle());
    assert!(app.owner_of(&id).is_some_and(|s| s.kind() == RecordKind::Job));

    let log = app.jobs.read_log(&id)?;
    assert!(log.contains("no worker is tracking it"));
    Ok(())
}
