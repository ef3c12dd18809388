// tests/operation_preview.rs
#![cfg(unix)]

mod common;
use crate::common::builders::NewRecordBuilder;
use crate::common::harness::{HarnessBuilder, POLL, wait_for};
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use ferryman::engine::Supervisor;
use ferryman::errors::FerrymanError;
use ferryman::exec::RcloneCommandBuilder;
use ferryman::store::{RecordStore, StoreOptions};
use ferryman::types::{RecordKind, Status};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn successful_preview_waits_for_approval() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(
        RecordKind::Operation,
        "echo 'Transferred:            3 / 10, 30%'; exit 0",
    )
    .build();

    let report = with_timeout(
        h.supervisor
            .submit_with_preview(NewRecordBuilder::operation("previewed", "copy").build()),
    )
    .await?;
    assert_eq!(report.status, Status::PendingApproval);
    assert!(!report.timed_out);
    assert!(report.error_message.is_none());
    assert_eq!(report.stats.files_transferred, Some(3));
    assert_eq!(report.stats.total_files, Some(10));

    let record = h.store().get(&report.id).expect("record kept");
    assert_eq!(record.status, Status::PendingApproval);
    assert!(record.error_message.is_none());
    assert_eq!(record.retry_count, 0);
    assert!(h.supervisor.is_idle());
    assert!(h.supervisor.read_log(&report.id)?.contains("Running preview"));

    assert!(h.supervisor.approve(&report.id).await?);
    let record = with_timeout(h.supervisor.wait_until_idle(&report.id, POLL)).await?;
    assert_eq!(record.status, Status::Completed);
    assert_eq!(h.script.build_count(), 2);
    Ok(())
}

#[tokio::test]
async fn failed_move_preview_keeps_the_record() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Operation, "exit 4").build();

    let report = with_timeout(
        h.supervisor
            .submit_with_preview(NewRecordBuilder::operation("mover", "move").build()),
    )
    .await?;
    assert_eq!(report.status, Status::PreviewFailed);
    let message = report.error_message.as_deref().unwrap_or_default();
    assert!(message.starts_with("Preview failed with return code 4"));
    assert!(message.contains("Move operations may have limited preview functionality"));

    let record = h.store().get(&report.id).expect("record kept");
    assert_eq!(record.status, Status::PreviewFailed);
    assert_eq!(record.return_code, Some(4));
    assert!(h.timer.requested().is_empty(), "previews are never retried");

    assert!(!h.supervisor.approve(&report.id).await?, "only pending_approval can be approved");
    assert_eq!(h.script.build_count(), 1);
    Ok(())
}

#[tokio::test]
async fn preview_that_overruns_its_deadline_fails() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Operation, "sleep 10")
        .preview_timeout(Duration::from_secs(1))
        .build();

    let report = with_timeout(
        h.supervisor
            .submit_with_preview(NewRecordBuilder::operation("slow", "sync").build()),
    )
    .await?;
    assert!(report.timed_out);
    assert_eq!(report.status, Status::PreviewFailed);
    assert_eq!(report.error_message.as_deref(), Some("Preview timed out after 1s"));
    assert!(h.supervisor.is_idle());
    Ok(())
}

#[tokio::test]
async fn preview_can_be_stopped_but_not_paused() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Operation, "sleep 5").build();

    let supervisor = h.supervisor.clone();
    let preview = tokio::spawn(async move {
        supervisor
            .submit_with_preview(NewRecordBuilder::operation("halted", "copy").build())
            .await
    });

    let store = Arc::clone(h.store());
    let supervisor = &h.supervisor;
    let live = || {
        store
            .list()
            .into_iter()
            .find(|r| r.status == Status::Initializing && supervisor.is_running(&r.id))
    };
    with_timeout(wait_for(|| live().is_some())).await;
    let id = live().map(|r| r.id).expect("preview is live");
    // The preview's process is registered once spawned.
    with_timeout(wait_for(|| {
        supervisor
            .read_log(&id)
            .is_ok_and(|log| log.contains("Process started"))
    }))
    .await;

    assert!(!h.supervisor.pause(&id).await?, "an initializing preview is not pausable");
    assert!(with_timeout(h.supervisor.stop(&id)).await?);

    let report = with_timeout(preview).await??;
    assert_eq!(report.status, Status::Stopped);
    assert_eq!(h.store().get(&id).map(|r| r.status), Some(Status::Stopped));
    Ok(())
}

#[tokio::test]
async fn preview_runs_the_tool_in_dry_run_mode() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = RecordStore::open(
        RecordKind::Operation,
        dir.path().join("data").join("records.json"),
        StoreOptions::for_kind(RecordKind::Operation),
    )?;
    // `echo` stands in for rclone and prints the arguments it was given.
    let supervisor = Supervisor::builder(Arc::new(store), dir.path().join("logs"))
        .command_builder(Arc::new(RcloneCommandBuilder::new("echo")))
        .build();

    let report = with_timeout(
        supervisor.submit_with_preview(
            NewRecordBuilder::operation("dry", "copy")
                .option("checksum", serde_json::json!(true))
                .build(),
        ),
    )
    .await?;
    assert_eq!(report.status, Status::PendingApproval);

    let log = supervisor.read_log(&report.id)?;
    let echoed = log
        .lines()
        .find(|l| !l.contains("echo") && l.contains("--dry-run"))
        .expect("tool saw --dry-run");
    assert!(echoed.contains("--stats 0"));
    assert!(echoed.contains("--checksum"));

    let record = supervisor.store().get(&report.id).expect("record kept");
    assert!(record.options.get("dry_run").is_none(), "stored options untouched");
    assert_eq!(record.options.get("checksum"), Some(&serde_json::json!(true)));
    Ok(())
}

#[tokio::test]
async fn jobs_have_no_preview() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "exit 0").build();

    let err = h
        .supervisor
        .submit_with_preview(NewRecordBuilder::job("plain").build())
        .await
        .unwrap_err();
    assert!(matches!(err, FerrymanError::Unsupported(_)));
    assert!(h.store().list().is_empty(), "nothing was created");
    Ok(())
}
