// tests/supervisor_lifecycle.rs
#![cfg(unix)]

mod common;
use crate::common::builders::NewRecordBuilder;
use crate::common::harness::{HarnessBuilder, POLL, wait_for};
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;

use ferryman::engine::{ProgressCallback, Supervisor};
use ferryman::errors::FerrymanError;
use ferryman::exec::RsyncCommandBuilder;
use ferryman::store::{Progress, RecordPatch};
use ferryman::types::{RecordKind, Status};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn successful_attempt_completes_without_retry() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(
        RecordKind::Job,
        "echo 'sent 2,048 bytes  received 35 bytes'; exit 0",
    )
    .build();
    let id = h
        .supervisor
        .submit(NewRecordBuilder::job("ok").max_retries(0).build())?;

    assert!(h.supervisor.start(&id).await?);
    let record = with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;

    assert_eq!(record.status, Status::Completed);
    assert_eq!(record.return_code, Some(0));
    assert_eq!(record.retry_count, 0);
    assert!(record.error_message.is_none());
    let progress = record.progress.expect("progress recorded");
    assert_eq!(progress.percent, Some(100));
    assert_eq!(progress.bytes_transferred, Some(2048));
    assert!(progress.started_at.is_some());
    assert!(progress.completed_at.is_some());

    assert_eq!(h.script.build_count(), 1);
    assert!(h.timer.requested().is_empty());
    assert!(h.supervisor.is_idle());
    Ok(())
}

#[tokio::test]
async fn failures_retry_with_backoff_until_budget_is_spent() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "exit 3").build();
    let id = h
        .supervisor
        .submit(NewRecordBuilder::job("flaky").max_retries(2).build())?;

    assert!(h.supervisor.start(&id).await?);
    let record = with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;

    assert_eq!(record.status, Status::Failed);
    assert_eq!(record.retry_count, 2);
    assert_eq!(record.return_code, Some(3));
    assert_eq!(
        record.error_message.as_deref(),
        Some("Job failed with return code 3")
    );
    assert_eq!(h.script.build_count(), 3);
    assert_eq!(
        h.timer.requested(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );

    let log = h.supervisor.read_log(&id)?;
    assert!(log.contains("Scheduling retry 1/2 in 1s"));
    assert!(log.contains("Retry attempt 2/2"));
    assert!(log.contains("Max retries (2) exceeded, giving up"));
    Ok(())
}

#[tokio::test]
async fn operations_back_off_the_same_way() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Operation, "exit 1").build();
    let id = h.supervisor.submit(
        NewRecordBuilder::operation("offsite", "copy")
            .max_retries(1)
            .build(),
    )?;
    assert!(id.starts_with("rclone"));

    assert!(h.supervisor.start(&id).await?);
    let record = with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;

    assert_eq!(record.status, Status::Failed);
    assert_eq!(record.retry_count, 1);
    assert_eq!(
        record.error_message.as_deref(),
        Some("Operation failed with return code 1")
    );
    assert_eq!(h.timer.requested(), vec![Duration::from_secs(1)]);
    Ok(())
}

#[tokio::test]
async fn spawn_errors_are_retried() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "exit 0").build();
    let missing = h.dir.path().join("no-such-binary");
    let supervisor = Supervisor::builder(Arc::clone(h.store()), h.dir.path().join("logs"))
        .command_builder(Arc::new(RsyncCommandBuilder::new(
            missing.to_string_lossy(),
        )))
        .retry_timer(Arc::new(h.timer.clone()))
        .build();

    let id = supervisor.submit(NewRecordBuilder::job("missing").max_retries(1).build())?;
    assert!(supervisor.start(&id).await?);
    let record = with_timeout(supervisor.wait_until_idle(&id, POLL)).await?;

    assert_eq!(record.status, Status::Failed);
    assert_eq!(record.retry_count, 1);
    assert!(
        record
            .error_message
            .as_deref()
            .is_some_and(|m| m.starts_with("Job execution error: spawning"))
    );
    assert_eq!(h.timer.requested(), vec![Duration::from_secs(1)]);
    Ok(())
}

#[tokio::test]
async fn second_start_is_rejected_while_live() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "sleep 5").build();
    let id = h.supervisor.submit(NewRecordBuilder::job("long").build())?;

    assert!(h.supervisor.start(&id).await?);
    assert!(!h.supervisor.start(&id).await?);
    assert!(h.supervisor.is_running(&id));
    assert!(h.supervisor.running_ids().contains(&id));
    assert!(!h.supervisor.start("job_missing").await?);

    assert!(with_timeout(h.supervisor.stop(&id)).await?);
    let record = with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;
    assert_eq!(record.status, Status::Stopped);
    assert_eq!(h.script.build_count(), 1);
    Ok(())
}

#[tokio::test]
async fn restart_failed_skips_records_without_budget() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "exit 0").build();
    let spent = h
        .supervisor
        .submit(NewRecordBuilder::job("spent").max_retries(0).build())?;
    let again = h
        .supervisor
        .submit(NewRecordBuilder::job("again").max_retries(2).build())?;
    for id in [&spent, &again] {
        h.store().update(id, RecordPatch::status(Status::Failed))?;
    }

    assert_eq!(h.supervisor.restart_failed().await?, 1);
    let record = with_timeout(h.supervisor.wait_until_idle(&again, POLL)).await?;
    assert_eq!(record.status, Status::Completed);

    assert_eq!(
        h.store().get(&spent).map(|r| r.status),
        Some(Status::Failed)
    );
    assert_eq!(h.script.build_count(), 1);
    Ok(())
}

#[tokio::test]
async fn restart_marks_pending_restart_then_runs() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "exit 0").build();
    let id = h.supervisor.submit(NewRecordBuilder::job("again").build())?;

    assert!(h.supervisor.restart(&id).await?);
    let record = with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;
    assert_eq!(record.status, Status::Completed);
    assert!(h.supervisor.read_log(&id)?.contains("Restart requested"));
    Ok(())
}

#[tokio::test]
async fn approve_releases_operations_awaiting_approval() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Operation, "exit 0").build();
    let id = h
        .supervisor
        .submit(NewRecordBuilder::operation("wipe", "sync").build())?;

    assert!(!h.supervisor.approve(&id).await?);

    h.store()
        .update(&id, RecordPatch::status(Status::PendingApproval))?;
    assert!(h.supervisor.approve(&id).await?);
    let record = with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;
    assert_eq!(record.status, Status::Completed);
    Ok(())
}

#[tokio::test]
async fn progress_callback_sees_every_update() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(
        RecordKind::Job,
        "echo '      1,024  50%    1.00MB/s    0:00:01 (xfr#1, to-chk=1/2)'; exit 0",
    )
    .build();
    let id = h.supervisor.submit(NewRecordBuilder::job("watched").build())?;

    let seen: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback = Arc::new(move |_id, progress| {
        sink.lock().unwrap().push(progress.clone());
    });

    assert!(h.supervisor.start_with_callback(&id, Some(callback)).await?);
    with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;

    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|p| p.percent == Some(50) && p.total_files == Some(2)));
    let last = seen.last().expect("at least one update");
    assert_eq!(last.status, Some(Status::Completed));
    assert_eq!(last.percent, Some(100));
    Ok(())
}

#[tokio::test]
async fn panicking_callback_does_not_break_the_attempt() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "exit 0").build();
    let id = h.supervisor.submit(NewRecordBuilder::job("loud").build())?;

    h.supervisor
        .set_progress_callback(&id, Arc::new(|_, _| panic!("observer bug")));
    assert!(h.supervisor.start(&id).await?);

    let record = with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;
    assert_eq!(record.status, Status::Completed);
    Ok(())
}

#[tokio::test]
async fn log_lines_are_timestamped_and_ordered() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "echo hello from the tool; exit 0").build();
    let id = h.supervisor.submit(NewRecordBuilder::job("logged").build())?;

    assert!(h.supervisor.start(&id).await?);
    with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;

    assert!(h.supervisor.log_file(&id).ends_with(format!("{id}.log")));
    let log = h.supervisor.read_log(&id)?;
    let stamp = Regex::new(r"^\[\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\] ")?;
    assert!(log.lines().all(|line| stamp.is_match(line)), "{log}");

    let position = |needle: &str| log.find(needle).unwrap_or(usize::MAX);
    assert!(position("Job created: logged") < position("Starting job: logged"));
    assert!(position("Starting job: logged") < position("Command: sh -c"));
    assert!(position("hello from the tool") < position("Job completed successfully"));
    assert_ne!(position("Job completed successfully"), usize::MAX);
    Ok(())
}

#[tokio::test]
async fn invalid_submissions_leave_no_trace() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "exit 0").build();

    let err = h
        .supervisor
        .submit(NewRecordBuilder::job("").destination("/etc").build())
        .unwrap_err();
    match err {
        FerrymanError::Validation(errors) => assert_eq!(errors.len(), 2),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(h.store().list().is_empty());
    Ok(())
}

#[tokio::test]
async fn deleting_a_live_record_stops_it_first() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "sleep 5").build();
    let id = h.supervisor.submit(NewRecordBuilder::job("doomed").build())?;

    assert!(h.supervisor.start(&id).await?);
    let store = Arc::clone(h.store());
    with_timeout(wait_for(|| {
        store.get(&id).is_some_and(|r| r.status == Status::Running)
    }))
    .await;

    assert!(with_timeout(h.supervisor.delete(&id)).await?);
    assert!(h.store().get(&id).is_none());
    assert!(!h.supervisor.is_running(&id));
    assert!(!h.supervisor.delete(&id).await?);
    Ok(())
}

#[tokio::test]
async fn external_kill_fails_without_retry() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "kill -9 $$").build();
    let id = h
        .supervisor
        .submit(NewRecordBuilder::job("killed").max_retries(2).build())?;

    assert!(h.supervisor.start(&id).await?);
    let record = with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;

    assert_eq!(record.status, Status::Failed);
    assert_eq!(record.error_message.as_deref(), Some("Job process died unexpectedly"));
    assert_eq!(record.return_code, None);
    assert_eq!(record.retry_count, 0);
    assert!(h.timer.requested().is_empty());
    assert!(!h.supervisor.has_pending_retry(&id));
    assert_eq!(h.script.build_count(), 1);
    Ok(())
}

#[tokio::test]
async fn deleting_a_record_abandons_its_pending_retry() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "exit 1").real_timer().build();
    let id = h
        .supervisor
        .submit(NewRecordBuilder::job("vanishing").max_retries(3).build())?;

    assert!(h.supervisor.start(&id).await?);
    let supervisor = &h.supervisor;
    with_timeout(wait_for(|| {
        supervisor.has_pending_retry(&id) && !supervisor.is_running(&id)
    }))
    .await;
    assert_eq!(h.supervisor.pending_retry_attempt(&id), Some(1));

    // Removed behind the supervisor's back; the first backoff is one second.
    assert!(h.store().delete(&id)?);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(h.script.build_count(), 1, "no attempt ran for the deleted record");
    assert!(h.store().get(&id).is_none());
    assert!(!h.supervisor.has_pending_retry(&id));
    assert!(h.supervisor.is_idle());
    Ok(())
}

#[tokio::test]
async fn edits_made_during_backoff_reach_the_next_attempt() -> TestResult {
    init_tracing();
    let h = HarnessBuilder::new(RecordKind::Job, "echo {source}; exit 1")
        .real_timer()
        .build();
    let id = h
        .supervisor
        .submit(NewRecordBuilder::job("edited").max_retries(1).build())?;

    assert!(h.supervisor.start(&id).await?);
    let supervisor = &h.supervisor;
    with_timeout(wait_for(|| {
        supervisor.has_pending_retry(&id) && !supervisor.is_running(&id)
    }))
    .await;

    h.store().update(
        &id,
        RecordPatch {
            source: Some("/tmp/ferryman-edited".to_string()),
            ..RecordPatch::default()
        },
    )?;
    let record = with_timeout(h.supervisor.wait_until_idle(&id, POLL)).await?;
    assert_eq!(record.status, Status::Failed);
    assert_eq!(record.retry_count, 1);

    let built = h.script.built();
    assert_eq!(built.len(), 2);
    assert!(built[0][2].contains("/tmp/ferryman-src"));
    assert!(built[1][2].contains("/tmp/ferryman-edited"));
    assert!(h.supervisor.read_log(&id)?.contains("/tmp/ferryman-edited"));
    Ok(())
}
