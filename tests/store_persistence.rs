// tests/store_persistence.rs

mod common;
use crate::common::builders::NewRecordBuilder;

use std::collections::HashSet;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use ferryman::errors::FerrymanError;
use ferryman::fs::RealFileSystem;
use ferryman::fs::mock::MockFileSystem;
use ferryman::store::{Progress, RecordPatch, RecordStore, StoreOptions, persist};
use ferryman::types::{RecordKind, Status};

type TestResult = Result<(), Box<dyn Error>>;

fn options() -> StoreOptions {
    StoreOptions {
        backup_count: 3,
        default_max_retries: 5,
    }
}

#[test]
fn created_record_survives_reopen() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("jobs.json");

    let store = RecordStore::open(RecordKind::Job, &path, options())?;
    let id = store.create(NewRecordBuilder::job("nightly").build())?;
    assert!(id.starts_with("job_"));

    let reopened = RecordStore::open(RecordKind::Job, &path, options())?;
    let record = reopened.get(&id).ok_or("record missing after reopen")?;
    assert_eq!(record.name, "nightly");
    assert_eq!(record.status, Status::Created);
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.max_retries, 5);
    assert_eq!(record.created_at, record.updated_at);

    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    assert_eq!(doc["jobs"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[test]
fn operations_use_their_own_document_key_and_prefix() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rclone_operations.json");

    let store = RecordStore::open(RecordKind::Operation, &path, options())?;
    let id = store.create(NewRecordBuilder::operation("offsite", "sync").build())?;
    assert!(id.starts_with("rclone_"));

    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    assert_eq!(doc["operations"][0]["id"], serde_json::json!(id));
    assert_eq!(doc["operations"][0]["operation_type"], serde_json::json!("sync"));
    Ok(())
}

#[test]
fn concurrent_creates_yield_unique_retrievable_ids() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("jobs.json");
    let store = Arc::new(RecordStore::open(RecordKind::Job, &path, options())?);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..10)
                    .map(|i| {
                        store
                            .create(NewRecordBuilder::job(&format!("t{t}-{i}")).build())
                            .expect("create")
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        ids.extend(handle.join().expect("thread panicked"));
    }

    assert_eq!(ids.len(), 80);
    for id in &ids {
        assert!(store.get(id).is_some());
    }

    let reopened = RecordStore::open(RecordKind::Job, &path, options())?;
    assert_eq!(reopened.list().len(), 80);
    Ok(())
}

#[test]
fn leftover_temp_file_is_ignored_on_load() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("jobs.json");

    let store = RecordStore::open(RecordKind::Job, &path, options())?;
    let id = store.create(NewRecordBuilder::job("committed").build())?;
    drop(store);

    // Crash between staging and rename: a truncated temp file next to an
    // intact committed document.
    let tmp = persist::temp_path(&path);
    fs::write(&tmp, br#"{"jobs": [{"id": "job_trunc"#)?;

    let reopened = RecordStore::open(RecordKind::Job, &path, options())?;
    let records = reopened.list();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    assert!(!tmp.exists());
    Ok(())
}

#[test]
fn corrupt_document_recovers_from_newest_backup() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("jobs.json");

    let store = RecordStore::open(RecordKind::Job, &path, options())?;
    let first = store.create(NewRecordBuilder::job("first").build())?;
    // This write backs up the one-record document first.
    store.create(NewRecordBuilder::job("second").build())?;
    drop(store);

    fs::write(&path, b"{ this is not json")?;

    let reopened = RecordStore::open(RecordKind::Job, &path, options())?;
    let records = reopened.list();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, first);

    assert!(persist::corrupted_path(&path).exists());
    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    assert_eq!(doc["jobs"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[test]
fn corrupt_document_without_backup_fails_loudly() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("jobs.json");
    fs::write(&path, b"[1, 2, 3")?;

    let err = RecordStore::open(RecordKind::Job, &path, options()).unwrap_err();
    assert!(matches!(err, FerrymanError::StorageCorruption(_)), "got {err:?}");
    // Nothing was discarded.
    assert_eq!(fs::read(&path)?, b"[1, 2, 3");
    Ok(())
}

#[test]
fn backups_are_capped_at_retention_count() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("jobs.json");
    let store = RecordStore::open(RecordKind::Job, &path, options())?;

    let id = store.create(NewRecordBuilder::job("busy").build())?;
    for pct in [10u8, 20, 30, 40, 50, 60] {
        let progress = Progress {
            percent: Some(pct),
            ..Progress::default()
        };
        store.update(&id, RecordPatch::default().with_progress(progress))?;
    }

    let backups = persist::backups_newest_first(&RealFileSystem, &path);
    assert_eq!(backups.len(), 3);
    for backup in &backups {
        let name = backup.file_name().ok_or("no file name")?.to_string_lossy().into_owned();
        assert!(name.starts_with("jobs.backup."), "unexpected backup name {name}");
        assert!(name.ends_with(".json"));
    }
    Ok(())
}

#[test]
fn failed_commit_keeps_previous_state() -> TestResult {
    let fs = MockFileSystem::new();
    let path = PathBuf::from("data/jobs.json");
    let store = RecordStore::open_with_fs(RecordKind::Job, &path, options(), Arc::new(fs.clone()))?;

    let kept = store.create(NewRecordBuilder::job("kept").build())?;
    let committed = fs.contents(&path).ok_or("document not written")?;

    fs.fail_renames(true);
    let err = store
        .create(NewRecordBuilder::job("lost").build())
        .unwrap_err();
    assert!(matches!(err, FerrymanError::StorageIo { .. }), "got {err:?}");

    let ids: Vec<_> = store.list().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![kept.clone()]);
    assert_eq!(fs.contents(&path), Some(committed));
    assert!(!fs.paths().contains(&persist::temp_path(&path)));

    fs.fail_renames(false);
    fs.fail_writes(true);
    let err = store
        .update(&kept, RecordPatch::status(Status::Running))
        .unwrap_err();
    assert!(matches!(err, FerrymanError::StorageIo { .. }));
    assert_eq!(store.get(&kept).map(|r| r.status), Some(Status::Created));
    Ok(())
}

#[test]
fn update_merges_progress_and_ignores_unknown_ids() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = RecordStore::open(RecordKind::Job, dir.path().join("jobs.json"), options())?;
    let id = store.create(NewRecordBuilder::job("merge").build())?;

    store.update(
        &id,
        RecordPatch::status(Status::Running).with_progress(Progress {
            percent: Some(10),
            speed: Some("1.00MB/s".to_string()),
            ..Progress::default()
        }),
    )?;
    let updated = store
        .update(
            &id,
            RecordPatch::default().with_progress(Progress {
                percent: Some(55),
                ..Progress::default()
            }),
        )?
        .ok_or("update returned nothing")?;

    let progress = updated.progress.ok_or("no progress")?;
    assert_eq!(progress.percent, Some(55));
    assert_eq!(progress.speed.as_deref(), Some("1.00MB/s"));
    assert_eq!(updated.status, Status::Running);
    assert!(updated.updated_at >= updated.created_at);

    assert!(store.update("job_missing", RecordPatch::status(Status::Failed))?.is_none());
    Ok(())
}

#[test]
fn retry_count_increments_and_delete_removes() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = RecordStore::open(RecordKind::Job, dir.path().join("jobs.json"), options())?;
    let id = store.create(NewRecordBuilder::job("retry").max_retries(2).build())?;

    assert_eq!(store.increment_retry_count(&id)?, Some(1));
    assert_eq!(store.increment_retry_count(&id)?, Some(2));
    assert_eq!(store.increment_retry_count("job_missing")?, None);

    assert!(store.delete(&id)?);
    assert!(!store.delete(&id)?);
    assert!(store.get(&id).is_none());
    Ok(())
}

#[test]
fn returned_records_are_detached_copies() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = RecordStore::open(RecordKind::Job, dir.path().join("jobs.json"), options())?;
    let id = store.create(NewRecordBuilder::job("copy").build())?;

    let mut copy = store.get(&id).ok_or("missing")?;
    copy.status = Status::Completed;
    copy.name.push_str("-mutated");

    let fresh = store.get(&id).ok_or("missing")?;
    assert_eq!(fresh.status, Status::Created);
    assert_eq!(fresh.name, "copy");
    Ok(())
}

#[test]
fn legacy_option_keys_are_accepted() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("jobs.json");
    fs::write(
        &path,
        r#"{"jobs": [{
            "id": "job_legacy",
            "name": "legacy",
            "source": "/data/a",
            "destination": "/data/b",
            "rsync_args": {"archive": true},
            "status": "failed",
            "retry_count": 1,
            "max_retries": 3,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }]}"#,
    )?;

    let store = RecordStore::open(RecordKind::Job, &path, options())?;
    let record = store.get("job_legacy").ok_or("missing")?;
    assert_eq!(record.options["archive"], serde_json::json!(true));
    assert_eq!(record.status, Status::Failed);
    assert_eq!(store.list_by_status(Status::Failed).len(), 1);
    Ok(())
}

#[test]
fn documents_from_the_earlier_tool_load() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rclone_operations.json");
    fs::write(
        &path,
        r#"{"operations": [{
            "id": "rclone_1767225600",
            "name": "photos",
            "source": "remote:photos",
            "destination": "/backup/photos",
            "operation_type": "sync",
            "rclone_args": {"checksum": true},
            "excludes": "*.tmp  .cache/ ",
            "status": "running (retrying...)",
            "retry_count": 2,
            "max_retries": 3,
            "created_at": "2026-01-01T09:30:00.123456",
            "progress": {
                "status": "running (retrying...)",
                "percent": 40,
                "started_at": "2026-01-01T09:31:00.5"
            }
        }]}"#,
    )?;

    let store = RecordStore::open(RecordKind::Operation, &path, options())?;
    let record = store.get("rclone_1767225600").ok_or("missing")?;
    assert_eq!(record.options["checksum"], serde_json::json!(true));
    assert_eq!(record.excludes, vec!["*.tmp".to_string(), ".cache/".to_string()]);
    assert_eq!(record.status, Status::Running);
    assert_eq!(record.updated_at, record.created_at);

    let progress = record.progress.ok_or("progress missing")?;
    assert_eq!(progress.status, Some(Status::Running));
    assert_eq!(progress.percent, Some(40));
    let started = progress.started_at.ok_or("started_at missing")?;
    assert_eq!((started - record.created_at).num_seconds(), 60);

    // Written back in the current shape.
    store.update("rclone_1767225600", RecordPatch::status(Status::Failed))?;
    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let saved = &doc["operations"][0];
    assert_eq!(saved["status"], "failed");
    assert_eq!(saved["excludes"], serde_json::json!(["*.tmp", ".cache/"]));
    assert!(saved.get("rclone_args").is_none());
    assert!(saved["options"]["checksum"].as_bool().unwrap_or(false));
    Ok(())
}

#[test]
fn unparseable_timestamps_are_still_corruption() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("jobs.json");
    fs::write(
        &path,
        r#"{"jobs": [{
            "id": "job_bad",
            "name": "bad",
            "source": "/a",
            "destination": "/b",
            "max_retries": 3,
            "created_at": "yesterday"
        }]}"#,
    )?;

    let err = RecordStore::open(RecordKind::Job, &path, options()).unwrap_err();
    assert!(matches!(err, FerrymanError::StorageCorruption(_)));
    Ok(())
}
