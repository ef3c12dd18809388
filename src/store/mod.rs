// src/store/mod.rs

//! Persistent Record Store.
//!
//! One store per record kind, each backed by a single JSON document. All
//! operations are serialized by one mutex per store. Mutations work on a copy
//! of the record list, commit it to disk, and only then adopt it, so a failed
//! write leaves the in-memory state at the last committed snapshot.
//!
//! Readers always receive owned copies; nothing handed out aliases store
//! internals.

mod compat;
pub mod persist;
pub mod record;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::{FerrymanError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::types::{RecordKind, Status};

pub use record::{NewRecord, Progress, Record, RecordPatch, generate_id};

/// Construction-time knobs for a [`RecordStore`].
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Rotated backups kept next to the document.
    pub backup_count: usize,
    /// Applied when a [`NewRecord`] does not set `max_retries`.
    pub default_max_retries: u32,
}

impl StoreOptions {
    pub fn for_kind(kind: RecordKind) -> Self {
        let defaults = match kind {
            RecordKind::Job => crate::config::KindSection::jobs(),
            RecordKind::Operation => crate::config::KindSection::operations(),
        };
        Self {
            backup_count: 5,
            default_max_retries: defaults.max_retries,
        }
    }
}

#[derive(Debug)]
pub struct RecordStore {
    kind: RecordKind,
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    options: StoreOptions,
    records: Mutex<Vec<Record>>,
}

impl RecordStore {
    /// Open (or create) the store document at `path` on the real filesystem.
    pub fn open(kind: RecordKind, path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        Self::open_with_fs(kind, path, options, Arc::new(RealFileSystem))
    }

    pub fn open_with_fs(
        kind: RecordKind,
        path: impl AsRef<Path>,
        options: StoreOptions,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs.create_dir_all(parent)
                    .map_err(|e| FerrymanError::storage_io(parent, format!("{e:#}")))?;
            }
        }

        let records = persist::load_records(fs.as_ref(), &path, kind)?;
        info!(%kind, ?path, count = records.len(), "record store loaded");

        Ok(Self {
            kind,
            path,
            fs,
            options,
            records: Mutex::new(records),
        })
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        // A panic while holding the lock cannot leave a half-applied mutation
        // behind (see `commit`), so the data is still the committed snapshot.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` to a working copy, persist it, then adopt it.
    ///
    /// Everything runs under the store lock. `f` operates on the plain list,
    /// so helpers called from inside it never re-acquire the lock.
    fn commit<T>(&self, f: impl FnOnce(&mut Vec<Record>) -> T) -> Result<T> {
        let mut guard = self.lock();
        let mut working = guard.clone();
        let out = f(&mut working);

        persist::backup_file(self.fs.as_ref(), &self.path, self.options.backup_count);
        persist::atomic_write(self.fs.as_ref(), &self.path, self.kind, &working)?;

        *guard = working;
        Ok(out)
    }

    /// Assign an ID, default status, timestamps and a zero retry count, then
    /// persist. Returns the new ID.
    pub fn create(&self, new: NewRecord) -> Result<String> {
        let id = generate_id(self.kind);
        let now = Utc::now();
        let record = Record {
            id: id.clone(),
            name: new.name,
            source: new.source,
            destination: new.destination,
            operation_type: new.operation_type,
            options: new.options,
            excludes: new.excludes,
            status: Status::Created,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(self.options.default_max_retries),
            created_at: now,
            updated_at: now,
            progress: None,
            error_message: None,
            return_code: None,
        };

        self.commit(|records| {
            if records.iter().any(|r| r.id == record.id) {
                return Err(FerrymanError::IdCollision(record.id.clone()));
            }
            records.push(record);
            Ok(())
        })??;

        debug!(kind = %self.kind, id = %id, "record created");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Snapshot of every record, in creation order.
    pub fn list(&self) -> Vec<Record> {
        self.lock().clone()
    }

    pub fn list_by_status(&self, status: Status) -> Vec<Record> {
        self.lock()
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    /// Read-modify-write of one record; also bumps `updated_at`.
    ///
    /// An unknown ID is a logged no-op returning `Ok(None)`, not an error.
    pub fn update(&self, id: &str, patch: RecordPatch) -> Result<Option<Record>> {
        self.update_with(id, |record| patch.apply(record))
    }

    /// Like [`update`](Self::update) with an arbitrary mutation.
    pub fn update_with(
        &self,
        id: &str,
        f: impl FnOnce(&mut Record),
    ) -> Result<Option<Record>> {
        if !self.lock().iter().any(|r| r.id == id) {
            warn!(kind = %self.kind, id, "update for unknown record ignored");
            return Ok(None);
        }

        self.commit(|records| {
            let record = records.iter_mut().find(|r| r.id == id)?;
            f(record);
            record.updated_at = Utc::now();
            Some(record.clone())
        })
    }

    /// Remove a record. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        if !self.lock().iter().any(|r| r.id == id) {
            return Ok(false);
        }

        self.commit(|records| {
            let before = records.len();
            records.retain(|r| r.id != id);
            records.len() != before
        })
    }

    /// Bump `retry_count` by one and return the new value.
    pub fn increment_retry_count(&self, id: &str) -> Result<Option<u32>> {
        let updated = self.update_with(id, |record| record.retry_count += 1)?;
        Ok(updated.map(|r| r.retry_count))
    }
}
