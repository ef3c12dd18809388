// src/store/persist.rs

//! On-disk representation of a store: one JSON document, staged through a
//! temp file and renamed into place, with timestamped rotating backups.
//!
//! Layout for a store at `data/jobs.json`:
//! - `data/jobs.json`                           committed document
//! - `data/jobs.tmp`                            staging file (only mid-write)
//! - `data/jobs.backup.20261019_101500_123456.json` rotated backups
//! - `data/jobs.corrupted`                      primary set aside after recovery

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{FerrymanError, Result};
use crate::fs::FileSystem;
use crate::store::record::Record;
use crate::types::RecordKind;

pub fn temp_path(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

pub fn corrupted_path(path: &Path) -> PathBuf {
    path.with_extension("corrupted")
}

fn stem_and_ext(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    (stem, ext)
}

fn backup_path(path: &Path) -> PathBuf {
    let (stem, ext) = stem_and_ext(path);
    let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
    path.with_file_name(format!("{stem}.backup.{stamp}.{ext}"))
}

/// Existing backups of `path`, newest first.
///
/// The fixed-width timestamp in the name makes lexical order chronological.
pub fn backups_newest_first(fs: &dyn FileSystem, path: &Path) -> Vec<PathBuf> {
    let (stem, ext) = stem_and_ext(path);
    let prefix = format!("{stem}.backup.");
    let suffix = format!(".{ext}");
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut backups: Vec<PathBuf> = match fs.read_dir(&dir) {
        Ok(entries) => entries
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(&suffix))
            })
            .collect(),
        Err(e) => {
            debug!(?dir, error = %e, "could not list backup directory");
            Vec::new()
        }
    };

    backups.sort();
    backups.reverse();
    backups
}

/// Copy the committed document to a fresh backup and prune old ones.
///
/// Backup failures are logged, never fatal: they must not block the write
/// they precede.
pub fn backup_file(fs: &dyn FileSystem, path: &Path, keep_count: usize) -> Option<PathBuf> {
    if !fs.exists(path) {
        return None;
    }

    let backup = backup_path(path);
    if let Err(e) = fs.copy(path, &backup) {
        warn!(?path, error = %e, "failed to create backup");
        return None;
    }

    for old in backups_newest_first(fs, path).into_iter().skip(keep_count) {
        if let Err(e) = fs.remove_file(&old) {
            warn!(backup = ?old, error = %e, "failed to delete old backup");
        }
    }

    Some(backup)
}

/// Serialize `records` and commit them with temp-file + rename.
///
/// On failure the staging file is removed and the target is untouched.
pub fn atomic_write(
    fs: &dyn FileSystem,
    path: &Path,
    kind: RecordKind,
    records: &[Record],
) -> Result<()> {
    let mut doc = Map::new();
    doc.insert(
        kind.document_key().to_string(),
        serde_json::to_value(records).map_err(|e| FerrymanError::storage_io(path, e))?,
    );
    let bytes = serde_json::to_vec_pretty(&Value::Object(doc))
        .map_err(|e| FerrymanError::storage_io(path, e))?;

    let tmp = temp_path(path);
    let staged = fs
        .write(&tmp, &bytes)
        .and_then(|()| fs.rename(&tmp, path));

    if let Err(e) = staged {
        if fs.exists(&tmp) {
            let _ = fs.remove_file(&tmp);
        }
        return Err(FerrymanError::storage_io(path, format!("{e:#}")));
    }

    Ok(())
}

fn parse_document(text: &str, kind: RecordKind) -> std::result::Result<Vec<Record>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let Value::Object(mut doc) = value else {
        return Err("top-level value is not an object".to_string());
    };

    match doc.remove(kind.document_key()) {
        None => Ok(Vec::new()),
        Some(list) => serde_json::from_value(list).map_err(|e| e.to_string()),
    }
}

/// Load the committed records for a store.
///
/// - Missing or empty file: no records.
/// - A leftover staging file from an interrupted write is discarded; the
///   committed document is authoritative.
/// - Unparsable document: fall back to the newest backup that parses, set the
///   broken file aside and re-commit the recovered records.
/// - Nothing parses: [`FerrymanError::StorageCorruption`].
pub fn load_records(
    fs: &dyn FileSystem,
    path: &Path,
    kind: RecordKind,
) -> Result<Vec<Record>> {
    let tmp = temp_path(path);
    if fs.exists(&tmp) {
        warn!(staging = ?tmp, "discarding staging file left by an interrupted write");
        if let Err(e) = fs.remove_file(&tmp) {
            warn!(staging = ?tmp, error = %e, "failed to remove staging file");
        }
    }

    if !fs.exists(path) {
        return Ok(Vec::new());
    }

    let text = fs
        .read_to_string(path)
        .map_err(|e| FerrymanError::storage_io(path, format!("{e:#}")))?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let primary_err = match parse_document(&text, kind) {
        Ok(records) => return Ok(records),
        Err(e) => e,
    };

    for backup in backups_newest_first(fs, path) {
        let Ok(text) = fs.read_to_string(&backup) else {
            continue;
        };
        match parse_document(&text, kind) {
            Ok(records) => {
                warn!(
                    ?path,
                    ?backup,
                    error = %primary_err,
                    "store document corrupted; recovered from backup"
                );
                let aside = corrupted_path(path);
                if let Err(e) = fs.rename(path, &aside) {
                    warn!(?path, error = %e, "failed to set corrupted document aside");
                }
                atomic_write(fs, path, kind, &records)?;
                return Ok(records);
            }
            Err(e) => {
                debug!(?backup, error = %e, "backup does not parse either; trying older");
            }
        }
    }

    Err(FerrymanError::StorageCorruption(format!(
        "failed to load {}: {primary_err}; no valid backup found",
        path.display()
    )))
}
