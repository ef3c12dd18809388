// src/validate.rs

//! Pre-creation checks for new records.
//!
//! These are pure predicate checks on the submitted fields. They do not touch
//! the filesystem: a source that does not exist yet is a transfer-time failure
//! handled by the retry machinery, not a validation error.

use std::path::{Component, Path};

use crate::config::validate::MAX_RETRIES_LIMIT;
use crate::errors::{FerrymanError, Result};
use crate::store::NewRecord;
use crate::types::RecordKind;

pub const MAX_NAME_LEN: usize = 200;

/// rclone verbs accepted for operations.
pub const ALLOWED_OPERATION_TYPES: &[&str] = &[
    "check", "copy", "copyto", "delete", "mount", "move", "moveto", "rcat", "sync",
];

/// Destinations that must never be written to.
const DANGEROUS_PATHS: &[&str] = &[
    "/",
    "/bin",
    "/sbin",
    "/usr",
    "/usr/bin",
    "/usr/sbin",
    "/etc",
    "/boot",
    "/sys",
    "/proc",
    "/dev",
    "/System",
    "/Library",
    "/Applications",
    "C:\\",
    "C:\\Windows",
    "C:\\Program Files",
];

/// Validate `new` for a store of `kind`, collecting every problem.
pub fn validate_new_record(kind: RecordKind, new: &NewRecord) -> Result<()> {
    let errors = collect_errors(kind, new);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(FerrymanError::Validation(errors))
    }
}

fn collect_errors(kind: RecordKind, new: &NewRecord) -> Vec<String> {
    let mut errors = Vec::new();

    if new.name.trim().is_empty() {
        errors.push(format!("{} name is required", kind.title()));
    }
    if new.name.chars().count() > MAX_NAME_LEN {
        errors.push(format!(
            "{} name too long (max {MAX_NAME_LEN} characters): {}",
            kind.title(),
            new.name.chars().count()
        ));
    }

    if let Some(max) = new.max_retries {
        if max > MAX_RETRIES_LIMIT {
            errors.push(format!("max_retries must be between 0 and {MAX_RETRIES_LIMIT}: {max}"));
        }
    }

    if !new.options.is_object() {
        errors.push("options must be a JSON object".to_string());
    }

    if kind == RecordKind::Operation {
        match new.operation_type.as_deref().map(str::trim) {
            None | Some("") => errors.push("Operation type is required".to_string()),
            Some(op) if !ALLOWED_OPERATION_TYPES.contains(&op) => errors.push(format!(
                "Invalid operation type: {op}. Allowed: {}",
                ALLOWED_OPERATION_TYPES.join(", ")
            )),
            Some(_) => {}
        }
    }

    for (label, value) in [("Source", &new.source), ("Destination", &new.destination)] {
        if value.trim().is_empty() {
            errors.push(format!("{label} path is required"));
            continue;
        }
        // `remote:path` specs are opaque to local path rules.
        if kind == RecordKind::Operation && is_remote_spec(value) {
            continue;
        }
        if let Err(e) = check_local_path(value) {
            errors.push(e);
        }
    }

    if kind == RecordKind::Job && errors.is_empty() && same_path(&new.source, &new.destination) {
        errors.push(format!(
            "Source and destination cannot be the same: {}",
            new.source
        ));
    }

    errors
}

/// Reject null bytes, `..` traversal and system directories.
pub fn check_local_path(path: &str) -> std::result::Result<(), String> {
    if path.contains('\0') {
        return Err("Path contains null bytes".to_string());
    }

    let p = Path::new(path);
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(format!("Path traversal detected: {path}"));
    }

    let trimmed = path.trim_end_matches(['/', '\\']);
    let normalized = if trimmed.is_empty() { "/" } else { trimmed };
    for dangerous in DANGEROUS_PATHS {
        let dangerous = dangerous.trim_end_matches('\\');
        let is_root = dangerous == "/" || dangerous.ends_with(':');
        let inside = !is_root
            && (normalized.starts_with(&format!("{dangerous}/"))
                || normalized.starts_with(&format!("{dangerous}\\")));
        if normalized.eq_ignore_ascii_case(dangerous) || inside {
            return Err(format!("Access to system directory not allowed: {path}"));
        }
    }

    Ok(())
}

fn is_remote_spec(value: &str) -> bool {
    match value.split_once(':') {
        // Single letters are Windows drives, not remotes.
        Some((remote, _)) => {
            remote.len() > 1
                && remote
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        None => false,
    }
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}
