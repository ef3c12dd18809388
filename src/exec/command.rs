// src/exec/command.rs

//! Argument-vector construction for the wrapped transfer tools.
//!
//! Builders are pure: the same record always yields the same argv. Destructive
//! flags (`--delete`, `--remove-source-files`, ...) appear exactly when the
//! record's options ask for them and are never switched on by default.

use std::fmt::Debug;

use serde_json::Value;

use crate::errors::{FerrymanError, Result};
use crate::store::Record;

/// Maps a record to the argv of the external process.
pub trait CommandBuilder: Send + Sync + Debug {
    fn build(&self, record: &Record) -> Result<Vec<String>>;
}

/// Boolean switches: option key -> rsync flag.
const RSYNC_SWITCHES: &[(&str, &str)] = &[
    ("archive", "-a"),
    ("verbose", "-v"),
    ("human_readable", "-h"),
    ("progress", "-P"),
    ("compress", "--compress"),
    ("delete", "--delete"),
    ("dry_run", "--dry-run"),
    ("remove_source_files", "--remove-source-files"),
    ("checksum", "--checksum"),
    ("stats", "--stats"),
    ("itemize_changes", "--itemize-changes"),
    ("inplace", "--inplace"),
    ("sparse", "--sparse"),
    ("whole_file", "--whole-file"),
    ("update", "--update"),
    ("ignore_existing", "--ignore-existing"),
];

/// `rsync [switches] [--bwlimit=..] [--partial-dir=..] [--exclude P]* SRC DST`
#[derive(Debug, Clone)]
pub struct RsyncCommandBuilder {
    binary: String,
}

impl RsyncCommandBuilder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for RsyncCommandBuilder {
    fn default() -> Self {
        Self::new("rsync")
    }
}

impl CommandBuilder for RsyncCommandBuilder {
    fn build(&self, record: &Record) -> Result<Vec<String>> {
        let (source, destination) = endpoints(record)?;
        let opts = &record.options;
        let mut argv = vec![self.binary.clone()];

        for (key, flag) in RSYNC_SWITCHES {
            if switch(opts, key) {
                argv.push((*flag).to_string());
            }
        }
        if let Some(bw) = text(opts, "bwlimit") {
            argv.push(format!("--bwlimit={bw}"));
        }
        if let Some(dir) = text(opts, "partial_dir") {
            argv.push(format!("--partial-dir={dir}"));
        }

        push_patterns(&mut argv, "--exclude", &record.excludes);
        argv.push(source);
        argv.push(destination);
        Ok(argv)
    }
}

/// Switches valid for every rclone verb.
const RCLONE_SWITCHES: &[(&str, &str)] = &[
    ("verbose", "-v"),
    ("progress", "--progress"),
    ("dry_run", "--dry-run"),
    ("update", "--update"),
    ("ignore_existing", "--ignore-existing"),
    ("ignore_size", "--ignore-size"),
    ("size_only", "--size-only"),
    ("immutable", "--immutable"),
    ("use_server_modtime", "--use-server-modtime"),
    ("fast_list", "--fast-list"),
    ("no_traverse", "--no-traverse"),
    ("track_renames", "--track-renames"),
    ("inplace", "--inplace"),
];

/// Valued options: option key -> rclone flag taking one argument.
const RCLONE_VALUES: &[(&str, &str)] = &[
    ("transfers", "--transfers"),
    ("checkers", "--checkers"),
    ("bwlimit", "--bwlimit"),
    ("retries", "--retries"),
    ("low_level_retries", "--low-level-retries"),
    ("timeout", "--timeout"),
    ("contimeout", "--contimeout"),
    ("max_delete", "--max-delete"),
    ("min_size", "--min-size"),
    ("max_size", "--max-size"),
    ("max_age", "--max-age"),
    ("min_age", "--min-age"),
];

/// `rclone VERB [flags] [--exclude P]* [--include P]* SRC DST`
#[derive(Debug, Clone)]
pub struct RcloneCommandBuilder {
    binary: String,
}

impl RcloneCommandBuilder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for RcloneCommandBuilder {
    fn default() -> Self {
        Self::new("rclone")
    }
}

impl CommandBuilder for RcloneCommandBuilder {
    fn build(&self, record: &Record) -> Result<Vec<String>> {
        let (source, destination) = endpoints(record)?;
        let verb = record
            .operation_type
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("copy")
            .to_string();
        let opts = &record.options;
        let mut argv = vec![self.binary.clone(), verb.clone()];

        for (key, flag) in RCLONE_SWITCHES {
            if switch(opts, key) {
                argv.push((*flag).to_string());
            }
        }

        match verb.as_str() {
            "sync" => {
                if switch(opts, "delete") {
                    argv.push("--delete-during".to_string());
                }
                if switch(opts, "create_empty_src_dirs") {
                    argv.push("--create-empty-src-dirs".to_string());
                }
            }
            "move" => {
                if switch(opts, "delete_empty_src_dirs") {
                    argv.push("--delete-empty-src-dirs".to_string());
                }
            }
            _ => {}
        }

        if matches!(verb.as_str(), "copy" | "sync" | "move") {
            if switch(opts, "checksum") {
                argv.push("--checksum".to_string());
            }
            if switch(opts, "ignore_times") {
                argv.push("--ignore-times".to_string());
            }
        }

        for (key, flag) in RCLONE_VALUES {
            if let Some(value) = text(opts, key) {
                argv.push((*flag).to_string());
                argv.push(value);
            }
        }

        if switch(opts, "stats") {
            let interval = text(opts, "stats_interval").unwrap_or_else(|| "1m".to_string());
            argv.push("--stats".to_string());
            argv.push(interval);
            if switch(opts, "stats_one_line") {
                argv.push("--stats-one-line".to_string());
            }
        }

        push_patterns(&mut argv, "--exclude", &record.excludes);
        push_patterns(&mut argv, "--include", &string_list(opts, "includes"));
        argv.push(source);
        argv.push(destination);
        Ok(argv)
    }
}

fn endpoints(record: &Record) -> Result<(String, String)> {
    let source = record.source.trim();
    let destination = record.destination.trim();
    let mut errors = Vec::new();
    if source.is_empty() {
        errors.push("Source path is required".to_string());
    }
    if destination.is_empty() {
        errors.push("Destination path is required".to_string());
    }
    if errors.is_empty() {
        Ok((source.to_string(), destination.to_string()))
    } else {
        Err(FerrymanError::Validation(errors))
    }
}

/// `true` only for an explicit JSON `true` (or the string "true").
fn switch(opts: &Value, key: &str) -> bool {
    match opts.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Non-empty string or number option rendered as text.
fn text(opts: &Value, key: &str) -> Option<String> {
    match opts.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts either a JSON array of strings or one whitespace-separated string.
fn string_list(opts: &Value, key: &str) -> Vec<String> {
    match opts.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn push_patterns(argv: &mut Vec<String>, flag: &str, patterns: &[String]) {
    for pattern in patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        argv.push(flag.to_string());
        argv.push(pattern.to_string());
    }
}
