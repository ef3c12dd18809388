// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::RecordKind;

/// Configuration exactly as read from a TOML file.
///
/// ```toml
/// [config]
/// data_dir = "data"
/// log_dir = "logs"
/// backup_count = 5
///
/// [jobs]
/// max_retries = 5
/// backoff_cap_secs = 60
///
/// [operations]
/// binary = "rclone"
/// max_retries = 3
/// ```
///
/// All sections are optional and have reasonable defaults. Convert into a
/// [`ConfigFile`] with `ConfigFile::try_from` to get a validated value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub jobs: KindOverrides,

    #[serde(default)]
    pub operations: KindOverrides,
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub jobs: KindSection,
    pub operations: KindSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        jobs: KindSection,
        operations: KindSection,
    ) -> Self {
        Self {
            config,
            jobs,
            operations,
        }
    }

    /// Settings for the store/supervisor pair handling `kind`.
    pub fn kind(&self, kind: RecordKind) -> &KindSection {
        match kind {
            RecordKind::Job => &self.jobs,
            RecordKind::Operation => &self.operations,
        }
    }

    /// Path of the JSON document backing the store for `kind`.
    pub fn store_path(&self, kind: RecordKind) -> PathBuf {
        let file = match kind {
            RecordKind::Job => "jobs.json",
            RecordKind::Operation => "rclone_operations.json",
        };
        self.config.data_dir.join(file)
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(
            ConfigSection::default(),
            KindSection::jobs(),
            KindSection::operations(),
        )
    }
}

/// `[config]` section: settings shared by both record kinds.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Directory holding the store documents and their backups.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory holding per-record transfer logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Number of rotated backups retained per store.
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,

    /// How long an untracked operation may sit in a transient status before
    /// the zombie reconciler marks it failed.
    #[serde(default = "default_zombie_grace_secs")]
    pub zombie_grace_secs: u64,

    /// Wait after the graceful stop signal before escalating to a kill.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Wait for the worker to wind down after the kill signal.
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,

    /// Deadline for the dry-run preview of an operation.
    #[serde(default = "default_preview_timeout_secs")]
    pub preview_timeout_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_backup_count() -> usize {
    5
}

fn default_zombie_grace_secs() -> u64 {
    3600
}

fn default_stop_timeout_secs() -> u64 {
    10
}

fn default_join_timeout_secs() -> u64 {
    5
}

fn default_preview_timeout_secs() -> u64 {
    300
}

impl ConfigSection {
    pub fn zombie_grace(&self) -> Duration {
        Duration::from_secs(self.zombie_grace_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn preview_timeout(&self) -> Duration {
        Duration::from_secs(self.preview_timeout_secs)
    }
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
            backup_count: default_backup_count(),
            zombie_grace_secs: default_zombie_grace_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            join_timeout_secs: default_join_timeout_secs(),
            preview_timeout_secs: default_preview_timeout_secs(),
        }
    }
}

/// `[jobs]` / `[operations]` sections as written in the file.
///
/// Missing keys fall back to the defaults of the section they appear in, so
/// `[operations]` with only `binary` set still gets a 30s backoff cap.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KindOverrides {
    pub binary: Option<String>,
    pub max_retries: Option<u32>,
    pub backoff_cap_secs: Option<u64>,
}

impl KindOverrides {
    pub fn apply_to(&self, base: KindSection) -> KindSection {
        KindSection {
            binary: self.binary.clone().unwrap_or(base.binary),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            backoff_cap_secs: self.backoff_cap_secs.unwrap_or(base.backoff_cap_secs),
        }
    }
}

/// Resolved settings for one record kind.
#[derive(Debug, Clone)]
pub struct KindSection {
    /// Executable used as argv[0].
    pub binary: String,

    /// Retry budget given to records created without an explicit one.
    pub max_retries: u32,

    /// Upper bound for the exponential backoff delay.
    pub backoff_cap_secs: u64,
}

impl KindSection {
    pub fn jobs() -> Self {
        Self {
            binary: "rsync".to_string(),
            max_retries: 5,
            backoff_cap_secs: 60,
        }
    }

    pub fn operations() -> Self {
        Self {
            binary: "rclone".to_string(),
            max_retries: 3,
            backoff_cap_secs: 30,
        }
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }
}
