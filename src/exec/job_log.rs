// src/exec/job_log.rs

//! Per-record log files: `<log_dir>/<id>.log`, one `[YYYY-MM-DD HH:MM:SS] msg`
//! line per entry.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::warn;

use crate::errors::{FerrymanError, Result};

#[derive(Debug, Clone)]
pub struct JobLog {
    dir: PathBuf,
}

impl JobLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.log"))
    }

    /// Append one timestamped line. Failures are logged and swallowed so a
    /// full disk never takes a transfer down with it.
    pub fn append(&self, id: &str, message: impl AsRef<str>) {
        if let Err(e) = self.try_append(id, message.as_ref()) {
            warn!(id, dir = ?self.dir, error = %e, "failed to write record log");
        }
    }

    fn try_append(&self, id: &str, message: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(id))?;
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "[{stamp}] {}", message.trim_end())
    }

    /// Whole log contents; a record that never logged has an empty log.
    pub fn read(&self, id: &str) -> Result<String> {
        let path = self.path_for(id);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(FerrymanError::storage_io(&path, e)),
        }
    }
}
