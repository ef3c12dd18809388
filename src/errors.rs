// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FerrymanError {
    /// Rejected before any state change; carries every problem found.
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Storage I/O error on {path:?}: {message}")]
    StorageIo { path: PathBuf, message: String },

    /// Unparsable store file with no usable backup.
    #[error("Storage corruption: {0}")]
    StorageCorruption(String),

    #[error("ID collision: {0}")]
    IdCollision(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Not supported on this platform: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FerrymanError {
    pub fn storage_io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        FerrymanError::StorageIo {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FerrymanError>;
