// src/config/validate.rs

use crate::config::model::{ConfigFile, KindSection, RawConfigFile};
use crate::errors::{FerrymanError, Result};

/// Upper bound on any retry budget, shared with record validation.
pub const MAX_RETRIES_LIMIT: u32 = 100;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::FerrymanError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let jobs = raw.jobs.apply_to(KindSection::jobs());
        let operations = raw.operations.apply_to(KindSection::operations());

        validate_global_config(&raw)?;
        validate_kind_section("jobs", &jobs)?;
        validate_kind_section("operations", &operations)?;

        Ok(ConfigFile::new_unchecked(raw.config, jobs, operations))
    }
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.backup_count == 0 {
        return Err(FerrymanError::ConfigError(
            "[config].backup_count must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.data_dir.as_os_str().is_empty() {
        return Err(FerrymanError::ConfigError(
            "[config].data_dir must not be empty".to_string(),
        ));
    }

    if cfg.config.log_dir.as_os_str().is_empty() {
        return Err(FerrymanError::ConfigError(
            "[config].log_dir must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_kind_section(section: &str, kind: &KindSection) -> Result<()> {
    if kind.binary.trim().is_empty() {
        return Err(FerrymanError::ConfigError(format!(
            "[{section}].binary must not be empty"
        )));
    }

    if kind.max_retries > MAX_RETRIES_LIMIT {
        return Err(FerrymanError::ConfigError(format!(
            "[{section}].max_retries must be <= {MAX_RETRIES_LIMIT} (got {})",
            kind.max_retries
        )));
    }

    if kind.backoff_cap_secs == 0 {
        return Err(FerrymanError::ConfigError(format!(
            "[{section}].backoff_cap_secs must be >= 1 (got 0)"
        )));
    }

    Ok(())
}
