#![allow(dead_code)]

use std::path::Path;

use ferryman::config::{ConfigFile, ConfigSection, KindOverrides, RawConfigFile};
use ferryman::store::NewRecord;
use serde_json::Value;

/// Builder for `NewRecord` with values that pass validation.
pub struct NewRecordBuilder {
    record: NewRecord,
}

impl NewRecordBuilder {
    pub fn job(name: &str) -> Self {
        Self {
            record: NewRecord {
                name: name.to_string(),
                source: "/tmp/ferryman-src".to_string(),
                destination: "/tmp/ferryman-dst".to_string(),
                operation_type: None,
                options: Value::Object(Default::default()),
                excludes: Vec::new(),
                max_retries: None,
            },
        }
    }

    pub fn operation(name: &str, operation_type: &str) -> Self {
        let mut builder = Self::job(name);
        builder.record.source = "remote:bucket/src".to_string();
        builder.record.operation_type = Some(operation_type.to_string());
        builder
    }

    pub fn source(mut self, source: &str) -> Self {
        self.record.source = source.to_string();
        self
    }

    pub fn destination(mut self, destination: &str) -> Self {
        self.record.destination = destination.to_string();
        self
    }

    pub fn option(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.record.options {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn options(mut self, options: Value) -> Self {
        self.record.options = options;
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.record.excludes.push(pattern.to_string());
        self
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.record.max_retries = Some(max);
        self
    }

    pub fn build(self) -> NewRecord {
        self.record
    }
}

/// Builder for `ConfigFile` rooted in a scratch directory.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(root: &Path) -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection {
                    data_dir: root.join("data"),
                    log_dir: root.join("logs"),
                    ..ConfigSection::default()
                },
                jobs: KindOverrides::default(),
                operations: KindOverrides::default(),
            },
        }
    }

    pub fn backup_count(mut self, count: usize) -> Self {
        self.config.config.backup_count = count;
        self
    }

    pub fn zombie_grace_secs(mut self, secs: u64) -> Self {
        self.config.config.zombie_grace_secs = secs;
        self
    }

    pub fn stop_timeout_secs(mut self, secs: u64) -> Self {
        self.config.config.stop_timeout_secs = secs;
        self
    }

    pub fn job_binary(mut self, binary: &str) -> Self {
        self.config.jobs.binary = Some(binary.to_string());
        self
    }

    pub fn job_max_retries(mut self, max: u32) -> Self {
        self.config.jobs.max_retries = Some(max);
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}
