//! Storage configuration parsing from environment variables.

use super::parse_env;
use crate::domain::errors::ConfigurationError;
use crate::infrastructure::storage::StorageSettings;
use std::env;
use std::path::PathBuf;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Storage environment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEnvConfig {
    pub output_dir: PathBuf,
    pub rotation_mb: u64,
    pub max_retries: u32,
    /// Time allowed for in-flight records to reach disk after a shutdown request
    pub shutdown_grace_secs: u64,
    pub record_queue_capacity: usize,
}

impl Default for StorageEnvConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            rotation_mb: 100,
            max_retries: 3,
            shutdown_grace_secs: 10,
            record_queue_capacity: 1_024,
        }
    }
}

impl StorageEnvConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let defaults = Self::default();
        Ok(Self {
            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            rotation_mb: parse_env("FILE_ROTATION_MB", defaults.rotation_mb)?,
            max_retries: parse_env("STORAGE_MAX_RETRIES", defaults.max_retries)?,
            shutdown_grace_secs: parse_env("SHUTDOWN_GRACE_SECS", defaults.shutdown_grace_secs)?,
            record_queue_capacity: parse_env(
                "RECORD_QUEUE_CAPACITY",
                defaults.record_queue_capacity,
            )?,
        })
    }

    pub fn settings(&self) -> StorageSettings {
        StorageSettings {
            output_dir: self.output_dir.clone(),
            rotation_bytes: self.rotation_mb.saturating_mul(BYTES_PER_MB),
            max_retries: self.max_retries,
        }
    }
}
