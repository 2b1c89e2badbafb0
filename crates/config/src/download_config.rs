// crates/config/src/download_config.rs
//! Download queue settings

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Initial bulk buffer size when the server announces no size
    pub bulk_size_hint: usize,

    /// Extra attempts for a sub-resource after a soft failure
    pub transfer_retries: u32,

    /// Pause between attempts, in milliseconds
    pub retry_delay_ms: u64,

    /// Keep a logged-in session open across jobs on the same host
    pub reuse_connections: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            bulk_size_hint: 4096,
            transfer_retries: 0,
            retry_delay_ms: 500,
            reuse_connections: true,
        }
    }
}

impl ConfigSection for DownloadConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut check = Validator::new(self.section_name());
        check
            .range("bulk_size_hint", self.bulk_size_hint, 256..=64 * 1024 * 1024)
            .range("transfer_retries", self.transfer_retries, 0..=10)
            .range("retry_delay_ms", self.retry_delay_ms, 0..=60_000);
        check.finish()
    }

    fn merge(&mut self, other: Self) {
        self.bulk_size_hint = other.bulk_size_hint;
        self.transfer_retries = other.transfer_retries;
        self.retry_delay_ms = other.retry_delay_ms;
        self.reuse_connections = other.reuse_connections;
    }

    fn section_name(&self) -> &'static str {
        "download"
    }
}
