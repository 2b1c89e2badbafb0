// crates/config/src/lib.rs
//! PanelView configuration
//!
//! Each feature owns a section implementing [`ConfigSection`]. A section with
//! invalid values falls back to its defaults with a warning, and writes are
//! atomic so a crash never leaves a half-written file behind.
//!
//! # Example
//!
//! ```rust,no_run
//! use panelview_config::{Config, ConfigManager};
//!
//! let manager = ConfigManager::new().expect("Failed to initialize config");
//! let config = manager.load().unwrap_or_else(|e| {
//!     eprintln!("Config error: {}, using defaults", e);
//!     Config::default()
//! });
//!
//! println!("Control timeout: {}s", config.network.control_timeout_secs);
//! ```

mod download_config;
mod error;
mod manager;
mod network_config;
mod persistence;
mod validation;

pub use download_config::DownloadConfig;
pub use error::{ConfigError, ConfigResult, ValidationError};
pub use manager::ConfigManager;
pub use network_config::{AddressFamilyPreference, EncryptionPolicy, NetworkConfig};
pub use persistence::ConfigPersistence;
pub use validation::{ConfigSection, Validator};

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Config file format version
    pub version: u32,

    pub network: NetworkConfig,

    pub download: DownloadConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the entire configuration
    ///
    /// Returns all validation errors found across all sections.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(mut e) = self.network.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.download.validate() {
            errors.append(&mut e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Merges this config with another, preferring values from `other`
    ///
    /// Override chain: defaults < file < env vars
    pub fn merge(&mut self, other: Config) {
        self.network.merge(other.network);
        self.download.merge(other.download);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            network: NetworkConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}
