// crates/config/src/manager.rs
//! Configuration manager - main API for config operations

use crate::persistence::ConfigPersistence;
use crate::{Config, ConfigError, ConfigResult};
use directories::ProjectDirs;
use std::path::PathBuf;
use std::str::FromStr;

/// Prefix of environment variables that override file values
pub const ENV_PREFIX: &str = "PANELVIEW";

/// Main configuration manager
pub struct ConfigManager {
    persistence: ConfigPersistence,
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Creates a manager using the platform config directory
    ///
    /// - Linux: `~/.config/panelview/`
    /// - macOS: `~/Library/Application Support/panelview/`
    /// - Windows: `%APPDATA%\panelview\`
    pub fn new() -> ConfigResult<Self> {
        let config_dir = Self::default_config_dir()?;
        Self::with_directory(config_dir)
    }

    /// Creates a config manager with a custom config directory
    pub fn with_directory(config_dir: PathBuf) -> ConfigResult<Self> {
        let config_path = config_dir.join("config.toml");
        let persistence = ConfigPersistence::new(config_path);

        Ok(Self {
            persistence,
            config_dir,
        })
    }

    fn default_config_dir() -> ConfigResult<PathBuf> {
        ProjectDirs::from("", "", "panelview")
            .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Loads the configuration from file
    ///
    /// A missing file gives the defaults, as does an invalid section. A file
    /// that can't be parsed is an error.
    pub fn load(&self) -> ConfigResult<Config> {
        self.persistence.load()
    }

    /// Loads the configuration, falling back to defaults on any error
    pub fn load_or_default(&self) -> Config {
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config: {}, using defaults", e);
                Config::default()
            }
        }
    }

    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        self.persistence.save(config)
    }

    /// Loads the current config, applies `update_fn` and saves the result
    ///
    /// ```rust,no_run
    /// # use panelview_config::ConfigManager;
    /// # let manager = ConfigManager::new().unwrap();
    /// manager.update(|config| {
    ///     config.download.transfer_retries = 2;
    /// }).expect("Failed to update config");
    /// ```
    pub fn update<F>(&self, update_fn: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.load()?;
        update_fn(&mut config);
        self.save(&config)
    }

    /// Writes a default config file if none exists
    ///
    /// Returns Ok(true) if a new file was created.
    pub fn initialize(&self) -> ConfigResult<bool> {
        if self.config_path().exists() {
            log::info!(
                "Config file already exists at {}",
                self.config_path().display()
            );
            return Ok(false);
        }

        self.save(&Config::default())?;
        log::info!("Generated default config at {}", self.config_path().display());
        Ok(true)
    }

    /// Overwrites the config file with default values
    pub fn reset(&self) -> ConfigResult<()> {
        self.save(&Config::default())
    }

    /// Checks the file as written
    ///
    /// Returns the validation messages; an empty list means valid.
    pub fn validate(&self) -> ConfigResult<Vec<String>> {
        let config = self.persistence.read()?;

        match config.validate() {
            Ok(()) => Ok(Vec::new()),
            Err(errors) => Ok(errors.iter().map(|e| e.to_string()).collect()),
        }
    }

    /// Loads the file and applies environment variable overrides
    ///
    /// Variables follow the pattern `PANELVIEW_SECTION_FIELD`, for example
    /// `PANELVIEW_NETWORK_ENCRYPTION=force`. Unparsable values are ignored
    /// with a warning.
    pub fn load_with_env_overrides(&self) -> ConfigResult<Config> {
        let mut config = self.load()?;
        apply_env_overrides(&mut config);

        if let Err(errors) = config.validate() {
            log::warn!(
                "Config validation warnings after env overrides: {:?}",
                errors
            );
        }

        Ok(config)
    }
}

fn override_from_env<T>(section: &str, field: &str, target: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let name = format!(
        "{}_{}_{}",
        ENV_PREFIX,
        section.to_ascii_uppercase(),
        field.to_ascii_uppercase()
    );
    let Ok(raw) = std::env::var(&name) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => {
            log::info!("Config override from {}", name);
            *target = value;
        }
        Err(e) => log::warn!("Ignoring {}={}: {}", name, raw, e),
    }
}

fn apply_env_overrides(config: &mut Config) {
    let network = &mut config.network;
    override_from_env("network", "control_timeout_secs", &mut network.control_timeout_secs);
    override_from_env("network", "data_timeout_secs", &mut network.data_timeout_secs);
    override_from_env("network", "address_family", &mut network.address_family);
    override_from_env("network", "encryption", &mut network.encryption);
    override_from_env("network", "anonymous_password", &mut network.anonymous_password);
    override_from_env("network", "verify_certificates", &mut network.verify_certificates);

    let download = &mut config.download;
    override_from_env("download", "bulk_size_hint", &mut download.bulk_size_hint);
    override_from_env("download", "transfer_retries", &mut download.transfer_retries);
    override_from_env("download", "retry_delay_ms", &mut download.retry_delay_ms);
    override_from_env("download", "reuse_connections", &mut download.reuse_connections);
}
