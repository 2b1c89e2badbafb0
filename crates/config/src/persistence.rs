// crates/config/src/persistence.rs
//! Reading and writing `config.toml`
//!
//! A file written for another format version is refused rather than guessed
//! at. On load, a section holding invalid values is replaced by its defaults
//! and the other sections keep what the file says. Saves keep the previous
//! file as `config.toml.backup` and replace the file with a single rename.

use crate::validation::ConfigSection;
use crate::{Config, ConfigError, ConfigResult, CONFIG_VERSION};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub struct ConfigPersistence {
    path: PathBuf,
}

impl ConfigPersistence {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where [`ConfigPersistence::save`] keeps the file it replaces
    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("toml.backup")
    }

    /// Parses the file as written, without checking values
    ///
    /// A missing file reads as the defaults.
    pub fn read(&self) -> ConfigResult<Config> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", self.path.display());
                return Ok(Config::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if contents.trim().is_empty() {
            return Err(ConfigError::Empty {
                path: self.path.clone(),
            });
        }

        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        if config.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                path: self.path.clone(),
                found: config.version,
                expected: CONFIG_VERSION,
            });
        }
        Ok(config)
    }

    /// Reads the file, resetting each invalid section to its defaults
    pub fn load(&self) -> ConfigResult<Config> {
        let mut config = self.read()?;
        reset_if_invalid(&mut config.network);
        reset_if_invalid(&mut config.download);
        Ok(config)
    }

    /// Writes `config` unless a section fails validation
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        check_section(&config.network)?;
        check_section(&config.download)?;
        let text = toml::to_string_pretty(config)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        if self.path.exists() {
            let backup = self.backup_path();
            fs::copy(&self.path, &backup)
                .map_err(|source| ConfigError::Backup { path: backup, source })?;
        }

        // same directory, so the rename can't cross filesystems
        let mut file = NamedTempFile::new_in(dir).map_err(|e| self.write_error(e))?;
        file.write_all(text.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| self.write_error(e))?;
        file.persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;

        log::info!("Config saved to {}", self.path.display());
        Ok(())
    }

    fn write_error(&self, source: io::Error) -> ConfigError {
        ConfigError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

fn check_section<S: ConfigSection>(section: &S) -> ConfigResult<()> {
    section.validate().map_err(|errors| ConfigError::Invalid {
        section: section.section_name(),
        errors,
    })
}

fn reset_if_invalid<S: ConfigSection>(section: &mut S) {
    if let Err(e) = check_section(section) {
        log::warn!("{}; using defaults for the section", e);
        *section = S::default();
    }
}
