// crates/config/src/error.rs
//! Errors raised while reading, checking or writing `config.toml`

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file exists but holds nothing; usually a crash mid-edit
    #[error("{path} is empty")]
    Empty { path: PathBuf },

    #[error("Cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Written for a format this build doesn't know
    #[error("{path} has format version {found}, expected {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("Invalid [{section}] settings: {}", describe(.errors))]
    Invalid {
        section: &'static str,
        errors: Vec<ValidationError>,
    },

    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Cannot create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot keep the previous config as {path}: {source}")]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No user config directory on this platform")]
    NoConfigDir,
}

impl ConfigError {
    /// Problems behind an [`ConfigError::Invalid`], empty otherwise
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            ConfigError::Invalid { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ValidationError::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One rejected value, named by its dotted key as written in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// `section.key`, e.g. `network.control_timeout_secs`
    pub field: String,
    pub message: String,
    /// The rejected value, unless it is a secret
    pub value: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        Self {
            value: Some(value.to_string()),
            ..Self::new(field, message)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} = {} {}", self.field, value, self.message),
            None => write!(f, "{} {}", self.field, self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("network.anonymous_password", "must not be empty");
        assert_eq!(err.to_string(), "network.anonymous_password must not be empty");

        let err = ValidationError::with_value(
            "network.control_timeout_secs",
            "is outside 1..=600",
            0,
        );
        assert_eq!(
            err.to_string(),
            "network.control_timeout_secs = 0 is outside 1..=600"
        );
    }

    #[test]
    fn test_invalid_names_section_and_fields() {
        let err = ConfigError::Invalid {
            section: "download",
            errors: vec![
                ValidationError::with_value("download.transfer_retries", "is outside 0..=10", 40),
                ValidationError::with_value("download.bulk_size_hint", "is outside 256..=67108864", 1),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Invalid [download] settings: download.transfer_retries = 40 is outside 0..=10; \
             download.bulk_size_hint = 1 is outside 256..=67108864"
        );
        assert_eq!(err.validation_errors().len(), 2);
        assert!(ConfigError::NoConfigDir.validation_errors().is_empty());
    }

    #[test]
    fn test_parse_error_names_path() {
        let source = toml::from_str::<toml::Table>("x = ").unwrap_err();
        let err = ConfigError::Parse {
            path: PathBuf::from("/tmp/config.toml"),
            source,
        };
        assert!(err.to_string().starts_with("Cannot parse /tmp/config.toml"));
    }
}
