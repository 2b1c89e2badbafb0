// crates/config/src/network_config.rs
//! Connection and TLS settings

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Address family used when resolving host names
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamilyPreference {
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

impl std::fmt::Display for AddressFamilyPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamilyPreference::Any => write!(f, "any"),
            AddressFamilyPreference::Ipv4 => write!(f, "ipv4"),
            AddressFamilyPreference::Ipv6 => write!(f, "ipv6"),
        }
    }
}

impl std::str::FromStr for AddressFamilyPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "ipv4" => Ok(Self::Ipv4),
            "ipv6" => Ok(Self::Ipv6),
            other => Err(format!("unknown address family '{}'", other)),
        }
    }
}

/// When plain `ftp://` connections are upgraded to TLS
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionPolicy {
    Off,
    #[default]
    Optional,
    Force,
}

impl std::fmt::Display for EncryptionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncryptionPolicy::Off => write!(f, "off"),
            EncryptionPolicy::Optional => write!(f, "optional"),
            EncryptionPolicy::Force => write!(f, "force"),
        }
    }
}

impl std::str::FromStr for EncryptionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "optional" => Ok(Self::Optional),
            "force" => Ok(Self::Force),
            other => Err(format!("unknown encryption policy '{}'", other)),
        }
    }
}

/// Connection and TLS settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Receive timeout on control connections, in seconds
    pub control_timeout_secs: u64,

    /// Receive timeout on data connections, in seconds
    pub data_timeout_secs: u64,

    pub address_family: AddressFamilyPreference,

    /// Policy for `ftp://` locators; `ftps://` always requires TLS
    pub encryption: EncryptionPolicy,

    /// Password tried when a locator names no user
    pub anonymous_password: String,

    /// Reject servers whose certificate doesn't chain to a trusted root
    pub verify_certificates: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            control_timeout_secs: 10,
            data_timeout_secs: 20,
            address_family: AddressFamilyPreference::Any,
            encryption: EncryptionPolicy::Optional,
            anonymous_password: "guest@".to_string(),
            verify_certificates: true,
        }
    }
}

impl ConfigSection for NetworkConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut check = Validator::new(self.section_name());
        check
            .range("control_timeout_secs", self.control_timeout_secs, 1..=600)
            .range("data_timeout_secs", self.data_timeout_secs, 1..=3600)
            .command_argument("anonymous_password", &self.anonymous_password);
        check.finish()
    }

    fn merge(&mut self, other: Self) {
        self.control_timeout_secs = other.control_timeout_secs;
        self.data_timeout_secs = other.data_timeout_secs;
        self.address_family = other.address_family;
        self.encryption = other.encryption;
        self.anonymous_password = other.anonymous_password;
        self.verify_certificates = other.verify_certificates;
    }

    fn section_name(&self) -> &'static str {
        "network"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = NetworkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.control_timeout_secs, 10);
        assert_eq!(config.data_timeout_secs, 20);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = NetworkConfig {
            control_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_with_line_break_rejected() {
        let config = NetworkConfig {
            anonymous_password: "a\r\nDELE x".to_string(),
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "network.anonymous_password");
    }

    #[test]
    fn test_multiple_validation_errors() {
        let config = NetworkConfig {
            control_timeout_secs: 0,
            data_timeout_secs: 0,
            anonymous_password: String::new(),
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().len(), 3);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(
            "IPv6".parse::<AddressFamilyPreference>().unwrap(),
            AddressFamilyPreference::Ipv6
        );
        assert_eq!("force".parse::<EncryptionPolicy>().unwrap(), EncryptionPolicy::Force);
        assert!("always".parse::<EncryptionPolicy>().is_err());
    }

    #[test]
    fn test_merge() {
        let mut base = NetworkConfig::default();
        let other = NetworkConfig {
            encryption: EncryptionPolicy::Force,
            verify_certificates: false,
            ..Default::default()
        };
        base.merge(other);
        assert_eq!(base.encryption, EncryptionPolicy::Force);
        assert!(!base.verify_certificates);
    }
}
