// crates/config/src/validation.rs
//! Per-section value checks

use std::fmt::Display;
use std::ops::RangeInclusive;

pub use crate::error::ValidationError;

/// A `[section]` of `config.toml`
///
/// Sections are loaded and reset independently: when one fails
/// [`ConfigSection::validate`] it falls back to `Default` and the others
/// keep what the file says.
pub trait ConfigSection: Default {
    /// Returns every problem in the section, not just the first
    fn validate(&self) -> Result<(), Vec<ValidationError>>;

    /// Takes every value from `other`
    fn merge(&mut self, other: Self);

    /// Table name in the file
    fn section_name(&self) -> &'static str;
}

/// Collects the problems found in one section
///
/// ```rust
/// use panelview_config::Validator;
///
/// let mut check = Validator::new("network");
/// check.range("control_timeout_secs", 0u64, 1..=600);
/// check.command_argument("anonymous_password", "guest@");
/// assert_eq!(check.finish().unwrap_err()[0].field, "network.control_timeout_secs");
/// ```
pub struct Validator {
    section: &'static str,
    errors: Vec<ValidationError>,
}

impl Validator {
    pub fn new(section: &'static str) -> Self {
        Self {
            section,
            errors: Vec::new(),
        }
    }

    fn field(&self, key: &str) -> String {
        format!("{}.{}", self.section, key)
    }

    pub fn range<T>(&mut self, key: &str, value: T, bounds: RangeInclusive<T>) -> &mut Self
    where
        T: PartialOrd + Display,
    {
        if !bounds.contains(&value) {
            let message = format!("is outside {}..={}", bounds.start(), bounds.end());
            self.errors
                .push(ValidationError::with_value(self.field(key), message, value));
        }
        self
    }

    /// A value sent verbatim on the control channel: non-empty and free of
    /// control characters, so it can't end the command line early
    ///
    /// The value is left out of the error since it may be a password.
    pub fn command_argument(&mut self, key: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.errors
                .push(ValidationError::new(self.field(key), "must not be empty"));
        } else if value.chars().any(char::is_control) {
            self.errors.push(ValidationError::new(
                self.field(key),
                "must not contain control characters",
            ));
        }
        self
    }

    pub fn finish(self) -> Result<(), Vec<ValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
