//! Configuration error model.

use thiserror::Error;

/// A capacity string could not be turned into a byte count.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SizeError {
    /// Input was not a number optionally followed by a known unit.
    #[error("invalid size '{0}'")]
    Invalid(String),

    /// Input resolved to zero bytes.
    #[error("size must be greater than zero")]
    Zero,

    /// Input does not fit in 64 bits.
    #[error("size '{0}' is too large")]
    Overflow(String),
}

/// Channel configuration error.
///
/// Raised synchronously, before any I/O, and always user-correctable.
/// The `Display` text of the missing-option variants is part of the public
/// contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Url is missing.")]
    MissingUrl,

    #[error("Topic is missing.")]
    MissingTopic,

    #[error("invalid collection size: {0}")]
    InvalidSize(#[from] SizeError),

    /// A configuration value (e.g. from the environment) could not be parsed.
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

impl ConfigError {
    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}
