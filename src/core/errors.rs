//! LG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, LgError>;

/// Top-level error type for loadgov.
///
/// Only configuration and plumbing failures are errors. Bad samples, empty
/// windows and controller oscillation are handled in-band with neutral values.
#[derive(Debug, Error)]
pub enum LgError {
    #[error("[LG-1001] invalid configuration for {field}: {details}")]
    InvalidConfig { field: String, details: String },

    #[error("[LG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[LG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[LG-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[LG-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LG-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[LG-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl LgError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "LG-1001",
            Self::MissingConfig { .. } => "LG-1002",
            Self::ConfigParse { .. } => "LG-1003",
            Self::Serialization { .. } => "LG-2101",
            Self::Io { .. } => "LG-3002",
            Self::ChannelClosed { .. } => "LG-3003",
            Self::Runtime { .. } => "LG-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::ChannelClosed { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for configuration errors naming the offending field.
    #[must_use]
    pub fn invalid(field: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            details: details.into(),
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for LgError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for LgError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for LgError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
