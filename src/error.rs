//! Unified error types for labnet

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for labnet operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to write config file '{path}': {source}")]
    ConfigWrite { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Caller input errors
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{0} not found")]
    NotFound(String),

    // Kernel errors
    #[error("Netlink {op} failed: {source}")]
    Netlink { op: String, source: io::Error },

    #[error("Malformed netlink message: {0}")]
    NetlinkParse(String),

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    // Change tracking
    #[error("Change tracking failed: {0}")]
    StateTransition(String),

    // Partial update errors
    #[error("{context}: {source} (links and addresses rolled back to last saved configuration)")]
    UpdateFailed {
        context: String,
        source: Box<Error>,
    },

    #[error("FATAL: {context}: {original}; rollback failed: {rollback}")]
    RollbackFailed {
        context: String,
        original: Box<Error>,
        rollback: Box<Error>,
    },
}

impl Error {
    /// Build a validation error for a caller-supplied field
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True when the host matches neither the requested nor the committed state
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::RollbackFailed { .. })
    }

    /// True when the error reports a link the kernel no longer knows about
    pub fn is_missing_link(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Netlink { source, .. } => source.raw_os_error() == Some(libc::ENODEV),
            _ => false,
        }
    }
}

/// Result type alias for labnet operations
pub type Result<T> = std::result::Result<T, Error>;
