// src/error.rs

//! Error types for the configuration engine
//!
//! Per-entry operations (bind, verify, install, remove) never surface
//! errors across entry boundaries; callers convert them into per-entry
//! failure markers. The variants here cover run-level preconditions and
//! the entry-scoped conditions those markers are built from.

use thiserror::Error;

/// Errors that can occur in the server engine or the client agent
#[derive(Error, Debug)]
pub enum Error {
    /// A filename carried a malformed specificity suffix
    #[error("Malformed specificity suffix in '{0}'")]
    Specificity(String),

    /// No specificity layer matched a required entry
    #[error("No matching layer for entry '{name}' on client '{client}'")]
    Resolution { name: String, client: String },

    /// A content generator failed for an entry
    #[error("Generation failed for entry '{name}' on client '{client}': {reason}")]
    Generation {
        name: String,
        client: String,
        reason: String,
    },

    /// Client metadata could not be assembled
    #[error("Metadata error for client '{0}'")]
    Metadata(String),

    /// A tool driver could not initialize and was excluded from the run
    #[error("Tool driver '{name}' failed to initialize: {reason}")]
    DriverInit { name: String, reason: String },

    /// The advisory run lock is already held
    #[error("Another agent run holds the lock at '{0}'")]
    LockHeld(String),

    /// Server communication failed after all retries
    #[error("Transport failure talking to '{endpoint}': {reason}")]
    Transport { endpoint: String, reason: String },

    /// The server answered with an explicit error document
    #[error("Server error ({kind}): {message}")]
    Server { kind: String, message: String },

    /// A probe failed and the probe-exit policy is fatal
    #[error("Probe '{name}' failed: {reason}")]
    Probe { name: String, reason: String },

    /// Options file or option value problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// A wire document could not be parsed or written
    #[error("Document error: {0}")]
    Xml(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
