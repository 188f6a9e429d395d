//! Error types shared across the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for engine setup.
#[derive(Error, Debug)]
pub enum Error {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file could not be parsed.
    #[error("Failed to parse config '{path}': {message}")]
    ConfigParse {
        /// Path of the offending file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Configuration values that cannot drive the engine.
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the engine's core Error type.
pub type Result<T> = std::result::Result<T, Error>;
