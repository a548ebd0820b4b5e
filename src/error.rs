//! Central error types for taint-verdict.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic
//! `Display` and `From` implementations.
//!
//! Errors fall into two propagation classes:
//!
//! - **Per-path** (`MalformedPath`, `UnrecognizedOperator`): never abort a
//!   batch. A malformed path becomes an `Unknown` verdict carrying the
//!   explanation; an unrecognized operator degrades the value to
//!   "nothing known" and analysis continues.
//! - **Startup** (`Configuration`, `Io`, `Serde` while loading config):
//!   fatal, surfaced before any path is processed.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Structurally invalid operation sequence
    #[error("Malformed path at step {step}: {message}")]
    MalformedPath { step: usize, message: String },

    /// Operator or transform name that is not in the registry
    #[error("Unrecognized operator: {0}")]
    UnrecognizedOperator(String),

    /// Missing ceiling, empty registry, bad registration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO operation failed (without path context - prefer IoWithPath when path is available)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO operation failed with path context for better error messages
    #[error("IO error at {path}: {error}")]
    IoWithPath {
        error: std::io::Error,
        path: PathBuf,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience type alias for Results using ClassifierError.
pub type Result<T> = std::result::Result<T, ClassifierError>;

impl ClassifierError {
    /// Create a malformed-path error for the given step index.
    #[inline]
    pub fn malformed(step: usize, message: impl Into<String>) -> Self {
        ClassifierError::MalformedPath {
            step,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        ClassifierError::Configuration(message.into())
    }

    /// Create an IO error with path context.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let text = std::fs::read_to_string(path)
    ///     .map_err(|e| ClassifierError::io_with_path(e, path))?;
    /// ```
    #[inline]
    pub fn io_with_path(error: std::io::Error, path: impl AsRef<Path>) -> Self {
        ClassifierError::IoWithPath {
            error,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Whether this error only affects the path being analyzed.
    ///
    /// Per-path errors degrade to a conservative verdict; everything else is a
    /// startup failure.
    #[must_use]
    pub fn is_per_path(&self) -> bool {
        matches!(
            self,
            ClassifierError::MalformedPath { .. } | ClassifierError::UnrecognizedOperator(_)
        )
    }
}
