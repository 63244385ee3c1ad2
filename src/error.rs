//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Rafe operations
#[derive(Error, Debug)]
pub enum RafeError {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse errors in tree, family or error-model files
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Inconsistent data (species mismatch, bad column sums, mismatched replicates)
    #[error("Inconsistent data: {message}")]
    Inconsistent { message: String },

    /// A value fell outside its permitted range
    #[error("Value {value} out of range (bound {bound})")]
    OutOfRange { value: i64, bound: i64 },

    /// Family store has not been indexed against the tree
    #[error("Family store is not synchronized with the tree")]
    NotSynchronized,

    /// Numeric failures (NaN/Inf in an objective or likelihood)
    #[error("Numeric failure: {message}")]
    Numeric { message: String },

    /// Optimizer hit its iteration bound without converging
    #[error("Convergence failure: {message}")]
    Convergence { message: String },

    /// Configuration errors (invalid CLI arguments)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// File not found errors
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },
}

/// Type alias for Results using RafeError
pub type Result<T> = std::result::Result<T, RafeError>;

impl RafeError {
    /// Create a parse error with a message
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Create an inconsistent data error
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }

    /// Create a numeric failure error
    pub fn numeric(message: impl Into<String>) -> Self {
        Self::Numeric {
            message: message.into(),
        }
    }

    /// Create a convergence failure error
    pub fn convergence(message: impl Into<String>) -> Self {
        Self::Convergence {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
