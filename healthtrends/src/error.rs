//! Unified error handling for the HealthTrends library
//!
//! Synchronous, user-facing APIs (the comparative engine's validators) return
//! these errors directly. Background work never lets them escape the worker
//! boundary; it logs them and degrades to "no fresh result".

use crate::config::ConfigError;
use std::fmt;
use std::io;
use thiserror::Error;

/// The main error type for the HealthTrends library
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HealthTrendsError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Caller supplied an argument that failed validation
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput {
        /// Name of the offending argument
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Not enough data points to run an analysis
    #[error("Insufficient data: need at least {required} points, got {actual}")]
    InsufficientData {
        /// Minimum number of points needed
        required: usize,
        /// Number of points available
        actual: usize,
    },

    /// The health data source failed
    #[error("Data source error: {0}")]
    DataSource(String),

    /// Trend analysis failed
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// The background processor is no longer accepting work
    #[error("Trend processor has been shut down")]
    Shutdown,

    /// Generic error with context
    #[error("{message}")]
    Context {
        /// Description of the operation that failed
        message: String,
        /// Underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl HealthTrendsError {
    /// Build an [`HealthTrendsError::InvalidInput`]
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error was caused by bad caller input
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }
}

/// Result type alias for HealthTrends operations
pub type Result<T> = std::result::Result<T, HealthTrendsError>;

/// Extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, msg: S) -> Result<T>;

    /// Add context with a closure that's only called on error
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<S: Into<String>>(self, msg: S) -> Result<T> {
        self.map_err(|e| HealthTrendsError::Context {
            message: msg.into(),
            source: Box::new(e),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| HealthTrendsError::Context {
            message: f().into(),
            source: Box::new(e),
        })
    }
}

/// An error and its causes on one line, separated by `: `
pub struct ErrorChain<'a>(&'a dyn std::error::Error);

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut current = self.0.source();
        while let Some(err) = current {
            write!(f, ": {}", err)?;
            current = err.source();
        }
        Ok(())
    }
}

/// Format any error together with its `source()` chain
pub trait ErrorChainExt {
    /// Display adapter for the whole chain
    fn error_chain(&self) -> ErrorChain<'_>;
}

impl<E: std::error::Error> ErrorChainExt for E {
    fn error_chain(&self) -> ErrorChain<'_> {
        ErrorChain(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err: Result<()> = Err(io::Error::new(io::ErrorKind::NotFound, "file not found").into());
        let err_with_context = err.context("Failed to read trend cache");

        let msg = err_with_context.unwrap_err().to_string();
        assert!(msg.contains("Failed to read trend cache"));
    }

    #[test]
    fn test_error_chain_display() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = HealthTrendsError::Context {
            message: "Failed to write trend_steps.json".to_string(),
            source: Box::new(io_err),
        };

        assert_eq!(
            err.error_chain().to_string(),
            "Failed to write trend_steps.json: access denied"
        );
    }

    #[test]
    fn test_invalid_input_helper() {
        let err = HealthTrendsError::invalid_input("age", "must be between 13 and 120");
        assert!(err.is_invalid_input());
        assert_eq!(
            err.to_string(),
            "Invalid input for 'age': must be between 13 and 120"
        );

        let other = HealthTrendsError::InsufficientData {
            required: 7,
            actual: 3,
        };
        assert!(!other.is_invalid_input());
        assert_eq!(
            other.to_string(),
            "Insufficient data: need at least 7 points, got 3"
        );
    }
}
