//! Error handling for the HealthTrends CLI
//!
//! Commands return a [`CliResult`] carrying the exit code to use, so a
//! failure keeps its source chain all the way to the terminal.

use crate::exit_codes::{EXIT_ERROR, EXIT_WARNING};
use healthtrends::HealthTrendsError;
use std::error::Error;
use std::fmt;

/// CLI-specific result type that preserves error information
pub type CliResult<T> = Result<T, CliError>;

/// CLI error with the exit code it should produce
#[derive(Debug)]
pub struct CliError {
    pub message: String,
    pub exit_code: i32,
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl CliError {
    /// Create a new CLI error with a message and exit code
    pub fn new(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            message: message.into(),
            exit_code,
            source: None,
        }
    }

    /// Wrap another error with a specific exit code
    pub fn from_error<E: Error + Send + Sync + 'static>(error: E, exit_code: i32) -> Self {
        Self {
            message: error.to_string(),
            exit_code,
            source: Some(Box::new(error)),
        }
    }

    /// Runtime failure (exit code 1)
    pub fn general<E: Error + Send + Sync + 'static>(error: E) -> Self {
        Self::from_error(error, EXIT_WARNING)
    }

    /// Bad input (exit code 2)
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message, EXIT_ERROR)
    }

    /// Message followed by every underlying cause
    pub fn full_chain(&self) -> String {
        let mut result = self.message.clone();

        // the boxed source repeats the message, so start below it
        let mut current = self.source().and_then(|e| e.source());
        while let Some(err) = current {
            result.push_str(&format!("\n  Caused by: {}", err));
            current = err.source();
        }

        result
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<HealthTrendsError> for CliError {
    fn from(error: HealthTrendsError) -> Self {
        let exit_code = if error.is_invalid_input() {
            EXIT_ERROR
        } else {
            EXIT_WARNING
        };
        Self::from_error(error, exit_code)
    }
}

impl From<anyhow::Error> for CliError {
    fn from(error: anyhow::Error) -> Self {
        let exit_code = match error.downcast_ref::<HealthTrendsError>() {
            Some(e) if e.is_invalid_input() => EXIT_ERROR,
            _ => EXIT_WARNING,
        };
        let message = error.to_string();
        Self {
            message,
            exit_code,
            source: Some(error.into()),
        }
    }
}

/// Extension trait for converting results to CLI results
pub trait IntoCliResult<T> {
    fn cli_general_error(self) -> CliResult<T>;
}

impl<T, E: Error + Send + Sync + 'static> IntoCliResult<T> for Result<T, E> {
    fn cli_general_error(self) -> CliResult<T> {
        self.map_err(CliError::general)
    }
}

/// Turn a command's result into the process exit code, printing the full
/// error chain on failure
pub fn handle_cli_result(result: CliResult<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e.full_chain());
            e.exit_code
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_codes::EXIT_SUCCESS;
    use anyhow::Context;

    #[test]
    fn test_invalid_input_maps_to_validation_exit() {
        let error: CliError = HealthTrendsError::invalid_input("metric", "bad name").into();
        assert_eq!(error.exit_code, EXIT_ERROR);

        let error: CliError = HealthTrendsError::DataSource("locked".to_string()).into();
        assert_eq!(error.exit_code, EXIT_WARNING);
    }

    #[test]
    fn test_anyhow_chain_is_preserved() {
        let result: anyhow::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ))
        .context("Failed to read export.csv");

        let error = CliError::from(result.unwrap_err());
        assert_eq!(error.exit_code, EXIT_WARNING);
        let chain = error.full_chain();
        assert!(chain.starts_with("Failed to read export.csv"));
        assert!(chain.contains("Caused by: no such file"));
    }

    #[test]
    fn test_handle_cli_result_passes_through_codes() {
        assert_eq!(handle_cli_result(Ok(EXIT_SUCCESS)), EXIT_SUCCESS);
        assert_eq!(handle_cli_result(Ok(EXIT_WARNING)), EXIT_WARNING);
        assert_eq!(
            handle_cli_result(Err(CliError::validation("bad date"))),
            EXIT_ERROR
        );
    }
}
