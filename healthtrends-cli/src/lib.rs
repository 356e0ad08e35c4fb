//! HealthTrends CLI Library
//!
//! Command-line interface definitions, the CSV importer and the command
//! implementations behind the `healthtrends` binary.

/// `healthtrends analyze`
pub mod analyze;
/// `healthtrends cache`
pub mod cache;
/// Command-line interface definitions and argument parsing
pub mod cli;
/// `healthtrends compare`
pub mod compare;
/// CLI error type and exit code mapping
pub mod error;
/// Exit codes used by the CLI application
pub mod exit_codes;
/// CSV health export reader
pub mod import;
/// `healthtrends metrics`
pub mod metrics;
