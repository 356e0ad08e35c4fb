//! Exit code constants for CLI commands
//!
//! - 0: Success
//! - 1: Some metrics could not be analysed, or a runtime failure
//! - 2: Bad input (unreadable export, invalid metric name or argument)

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Partial results or a runtime failure
pub const EXIT_WARNING: i32 = 1;

/// Invalid input
pub const EXIT_ERROR: i32 = 2;
