//! Common utilities shared across the HealthTrends library

/// Prefixed environment variable overrides
pub mod env_loader;

pub use env_loader::EnvLoader;
