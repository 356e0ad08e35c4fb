//! Prefixed environment overrides for [`crate::config::Config`]
//!
//! Every lookup is `<PREFIX>_<SUFFIX>`. A value that is set but does not
//! parse is reported and ignored, leaving the current setting in place.

use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Reads `PREFIX_*` variables
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Loader for variables starting with `prefix_`
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('_').to_string(),
        }
    }

    /// Full variable name for `suffix`
    pub fn key(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    /// Parsed value, or `current` when unset or unparseable
    pub fn load_parsed<T>(&self, suffix: &str, current: T) -> T
    where
        T: FromStr,
        T::Err: Display,
    {
        self.load_optional(suffix).unwrap_or(current)
    }

    /// Parsed value if the variable is set and valid
    pub fn load_optional<T>(&self, suffix: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let key = self.key(suffix);
        let raw = env::var(&key).ok()?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring {}={:?}: {}", key, raw, e);
                None
            }
        }
    }

    /// Comma separated list, trimming entries and skipping blanks
    pub fn load_list(&self, suffix: &str) -> Option<Vec<String>> {
        env::var(self.key(suffix)).ok().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::PathBuf;

    #[test]
    fn test_trailing_underscore_in_prefix() {
        assert_eq!(EnvLoader::new("HEALTHTRENDS_").key("WORKER_COUNT"), "HEALTHTRENDS_WORKER_COUNT");
        assert_eq!(EnvLoader::new("HEALTHTRENDS").key("WORKER_COUNT"), "HEALTHTRENDS_WORKER_COUNT");
    }

    #[test]
    #[serial]
    fn test_parsed_keeps_current_value_on_bad_input() {
        let loader = EnvLoader::new("HEALTHTRENDS_TEST");
        let key = loader.key("WORKERS");

        env::remove_var(&key);
        assert_eq!(loader.load_parsed("WORKERS", 2usize), 2);

        env::set_var(&key, " 8 ");
        assert_eq!(loader.load_parsed("WORKERS", 2usize), 8);

        env::set_var(&key, "lots");
        assert_eq!(loader.load_parsed("WORKERS", 2usize), 2);

        env::remove_var(&key);
    }

    #[test]
    #[serial]
    fn test_optional_path() {
        let loader = EnvLoader::new("HEALTHTRENDS_TEST");
        let key = loader.key("CACHE_DIR");

        env::remove_var(&key);
        assert_eq!(loader.load_optional::<PathBuf>("CACHE_DIR"), None);

        env::set_var(&key, "/tmp/trends");
        assert_eq!(
            loader.load_optional::<PathBuf>("CACHE_DIR"),
            Some(PathBuf::from("/tmp/trends"))
        );

        env::remove_var(&key);
    }

    #[test]
    #[serial]
    fn test_list_skips_blanks() {
        let loader = EnvLoader::new("HEALTHTRENDS_TEST");
        let key = loader.key("LIST");

        env::remove_var(&key);
        assert_eq!(loader.load_list("LIST"), None);

        env::set_var(&key, "steps, heart_rate,,sleep_hours ");
        assert_eq!(
            loader.load_list("LIST"),
            Some(vec![
                "steps".to_string(),
                "heart_rate".to_string(),
                "sleep_hours".to_string()
            ])
        );

        env::remove_var(&key);
    }
}
