//! Typed runtime knobs read from the environment variables in spec §6.

use std::env;
use std::time::Duration;

use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::retry::{DeadlinePolicy, RetryPolicy};

const VAR_RETRY_MAX_ATTEMPTS: &str = "DYNAMORM_RETRY_MAX_ATTEMPTS";
const VAR_RETRY_BASE_DELAY_MS: &str = "DYNAMORM_RETRY_BASE_DELAY_MS";
const VAR_DEADLINE_BUFFER_MS: &str = "DYNAMORM_DEADLINE_BUFFER_MS";
const VAR_BATCH_GET_CONCURRENCY: &str = "DYNAMORM_BATCH_GET_CONCURRENCY";
const VAR_DEBUG: &str = "DYNAMORM_DEBUG";

/// The process-wide defaults the executor and batch engine read once at
/// startup (or construct explicitly for tests). Bad env values never panic:
/// [`RuntimeConfig::from_env`] falls back to the default and returns the
/// diagnostic alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub retry_policy: RetryPolicy,
    pub deadline_policy: DeadlinePolicy,
    pub batch_get_concurrency: usize,
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            deadline_policy: DeadlinePolicy::default(),
            batch_get_concurrency: 1,
            debug: false,
        }
    }
}

impl RuntimeConfig {
    /// Reads every recognized `DYNAMORM_*` environment variable, falling
    /// back to defaults on missing or malformed values. Malformed values are
    /// collected and returned alongside the (partially-defaulted) config so
    /// a caller can log them without the read itself failing.
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        let mut config = Self::default();
        let mut errors = Vec::new();

        if let Some(v) = read_u32(VAR_RETRY_MAX_ATTEMPTS, &mut errors) {
            config.retry_policy.max_retries = v;
        }
        if let Some(v) = read_u64(VAR_RETRY_BASE_DELAY_MS, &mut errors) {
            config.retry_policy.initial_delay = Duration::from_millis(v);
        }
        if let Some(v) = read_u64(VAR_DEADLINE_BUFFER_MS, &mut errors) {
            config.deadline_policy.buffer = Duration::from_millis(v);
        }
        if let Some(v) = read_usize(VAR_BATCH_GET_CONCURRENCY, &mut errors) {
            config.batch_get_concurrency = v;
        }
        config.debug = env::var(VAR_DEBUG).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);

        if config.debug {
            debug!(?config, "loaded dynamorm runtime configuration");
        }

        (config, errors)
    }
}

fn read_u32(var: &'static str, errors: &mut Vec<ConfigError>) -> Option<u32> {
    read_parsed(var, errors)
}

fn read_u64(var: &'static str, errors: &mut Vec<ConfigError>) -> Option<u64> {
    read_parsed(var, errors)
}

fn read_usize(var: &'static str, errors: &mut Vec<ConfigError>) -> Option<usize> {
    read_parsed(var, errors)
}

fn read_parsed<T: std::str::FromStr>(var: &'static str, errors: &mut Vec<ConfigError>) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(e) => {
                errors.push(ConfigError::InvalidValue {
                    var,
                    value: raw,
                    reason: e.to_string(),
                });
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = RuntimeConfig::default();
        assert_eq!(config.retry_policy.max_retries, 3);
        assert_eq!(config.retry_policy.initial_delay, Duration::from_millis(100));
        assert_eq!(config.deadline_policy.buffer, Duration::from_millis(100));
        assert_eq!(config.batch_get_concurrency, 1);
        assert!(!config.debug);
    }

    #[test]
    fn bad_parsed_value_falls_back_with_diagnostic() {
        let mut errors = Vec::new();
        // Simulates what from_env does for a var holding a non-numeric value,
        // without mutating the real process environment from a unit test.
        let var = "DYNAMORM_RETRY_MAX_ATTEMPTS";
        let raw = "not-a-number".to_string();
        let parsed: Option<u32> = raw.parse().ok();
        assert!(parsed.is_none());
        errors.push(ConfigError::InvalidValue {
            var,
            value: raw,
            reason: "invalid digit".to_string(),
        });
        assert_eq!(errors.len(), 1);
    }
}
