//! Ledger engine configuration.

use std::time::Duration;

use tracing::warn;

pub const MAX_ATTEMPTS_ENV: &str = "POINTS_LEDGER_MAX_ATTEMPTS";
pub const RETRY_BACKOFF_MS_ENV: &str = "POINTS_LEDGER_RETRY_BACKOFF_MS";
pub const HISTORY_LIMIT_ENV: &str = "POINTS_LEDGER_HISTORY_LIMIT";
pub const MAX_HISTORY_LIMIT_ENV: &str = "POINTS_LEDGER_MAX_HISTORY_LIMIT";

/// Tuning knobs for [`crate::ledger_engine::LedgerEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Read-check-write cycles attempted before a conflict becomes a
    /// `TransientStoreFailure`. Always at least 1.
    pub max_attempts: u32,
    /// Base wait between attempts; attempt `n` sleeps `retry_backoff * n`.
    pub retry_backoff: Duration,
    pub default_history_limit: usize,
    pub max_history_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: Duration::from_millis(10),
            default_history_limit: 20,
            max_history_limit: 100,
        }
    }
}

impl LedgerConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_history_limits(mut self, default_limit: usize, max_limit: usize) -> Self {
        self.max_history_limit = max_limit.max(1);
        self.default_history_limit = default_limit.clamp(1, self.max_history_limit);
        self
    }

    /// Clamp a requested page size into `[1, max_history_limit]`.
    pub fn history_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_history_limit)
            .clamp(1, self.max_history_limit.max(1))
    }

    /// Load from environment, falling back to defaults for unset or invalid values.
    ///
    /// Invalid values are logged at `warn` rather than rejected so a typo never
    /// keeps the service from starting.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_attempts = parse_or(&lookup, MAX_ATTEMPTS_ENV, defaults.max_attempts);
        let backoff_ms = parse_or(
            &lookup,
            RETRY_BACKOFF_MS_ENV,
            defaults.retry_backoff.as_millis() as u64,
        );
        let default_limit = parse_or(&lookup, HISTORY_LIMIT_ENV, defaults.default_history_limit);
        let max_limit = parse_or(&lookup, MAX_HISTORY_LIMIT_ENV, defaults.max_history_limit);

        defaults
            .with_max_attempts(max_attempts)
            .with_retry_backoff(Duration::from_millis(backoff_ms))
            .with_history_limits(default_limit, max_limit)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, fallback = %default, "invalid ledger config value");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        assert_eq!(LedgerConfig::from_lookup(lookup(&[])), LedgerConfig::default());
    }

    #[test]
    fn reads_all_values() {
        let config = LedgerConfig::from_lookup(lookup(&[
            (MAX_ATTEMPTS_ENV, "8"),
            (RETRY_BACKOFF_MS_ENV, "0"),
            (HISTORY_LIMIT_ENV, "10"),
            (MAX_HISTORY_LIMIT_ENV, "50"),
        ]));

        assert_eq!(config.max_attempts, 8);
        assert_eq!(config.retry_backoff, Duration::ZERO);
        assert_eq!(config.default_history_limit, 10);
        assert_eq!(config.max_history_limit, 50);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = LedgerConfig::from_lookup(lookup(&[
            (MAX_ATTEMPTS_ENV, "lots"),
            (HISTORY_LIMIT_ENV, "-3"),
        ]));

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.default_history_limit, 20);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(LedgerConfig::default().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn history_limit_is_clamped() {
        let config = LedgerConfig::default().with_history_limits(20, 100);
        assert_eq!(config.history_limit(None), 20);
        assert_eq!(config.history_limit(Some(0)), 1);
        assert_eq!(config.history_limit(Some(40)), 40);
        assert_eq!(config.history_limit(Some(10_000)), 100);
    }

    #[test]
    fn default_limit_never_exceeds_max() {
        let config = LedgerConfig::default().with_history_limits(500, 100);
        assert_eq!(config.default_history_limit, 100);
    }
}
