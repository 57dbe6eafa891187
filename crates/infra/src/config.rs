//! Runtime configuration read from the environment.

use std::time::Duration;

use labelledger_core::Money;
use labelledger_royalties::{DEFAULT_INVITE_TTL_DAYS, MAX_INVITE_TTL_DAYS};
use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://labelledger.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MIN_WITHDRAWAL_CENTS: i64 = 5_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Store and policy settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub min_withdrawal: Money,
    pub invite_ttl_days: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            min_withdrawal: Money::from_cents(DEFAULT_MIN_WITHDRAWAL_CENTS),
            invite_ttl_days: DEFAULT_INVITE_TTL_DAYS,
        }
    }
}

impl LedgerConfig {
    /// Create config from environment variables.
    ///
    /// - `DATABASE_URL`: SQLite URL (default: `sqlite://labelledger.db`)
    /// - `LEDGER_MAX_CONNECTIONS`: pool size (default: 5)
    /// - `LEDGER_BUSY_TIMEOUT_MS`: lock wait before giving up (default: 5000)
    /// - `LEDGER_MIN_WITHDRAWAL_CENTS`: smallest payout request (default: 5000)
    /// - `LEDGER_INVITE_TTL_DAYS`: invite lifetime, 1..=3650 (default: 7)
    ///
    /// Unset variables fall back to defaults; set but unparsable ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(defaults.database_url);

        let max_connections: u32 = parse_var(&lookup, "LEDGER_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            return Err(invalid("LEDGER_MAX_CONNECTIONS", "0", "must be at least 1"));
        }

        let busy_timeout = parse_var::<u64>(&lookup, "LEDGER_BUSY_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.busy_timeout);

        let min_withdrawal = match parse_var::<i64>(&lookup, "LEDGER_MIN_WITHDRAWAL_CENTS")? {
            Some(cents) if cents < 0 => {
                return Err(invalid("LEDGER_MIN_WITHDRAWAL_CENTS", &cents.to_string(), "must not be negative"));
            }
            Some(cents) => Money::from_cents(cents),
            None => defaults.min_withdrawal,
        };

        let invite_ttl_days = match parse_var::<i64>(&lookup, "LEDGER_INVITE_TTL_DAYS")? {
            Some(days) if days <= 0 => {
                return Err(invalid("LEDGER_INVITE_TTL_DAYS", &days.to_string(), "must be positive"));
            }
            Some(days) if days > MAX_INVITE_TTL_DAYS => {
                return Err(invalid(
                    "LEDGER_INVITE_TTL_DAYS",
                    &days.to_string(),
                    &format!("must be at most {MAX_INVITE_TTL_DAYS}"),
                ));
            }
            Some(days) => days,
            None => defaults.invite_ttl_days,
        };

        Ok(Self {
            database_url,
            max_connections,
            busy_timeout,
            min_withdrawal,
            invite_ttl_days,
        })
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_min_withdrawal(mut self, min: Money) -> Self {
        self.min_withdrawal = min;
        self
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, LedgerConfig::default());
        assert_eq!(cfg.min_withdrawal, Money::from_cents(5_000));
        assert_eq!(cfg.invite_ttl_days, 7);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = LedgerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite:///tmp/ledger.db"),
            ("LEDGER_MAX_CONNECTIONS", "8"),
            ("LEDGER_BUSY_TIMEOUT_MS", "250"),
            ("LEDGER_MIN_WITHDRAWAL_CENTS", "0"),
            ("LEDGER_INVITE_TTL_DAYS", "14"),
        ]))
        .unwrap();
        assert_eq!(cfg.database_url, "sqlite:///tmp/ledger.db");
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.busy_timeout, Duration::from_millis(250));
        assert_eq!(cfg.min_withdrawal, Money::ZERO);
        assert_eq!(cfg.invite_ttl_days, 14);
    }

    #[test]
    fn garbage_values_are_reported() {
        let err = LedgerConfig::from_lookup(lookup(&[("LEDGER_MAX_CONNECTIONS", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LEDGER_MAX_CONNECTIONS", .. }));

        let err = LedgerConfig::from_lookup(lookup(&[("LEDGER_INVITE_TTL_DAYS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LEDGER_INVITE_TTL_DAYS", .. }));

        let err = LedgerConfig::from_lookup(lookup(&[("LEDGER_INVITE_TTL_DAYS", "999999999999")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LEDGER_INVITE_TTL_DAYS", .. }));
        assert!(LedgerConfig::from_lookup(lookup(&[("LEDGER_INVITE_TTL_DAYS", "3650")])).is_ok());

        let err = LedgerConfig::from_lookup(lookup(&[("LEDGER_MIN_WITHDRAWAL_CENTS", "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LEDGER_MIN_WITHDRAWAL_CENTS", .. }));
    }
}
