//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::{Money, RolloutPolicy};
use saga::SagaConfig;

/// Output format for the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: Postgres connection string; unset runs in memory
/// - `CARD_VALIDATION_AMOUNT_CENTS`, `CURRENCY`: the validation charge
/// - `GATEWAY_QUOTA_PER_SECOND`: gateway admissions per rolling second
/// - `SAGA_STALE_AFTER_SECS`, `SAGA_RECONCILE_INTERVAL_SECS`: reconciler timing
/// - `CARD_VALIDATION_ROLLOUT_PERCENT`, `ROLLOUT_SALT`: validation rollout
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub card_validation_amount: Money,
    pub currency: String,
    pub gateway_quota_per_second: usize,
    pub saga_stale_after: Duration,
    pub reconcile_interval: Duration,
    pub rollout_percent: u8,
    pub rollout_salt: String,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_or("HOST", defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: env_or("RUST_LOG", defaults.log_level),
            log_format: env_or("LOG_FORMAT", defaults.log_format),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            card_validation_amount: Money::from_cents(env_or(
                "CARD_VALIDATION_AMOUNT_CENTS",
                defaults.card_validation_amount.cents(),
            )),
            currency: env_or("CURRENCY", defaults.currency),
            gateway_quota_per_second: env_or(
                "GATEWAY_QUOTA_PER_SECOND",
                defaults.gateway_quota_per_second,
            ),
            saga_stale_after: Duration::from_secs(env_or(
                "SAGA_STALE_AFTER_SECS",
                defaults.saga_stale_after.as_secs(),
            )),
            reconcile_interval: Duration::from_secs(env_or(
                "SAGA_RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval.as_secs(),
            )),
            rollout_percent: env_or("CARD_VALIDATION_ROLLOUT_PERCENT", defaults.rollout_percent),
            rollout_salt: env_or("ROLLOUT_SALT", defaults.rollout_salt),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            validation_amount: self.card_validation_amount,
            currency: self.currency.to_lowercase(),
        }
    }

    pub fn rollout_policy(&self) -> RolloutPolicy {
        RolloutPolicy::new(self.rollout_salt.clone(), self.rollout_percent)
    }

    /// Staleness threshold for the reconciler.
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.saga_stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(900))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            card_validation_amount: Money::from_cents(100),
            currency: "usd".to_string(),
            gateway_quota_per_second: resilience::DEFAULT_QUOTA_PER_SECOND,
            saga_stale_after: Duration::from_secs(900),
            reconcile_interval: Duration::from_secs(300),
            rollout_percent: 100,
            rollout_salt: "card-validation".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.gateway_quota_per_second, 95);
        assert_eq!(config.rollout_percent, 100);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_saga_config_from_values() {
        let config = Config {
            card_validation_amount: Money::from_cents(50),
            currency: "EUR".to_string(),
            ..Config::default()
        };
        let saga = config.saga_config();
        assert_eq!(saga.validation_amount, Money::from_cents(50));
        assert_eq!(saga.currency, "eur");
        assert_eq!(config.stale_after(), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
