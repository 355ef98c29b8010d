//! Configuration module for billing-resilience.

use crate::services::catalog::MAX_GRACE_PERIOD_DAYS;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::observability::LogFormat;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
    /// `None` keeps all state in memory.
    pub database: Option<DatabaseConfig>,
    pub retry: RetryConfig,
    pub sweep: SweepConfig,
    pub processor: ProcessorConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: i32,
    pub base_interval: Duration,
    pub default_grace_period_days: i64,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Only one replica should sweep.
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: i64,
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Ok(Self::from_lookup(common, |key| env::var(key).ok()))
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| non_empty(key).and_then(|v| v.trim().parse::<i64>().ok());

        Self {
            common,
            service_name: non_empty("SERVICE_NAME")
                .unwrap_or_else(|| "billing-resilience".to_string()),
            service_version: non_empty("SERVICE_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            log_level: non_empty("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: non_empty("LOG_FORMAT")
                .and_then(|v| LogFormat::from_str(&v).ok())
                .unwrap_or_default(),
            otlp_endpoint: non_empty("OTLP_ENDPOINT"),
            database: non_empty("DATABASE_URL").map(|url| DatabaseConfig {
                url,
                max_connections: parsed("DATABASE_MAX_CONNECTIONS")
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(10),
                min_connections: parsed("DATABASE_MIN_CONNECTIONS")
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(2),
            }),
            retry: RetryConfig {
                max_retries: parsed("RETRY_MAX_RETRIES")
                    .and_then(|v| i32::try_from(v).ok())
                    .filter(|v| *v >= 0)
                    .unwrap_or(3),
                base_interval: Duration::from_secs(
                    parsed("RETRY_BASE_INTERVAL_SECS")
                        .filter(|v| *v > 0)
                        .unwrap_or(3600) as u64,
                ),
                default_grace_period_days: parsed("DEFAULT_GRACE_PERIOD_DAYS")
                    .filter(|v| (0..=MAX_GRACE_PERIOD_DAYS).contains(v))
                    .unwrap_or(7),
            },
            sweep: SweepConfig {
                enabled: non_empty("SWEEP_ENABLED")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(true),
                interval: Duration::from_secs(
                    parsed("SWEEP_INTERVAL_SECS")
                        .filter(|v| *v > 0)
                        .unwrap_or(300) as u64,
                ),
                batch_size: parsed("SWEEP_BATCH_SIZE")
                    .filter(|v| *v > 0)
                    .unwrap_or(500),
            },
            processor: ProcessorConfig {
                url: non_empty("PAYMENT_PROCESSOR_URL"),
                timeout: Duration::from_secs(
                    parsed("PROCESSOR_TIMEOUT_SECS")
                        .filter(|v| *v > 0)
                        .unwrap_or(15) as u64,
                ),
            },
            notifications: NotificationConfig {
                webhook_url: non_empty("NOTIFICATION_WEBHOOK_URL"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> BillingConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BillingConfig::from_lookup(core_config::Config::ephemeral(), |key| {
            vars.get(key).cloned()
        })
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.service_name, "billing-resilience");
        assert!(config.database.is_none());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_interval, Duration::from_secs(3600));
        assert_eq!(config.retry.default_grace_period_days, 7);
        assert!(config.sweep.enabled);
        assert_eq!(config.sweep.interval, Duration::from_secs(300));
        assert!(config.processor.url.is_none());
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/billing"),
            ("DATABASE_MAX_CONNECTIONS", "not-a-number"),
            ("RETRY_MAX_RETRIES", "5"),
            ("SWEEP_ENABLED", "false"),
            ("SWEEP_INTERVAL_SECS", "-1"),
            ("DEFAULT_GRACE_PERIOD_DAYS", "100000000"),
            ("LOG_FORMAT", "pretty"),
            ("PAYMENT_PROCESSOR_URL", ""),
        ]);

        let database = config.database.unwrap();
        assert_eq!(database.url, "postgres://localhost/billing");
        assert_eq!(database.max_connections, 10);
        assert_eq!(config.retry.max_retries, 5);
        assert!(!config.sweep.enabled);
        assert_eq!(config.sweep.interval, Duration::from_secs(300));
        assert_eq!(config.retry.default_grace_period_days, 7);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.processor.url.is_none());
    }
}
