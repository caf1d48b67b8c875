//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::{EngineConfig, PollerConfig, RetryPolicy};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server and orchestrator configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset means the in-memory store
/// - `WORKER_ID`: lease owner name (default `$HOSTNAME-<pid>`)
/// - `SAGA_MAX_ATTEMPTS`, `SAGA_INITIAL_BACKOFF_MS`, `SAGA_MAX_BACKOFF_MS`,
///   `SAGA_JITTER_MS`: forward retry policy
/// - `SAGA_CALL_TIMEOUT_MS`: per-call collaborator timeout
/// - `SAGA_LEASE_SECS`: claim lease duration
/// - `POLL_INTERVAL_SECS`, `STALE_AFTER_SECS`: stale poller
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub worker_id: String,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub lease_duration: Duration,
    pub poll_interval: Duration,
    pub stale_after: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parse(key).map(Duration::from_millis).unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            parse(key).map(Duration::from_secs).unwrap_or(default)
        };

        let retry = RetryPolicy {
            max_attempts: parse("SAGA_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.retry.max_attempts),
            initial_backoff: millis("SAGA_INITIAL_BACKOFF_MS", defaults.retry.initial_backoff),
            max_backoff: millis("SAGA_MAX_BACKOFF_MS", defaults.retry.max_backoff),
            jitter: millis("SAGA_JITTER_MS", defaults.retry.jitter),
            ..defaults.retry
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            worker_id: lookup("WORKER_ID")
                .filter(|id| !id.trim().is_empty())
                .or_else(|| lookup("HOSTNAME").map(|host| format!("{host}-{}", std::process::id())))
                .unwrap_or(defaults.worker_id),
            retry,
            call_timeout: millis("SAGA_CALL_TIMEOUT_MS", defaults.call_timeout),
            lease_duration: secs("SAGA_LEASE_SECS", defaults.lease_duration),
            poll_interval: secs("POLL_INTERVAL_SECS", defaults.poll_interval),
            stale_after: secs("STALE_AFTER_SECS", defaults.stale_after),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            worker_id: self.worker_id.clone(),
            lease_duration: self.lease_duration,
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            stale_after: self.stale_after,
            ..PollerConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineConfig::default();
        let poller = PollerConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            worker_id: engine.worker_id,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(10),
            lease_duration: engine.lease_duration,
            poll_interval: poller.interval,
            stale_after: poller.stale_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert!(config.worker_id.starts_with("worker-"));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.lease_duration, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.stale_after, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/onboarding"),
            ("WORKER_ID", "worker-a"),
            ("SAGA_MAX_ATTEMPTS", "5"),
            ("SAGA_INITIAL_BACKOFF_MS", "50"),
            ("SAGA_CALL_TIMEOUT_MS", "1500"),
            ("SAGA_LEASE_SECS", "120"),
            ("STALE_AFTER_SECS", "90"),
        ]);
        assert_eq!(config.addr(), "0.0.0.0:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/onboarding")
        );
        assert_eq!(config.engine_config().worker_id, "worker-a");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(50));
        assert_eq!(config.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.engine_config().lease_duration, Duration::from_secs(120));
        assert_eq!(config.poller_config().stale_after, Duration::from_secs(90));
    }

    #[test]
    fn test_worker_id_falls_back_to_hostname() {
        let config = from_pairs(&[("HOSTNAME", "node-7")]);
        assert_eq!(
            config.worker_id,
            format!("node-7-{}", std::process::id())
        );
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("SAGA_MAX_ATTEMPTS", "0"),
            ("LOG_FORMAT", "xml"),
            ("DATABASE_URL", "  "),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
    }
}
