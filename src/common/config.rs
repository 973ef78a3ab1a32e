//! Runner settings
//!
//! Engine-side defaults for retries, timeouts and worker pool size. Values
//! come from `config.toml` in the platform config directory, then from
//! `S3TESTER_*` environment variables. Invocation flags override both.

use serde::Deserialize;
use std::time::Duration;

use super::paths::settings_path;
use super::Result;

/// Prefix for environment overrides
const ENV_PREFIX: &str = "S3TESTER_";

/// Main settings structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    /// Retry and backoff settings
    #[serde(default)]
    pub retry: RetrySettings,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Execution settings
    #[serde(default)]
    pub execution: ExecutionSettings,
}

/// Retry and backoff settings
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Retries allowed for retryable error codes
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retries allowed for errors that are neither retryable nor non-retryable
    #[serde(default = "default_unclassified_retries")]
    pub unclassified_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Growth factor applied per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Scale each delay by a random factor in [0.5, 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            unclassified_retries: default_unclassified_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_unclassified_retries() -> u32 {
    2
}
fn default_base_delay() -> u64 {
    1_000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}

/// Timeout settings in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct Timeouts {
    /// Timeout for a single dispatch attempt
    #[serde(default = "default_operation_timeout")]
    pub operation_secs: u64,

    /// Connect timeout handed to the S3 client
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            operation_secs: default_operation_timeout(),
            connect_secs: default_connect_timeout(),
        }
    }
}

fn default_operation_timeout() -> u64 {
    300
}
fn default_connect_timeout() -> u64 {
    30
}

/// Execution settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSettings {
    /// Operations dispatched concurrently within one phase
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    10
}

impl Settings {
    /// Load settings from the default settings file plus environment
    ///
    /// Returns defaults (with environment overrides) if the file doesn't exist
    pub fn load() -> Result<Self> {
        let mut settings = match settings_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| super::Error::config_read(&path, e))?;
                Self::from_toml_str(&content)?
            }
            _ => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::SettingsParse(e.to_string()))
    }

    /// Apply `S3TESTER_*` overrides; unparseable values are ignored
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(v) = get("MAX_RETRIES").and_then(|v| v.trim().parse().ok()) {
            self.retry.max_retries = v;
        }
        if let Some(v) = get("BASE_DELAY").and_then(|v| secs_to_millis(&v)) {
            self.retry.base_delay_ms = v;
        }
        if let Some(v) = get("MAX_DELAY").and_then(|v| secs_to_millis(&v)) {
            self.retry.max_delay_ms = v;
        }
        if let Some(v) = get("EXPONENTIAL_FACTOR").and_then(|v| v.trim().parse().ok()) {
            self.retry.multiplier = v;
        }
        if let Some(v) = get("RETRY_JITTER") {
            self.retry.jitter = matches!(
                v.trim().to_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            );
        }
        if let Some(v) = get("READ_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            self.timeouts.operation_secs = v;
        }
        if let Some(v) = get("CONNECT_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            self.timeouts.connect_secs = v;
        }
        if let Some(v) = get("WORKERS").and_then(|v| v.trim().parse::<usize>().ok()) {
            self.execution.workers = v.max(1);
        }
    }

    /// Per-attempt dispatch timeout
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.operation_secs)
    }
}

fn secs_to_millis(value: &str) -> Option<u64> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some((secs * 1000.0).round() as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.retry.unclassified_retries, 2);
        assert_eq!(settings.execution.workers, 10);
        assert_eq!(settings.operation_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
[retry]
max_retries = 5

[execution]
workers = 2
"#,
        )
        .unwrap();
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.base_delay_ms, 1_000);
        assert_eq!(settings.execution.workers, 2);
        assert_eq!(settings.timeouts.connect_secs, 30);
    }

    #[test]
    fn test_invalid_toml_is_settings_error() {
        let err = Settings::from_toml_str("[retry]\nmax_retries = \"many\"").unwrap_err();
        assert!(matches!(err, crate::common::Error::SettingsParse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("S3TESTER_MAX_RETRIES", "7"),
            ("S3TESTER_BASE_DELAY", "0.25"),
            ("S3TESTER_RETRY_JITTER", "off"),
            ("S3TESTER_WORKERS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.retry.max_retries, 7);
        assert_eq!(settings.retry.base_delay_ms, 250);
        assert!(!settings.retry.jitter);
        assert_eq!(settings.execution.workers, 10);
    }
}
