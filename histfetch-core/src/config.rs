//! Application configuration: TOML file, environment overrides, defaults.
//!
//! Precedence, lowest to highest: built-in defaults, config file,
//! `HISTFETCH_*` environment variables, CLI flags (applied by the caller).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::fetch::FetchPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub broker: BrokerConfig,
    pub historical: HistoricalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub auth_service_url: String,
    pub auth_service_api_key: String,
    pub broker_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub session_token: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_service_url: String::new(),
            auth_service_api_key: String::new(),
            broker_name: "zerodha".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            session_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub api_base_url: String,
    pub instruments_url: String,
    pub exchange: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.kite.trade".to_string(),
            instruments_url: "https://api.kite.trade/instruments/NSE".to_string(),
            exchange: "NSE".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalConfig {
    pub output_dir: String,
    pub parquet_enabled: bool,
    pub parquet_dir: String,
    pub interval: String,
    pub days_to_fetch: i64,
    pub request_delay_ms: u64,
    pub max_retries: u32,
    pub instruments_path: String,
    pub max_span_days: i64,
    pub min_splittable_days: i64,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            output_dir: "./historical_data".to_string(),
            parquet_enabled: false,
            parquet_dir: "./parquet_data".to_string(),
            interval: "minute".to_string(),
            days_to_fetch: 30,
            request_delay_ms: 500,
            max_retries: 3,
            instruments_path: "./instruments.csv".to_string(),
            max_span_days: 60,
            min_splittable_days: 5,
        }
    }
}

impl HistoricalConfig {
    /// Derive the fetch policy. Backoff is twice the pacing delay, keeping it
    /// strictly longer for any positive request delay.
    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            max_attempts: self.max_retries,
            backoff_delay: Duration::from_millis(self.request_delay_ms * 2),
            pacing_delay: Duration::from_millis(self.request_delay_ms),
            max_span_days: self.max_span_days,
            min_splittable_days: self.min_splittable_days,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file, then apply `HISTFETCH_*` environment overrides.
    /// A missing file is not an error: defaults plus environment apply.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_toml(&std::fs::read_to_string(path)?)?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides through the injected lookup; injection
    /// keeps precedence testable without mutating process state.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set_string = |target: &mut String, name: &str| {
            if let Some(value) = lookup(name) {
                *target = value;
            }
        };

        set_string(&mut self.auth.auth_service_url, "HISTFETCH_AUTH_SERVICE_URL");
        set_string(
            &mut self.auth.auth_service_api_key,
            "HISTFETCH_AUTH_SERVICE_KEY",
        );
        set_string(&mut self.auth.broker_name, "HISTFETCH_BROKER_NAME");
        set_string(&mut self.auth.api_key, "HISTFETCH_API_KEY");
        set_string(&mut self.auth.api_secret, "HISTFETCH_API_SECRET");
        set_string(&mut self.auth.session_token, "HISTFETCH_SESSION_TOKEN");
        set_string(&mut self.broker.api_base_url, "HISTFETCH_API_BASE_URL");
        set_string(&mut self.broker.instruments_url, "HISTFETCH_INSTRUMENTS_URL");
        set_string(&mut self.broker.exchange, "HISTFETCH_EXCHANGE");
        set_string(&mut self.historical.output_dir, "HISTFETCH_OUTPUT_DIR");
        set_string(&mut self.historical.parquet_dir, "HISTFETCH_PARQUET_DIR");
        set_string(&mut self.historical.interval, "HISTFETCH_INTERVAL");
        set_string(
            &mut self.historical.instruments_path,
            "HISTFETCH_INSTRUMENTS_PATH",
        );

        if let Some(value) = lookup("HISTFETCH_PARQUET_ENABLED") {
            self.historical.parquet_enabled = matches!(value.as_str(), "true" | "1" | "yes");
        }
        if let Some(value) = lookup("HISTFETCH_DAYS").and_then(|v| v.parse().ok()) {
            self.historical.days_to_fetch = value;
        }
        if let Some(value) = lookup("HISTFETCH_REQUEST_DELAY").and_then(|v| v.parse().ok()) {
            self.historical.request_delay_ms = value;
        }
        if let Some(value) = lookup("HISTFETCH_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.historical.max_retries = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_legacy_values() {
        let config = AppConfig::default();
        assert_eq!(config.auth.broker_name, "zerodha");
        assert_eq!(config.broker.exchange, "NSE");
        assert_eq!(config.historical.interval, "minute");
        assert_eq!(config.historical.days_to_fetch, 30);
        assert_eq!(config.historical.request_delay_ms, 500);
        assert_eq!(config.historical.max_retries, 3);
        assert_eq!(config.historical.max_span_days, 60);
        assert_eq!(config.historical.min_splittable_days, 5);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = AppConfig::from_toml(
            r#"
            [historical]
            interval = "day"
            days_to_fetch = 365

            [auth]
            api_key = "abc"
            "#,
        )
        .unwrap();

        assert_eq!(config.historical.interval, "day");
        assert_eq!(config.historical.days_to_fetch, 365);
        assert_eq!(config.historical.output_dir, "./historical_data");
        assert_eq!(config.auth.api_key, "abc");
        assert_eq!(config.auth.broker_name, "zerodha");
    }

    #[test]
    fn environment_wins_over_file_values() {
        let mut config = AppConfig::from_toml(
            r#"
            [historical]
            output_dir = "/from/file"
            max_retries = 7
            "#,
        )
        .unwrap();

        config.apply_env(|name| match name {
            "HISTFETCH_OUTPUT_DIR" => Some("/from/env".to_string()),
            "HISTFETCH_MAX_RETRIES" => Some("9".to_string()),
            "HISTFETCH_PARQUET_ENABLED" => Some("true".to_string()),
            _ => None,
        });

        assert_eq!(config.historical.output_dir, "/from/env");
        assert_eq!(config.historical.max_retries, 9);
        assert!(config.historical.parquet_enabled);
    }

    #[test]
    fn unparseable_numeric_overrides_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(|name| match name {
            "HISTFETCH_MAX_RETRIES" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(config.historical.max_retries, 3);
    }

    #[test]
    fn fetch_policy_backoff_is_twice_the_pacing_delay() {
        let policy = HistoricalConfig::default().fetch_policy();
        assert_eq!(policy.pacing_delay, Duration::from_millis(500));
        assert_eq!(policy.backoff_delay, Duration::from_millis(1000));
        assert!(policy.backoff_delay > policy.pacing_delay);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }
}
