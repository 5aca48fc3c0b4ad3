//! Configuration management for the swap daemon
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::binder::DEFAULT_POLL_INTERVAL;
use crate::task::DEFAULT_CAPACITY;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub daemon: DaemonConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub binder: BinderConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub instance_id: String,
    /// Capacity of every task queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file, created if missing
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub orderbook_address: String,
    #[serde(default)]
    pub settlement_address: String,
    /// Traders whose orders may be matched
    #[serde(default)]
    pub authorized_addresses: Vec<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_match_timeout_secs")]
    pub match_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_queue_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_max_connections() -> u32 {
    4
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_match_timeout_secs() -> u64 {
    24 * 60 * 60
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc_url: String::new(),
            orderbook_address: String::new(),
            settlement_address: String::new(),
            authorized_addresses: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
            match_timeout_secs: default_match_timeout_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl DaemonConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl BinderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn match_timeout(&self) -> Duration {
        Duration::from_secs(self.match_timeout_secs)
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAPD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse and validate a TOML document
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.daemon.queue_capacity == 0 {
            anyhow::bail!("daemon.queue_capacity must be positive");
        }
        if self.daemon.tick_interval_ms == 0 {
            anyhow::bail!("daemon.tick_interval_ms must be positive");
        }
        if self.database.path.is_empty() {
            anyhow::bail!("database.path is required");
        }

        for addr in &self.binder.authorized_addresses {
            Address::from_str(addr.trim())
                .map_err(|e| anyhow::anyhow!("Invalid authorized address {}: {}", addr, e))?;
        }

        if self.binder.enabled {
            if self.binder.rpc_url.is_empty() {
                anyhow::bail!("binder.rpc_url is required when the binder is enabled");
            }
            if self.binder.authorized_addresses.is_empty() {
                anyhow::bail!("binder.authorized_addresses must not be empty");
            }
            if self.binder.poll_interval_ms == 0 {
                anyhow::bail!("binder.poll_interval_ms must be positive");
            }
            if self.binder.match_timeout_secs == 0 {
                anyhow::bail!("binder.match_timeout_secs must be positive");
            }
        } else {
            tracing::warn!("Binder disabled - delayed swaps will not be matched");
        }

        Ok(())
    }
}

lazy_static! {
    static ref ENV_VAR: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid");
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [daemon]
        instance_id = "swapd-test"

        [database]
        path = "data/swapd.db"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let settings = Settings::parse(MINIMAL).unwrap();

        assert_eq!(settings.daemon.queue_capacity, DEFAULT_CAPACITY);
        assert_eq!(settings.database.max_connections, 4);
        assert!(!settings.binder.enabled);
        assert_eq!(settings.binder.poll_interval(), Duration::from_secs(10));
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_binder_section() {
        env::set_var("SWAPD_TEST_RPC", "http://localhost:8545");
        let config = format!(
            r#"{}
            [binder]
            enabled = true
            rpc_url = "${{SWAPD_TEST_RPC}}"
            orderbook_address = "0x0000000000000000000000000000000000000001"
            settlement_address = "0x0000000000000000000000000000000000000002"
            authorized_addresses = ["0x5B38Da6a701c568545dCfcB03FcB875f56beddC4"]
            poll_interval_ms = 250
            "#,
            MINIMAL
        );

        let settings = Settings::parse(&config).unwrap();
        assert_eq!(settings.binder.rpc_url, "http://localhost:8545");
        assert_eq!(settings.binder.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let zero_capacity = MINIMAL.replace(
            "instance_id = \"swapd-test\"",
            "instance_id = \"swapd-test\"\nqueue_capacity = 0",
        );
        assert!(Settings::parse(&zero_capacity).is_err());

        let empty_allow_list = format!(
            "{}\n[binder]\nenabled = true\nrpc_url = \"http://localhost:8545\"\n",
            MINIMAL
        );
        assert!(Settings::parse(&empty_allow_list).is_err());

        let bad_address = format!(
            "{}\n[binder]\nauthorized_addresses = [\"0xnope\"]\n",
            MINIMAL
        );
        assert!(Settings::parse(&bad_address).is_err());
    }
}
