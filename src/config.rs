use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the watcher.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Zabbix server connection configuration.
    #[serde(default)]
    pub zabbix: ZabbixConfig,

    /// DynamoDB persistence configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// How often to run the snapshot pipeline. Default: 60s.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

/// Zabbix server connection configuration.
#[derive(Debug, Deserialize)]
pub struct ZabbixConfig {
    /// Zabbix JSON-RPC endpoint (e.g., "https://zabbix.example.com/api_jsonrpc.php").
    #[serde(default)]
    pub endpoint: String,

    /// API auth token. Falls back to the ZABBIX_AUTH environment variable.
    #[serde(default)]
    pub auth_token: String,

    /// Host id representing the Zabbix server itself, used to key the
    /// sentinel record written when the server cannot be reached.
    #[serde(default)]
    pub own_hostid: String,

    /// Minimum trigger severity to fetch (0-5). Default: 4.
    #[serde(default = "default_min_severity")]
    pub min_severity: u8,

    /// Request timeout. Default: 10s.
    #[serde(default = "default_zabbix_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// DynamoDB persistence configuration.
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Table receiving host snapshot records. Default: "zabbix.hosts".
    #[serde(default = "default_hosts_table")]
    pub hosts_table: String,

    /// Table receiving event records. Default: "zabbix.events".
    #[serde(default = "default_events_table")]
    pub events_table: String,

    /// AWS region override.
    #[serde(default)]
    pub region: Option<String>,

    /// Endpoint URL override (e.g., a local DynamoDB for development).
    #[serde(default)]
    pub endpoint: Option<String>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_min_severity() -> u8 {
    4
}

fn default_zabbix_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_hosts_table() -> String {
    "zabbix.hosts".to_string()
}

fn default_events_table() -> String {
    "zabbix.events".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            zabbix: ZabbixConfig::default(),
            store: StoreConfig::default(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for ZabbixConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auth_token: String::new(),
            own_hostid: String::new(),
            min_severity: default_min_severity(),
            timeout: default_zabbix_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hosts_table: default_hosts_table(),
            events_table: default_events_table(),
            region: None,
            endpoint: None,
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// The Zabbix auth token may be left out of the file and supplied via
    /// the ZABBIX_AUTH environment variable instead.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let mut cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        if cfg.zabbix.auth_token.is_empty() {
            if let Ok(token) = std::env::var("ZABBIX_AUTH") {
                cfg.zabbix.auth_token = token;
            }
        }

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.zabbix.endpoint.is_empty() {
            bail!("zabbix.endpoint is required");
        }

        if self.zabbix.auth_token.is_empty() {
            bail!("zabbix.auth_token is required (or set ZABBIX_AUTH)");
        }

        if self.zabbix.own_hostid.is_empty() {
            bail!("zabbix.own_hostid is required");
        }

        if self.zabbix.min_severity > 5 {
            bail!(
                "zabbix.min_severity must be 0-5, got {}",
                self.zabbix.min_severity
            );
        }

        if self.zabbix.timeout.is_zero() {
            bail!("zabbix.timeout must be positive");
        }

        if self.store.hosts_table.is_empty() {
            bail!("store.hosts_table is required");
        }

        if self.store.events_table.is_empty() {
            bail!("store.events_table is required");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be positive");
        }

        Ok(())
    }
}
