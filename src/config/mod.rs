use crate::pool::PoolOptions;
use crate::utils::error::{Result, RustPoolError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub status_api: StatusApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Idle-queue capacity per address; 0 uses the logical CPU count.
    #[serde(default)]
    pub pool_size: usize,
    #[serde(default = "default_idle_conn_timeout_secs")]
    pub idle_conn_timeout_secs: u64,
    #[serde(default = "default_conn_timeout_ms")]
    pub conn_timeout_ms: u64,
    /// 0 means unbounded.
    #[serde(default)]
    pub max_open_conns: usize,
    /// 0 means a single attempt, no retry.
    #[serde(default)]
    pub max_retry: u32,
    /// 0 disables the read timeout.
    #[serde(default)]
    pub read_timeout_ms: u64,
    /// 0 disables the write timeout.
    #[serde(default)]
    pub write_timeout_ms: u64,
    /// 0 disables TCP keepalive on dialed sockets.
    #[serde(default)]
    pub tcp_keepalive_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "pretty"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_status_api_bind")]
    pub bind_address: String,
}

// Default values
fn default_idle_conn_timeout_secs() -> u64 {
    3600
}

fn default_conn_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_status_api_bind() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: 0,
            idle_conn_timeout_secs: default_idle_conn_timeout_secs(),
            conn_timeout_ms: default_conn_timeout_ms(),
            max_open_conns: 0,
            max_retry: 0,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            tcp_keepalive_secs: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for StatusApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_status_api_bind(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            logging: LoggingConfig::default(),
            status_api: StatusApiConfig::default(),
        }
    }
}

impl PoolSettings {
    /// Convert the file-level settings into runtime pool options.
    pub fn to_options(&self) -> PoolOptions {
        PoolOptions {
            pool_size: self.pool_size,
            idle_conn_timeout: Duration::from_secs(self.idle_conn_timeout_secs),
            conn_timeout: Duration::from_millis(self.conn_timeout_ms),
            max_open_conns: self.max_open_conns,
            max_retry: self.max_retry,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            tcp_keepalive: Duration::from_secs(self.tcp_keepalive_secs),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| RustPoolError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| RustPoolError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(RustPoolError::Config(format!(
                "Invalid log format: {}. Must be 'pretty' or 'json'",
                self.logging.format
            )));
        }

        if self.status_api.enabled && self.status_api.bind_address.trim().is_empty() {
            return Err(RustPoolError::Config(
                "status_api.bind_address cannot be empty when the API is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        let example = r#"[pool]
# Idle-queue capacity per destination address. 0 uses the logical CPU count.
pool_size = 0
# Seconds an idle connection may sit parked before it is discarded at checkout.
idle_conn_timeout_secs = 3600
# Dial deadline and acquisition wait, in milliseconds. 0 waits without bound.
conn_timeout_ms = 5000
# Per-address open-connection ceiling. 0 means unbounded.
max_open_conns = 0
# Extra attempts after a failed dial or stale eviction. 0 means a single attempt.
max_retry = 0
# Per-operation read/write timeouts for dialed connections, in milliseconds. 0 disables them.
read_timeout_ms = 0
write_timeout_ms = 0
# TCP keepalive idle time for dialed sockets, in seconds. 0 disables it.
tcp_keepalive_secs = 0

[logging]
level = "info"  # Options: "trace", "debug", "info", "warn", "error"
format = "pretty"  # Options: "pretty", "json"

[status_api]
enabled = false
bind_address = "127.0.0.1:9090"
"#;

        std::fs::write(path.as_ref(), example)
            .map_err(|e| RustPoolError::Config(format!("Failed to write example config: {}", e)))?;

        Ok(())
    }
}
