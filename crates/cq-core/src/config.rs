use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.config/cardqueue/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub worker_protocol: WorkerProtocolConfig,
    #[serde(default)]
    pub eventbus: EventBusConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            store: StoreConfig::default(),
            registry: RegistryConfig::default(),
            worker_protocol: WorkerProtocolConfig::default(),
            eventbus: EventBusConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.config/cardqueue/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("cardqueue")
            .join("config.toml")
    }

    /// Sanity-check cross-field invariants that serde's `#[serde(default)]`
    /// can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.stale_after_secs >= self.registry.offline_after_secs {
            return Err(ConfigError::Invalid(
                "registry.stale_after_secs must be less than registry.offline_after_secs".into(),
            ));
        }
        if self.worker_protocol.poll_rate_per_second == 0 {
            return Err(ConfigError::Invalid(
                "worker_protocol.poll_rate_per_second must be >= 1".into(),
            ));
        }
        if self.eventbus.subscriber_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "eventbus.subscriber_queue_capacity must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
            data_dir: None,
        }
    }
}

fn default_project_name() -> String {
    "cardqueue".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Seconds a terminal task is kept before the background sweeper purges
    /// it. `0` disables the sweep.
    #[serde(default)]
    pub retention_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retention_ttl_secs: 0,
        }
    }
}

fn default_sqlite_path() -> String {
    "~/.config/cardqueue/store.db".into()
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    10
}
fn default_max_delay_ms() -> u64 {
    160
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_offline_after_secs")]
    pub offline_after_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            offline_after_secs: default_offline_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    90
}
fn default_offline_after_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProtocolConfig {
    #[serde(default = "default_poll_rate")]
    pub poll_rate_per_second: u64,
    #[serde(default = "default_stream_heartbeat_secs")]
    pub stream_heartbeat_secs: u64,
}

impl Default for WorkerProtocolConfig {
    fn default() -> Self {
        Self {
            poll_rate_per_second: default_poll_rate(),
            stream_heartbeat_secs: default_stream_heartbeat_secs(),
        }
    }
}

fn default_poll_rate() -> u64 {
    1
}
fn default_stream_heartbeat_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_queue_capacity")]
    pub subscriber_queue_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_host")]
    pub host: String,
    /// Bind port. `0` asks the OS for an ephemeral port (the lockfile
    /// records whatever was actually bound).
    #[serde(default = "default_daemon_port")]
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_daemon_host(),
            port: default_daemon_port(),
        }
    }
}

fn default_daemon_host() -> String {
    "127.0.0.1".into()
}
fn default_daemon_port() -> u16 {
    8080
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.registry.stale_after_secs, 90);
        assert_eq!(cfg.registry.offline_after_secs, 300);
        assert_eq!(cfg.registry.sweep_interval_secs, 30);
        assert_eq!(cfg.worker_protocol.poll_rate_per_second, 1);
        assert_eq!(cfg.worker_protocol.stream_heartbeat_secs, 15);
        assert_eq!(cfg.eventbus.subscriber_queue_capacity, 100);
    }

    #[test]
    fn roundtrips_through_toml() {
        let cfg = Config::default();
        let toml_str = cfg.to_toml().unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.general.project_name, "cardqueue");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let partial = r#"
[general]
project_name = "my-board"
"#;
        let cfg: Config = toml::from_str(partial).unwrap();
        assert_eq!(cfg.general.project_name, "my-board");
        assert_eq!(cfg.registry.stale_after_secs, 90);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_stale_threshold_past_offline_threshold() {
        let mut cfg = Config::default();
        cfg.registry.stale_after_secs = 400;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_poll_rate() {
        let mut cfg = Config::default();
        cfg.worker_protocol.poll_rate_per_second = 0;
        assert!(cfg.validate().is_err());
    }
}
