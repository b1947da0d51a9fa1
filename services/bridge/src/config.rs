//! Bridge daemon configuration
//!
//! TOML file describing the host link, the optional embedded relay, the
//! PID file location and the set of adapter instances to configure and
//! activate at startup. The path comes from `--config`, the
//! `RSP_BRIDGE_CONFIG` environment variable, or the compiled-in default,
//! in that order of precedence.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable overriding the config file path
pub const CONFIG_PATH_ENV: &str = "RSP_BRIDGE_CONFIG";

/// Fallback config path when neither `--config` nor the env var is set
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rsp-bridge/bridge.toml";

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Adapter instances started at boot, in file order
    #[serde(default, rename = "adapter")]
    pub adapters: Vec<AdapterInstance>,
}

/// Host link settings
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_host")]
    pub address: String,

    #[serde(default = "default_host_port")]
    pub port: u16,

    /// Outbound frame queue depth shared by all adapters
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Queue depth of each adapter's inbound command channel
    #[serde(default = "default_handler_queue")]
    pub handler_queue: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: default_host(),
            port: default_host_port(),
            outbound_queue: default_outbound_queue(),
            handler_queue: default_handler_queue(),
        }
    }
}

/// Embedded group relay settings
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Milliseconds before a slow relay member is dropped
    #[serde(default = "default_relay_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_relay_port(),
            write_timeout_ms: default_relay_write_timeout_ms(),
        }
    }
}

impl RelaySection {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Process-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
        }
    }
}

/// One adapter instance: type, name and free-form parameters
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterInstance {
    #[serde(rename = "type")]
    pub adapter_type: String,

    pub name: String,

    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_host_port() -> u16 {
    42001
}
fn default_outbound_queue() -> usize {
    256
}
fn default_handler_queue() -> usize {
    64
}
fn default_relay_port() -> u16 {
    42002
}
fn default_relay_write_timeout_ms() -> u64 {
    2000
}
fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/rsp-bridge.pid")
}

impl BridgeConfig {
    /// Load and parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        info!(
            path = %path.display(),
            adapters = config.adapters.len(),
            relay = config.relay.enabled,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Resolve the config path: CLI flag, then env var, then default
    pub fn resolve_path(cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.host.address, "127.0.0.1");
        assert_eq!(config.host.port, 42001);
        assert!(!config.relay.enabled);
        assert_eq!(config.relay.port, 42002);
        assert!(config.adapters.is_empty());
    }

    #[test]
    fn test_full_config_parses() {
        let raw = r#"
            [host]
            address = "10.0.0.5"
            port = 42010

            [relay]
            enabled = true
            port = 42002

            [daemon]
            pid_file = "/tmp/bridge.pid"

            [[adapter]]
            type = "timer"
            name = "tick"
            [adapter.params]
            "poll.interval" = "0.5"

            [[adapter]]
            type = "heartbeat"
            name = "alive"
        "#;
        let config: BridgeConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.host.address, "10.0.0.5");
        assert!(config.relay.enabled);
        assert_eq!(config.daemon.pid_file, PathBuf::from("/tmp/bridge.pid"));
        assert_eq!(config.adapters.len(), 2);
        assert_eq!(config.adapters[0].adapter_type, "timer");
        assert_eq!(
            config.adapters[0].params.get("poll.interval").map(String::as_str),
            Some("0.5")
        );
    }

    #[test]
    fn test_resolve_path_prefers_cli() {
        let path = BridgeConfig::resolve_path(Some(PathBuf::from("/tmp/x.toml")));
        assert_eq!(path, PathBuf::from("/tmp/x.toml"));
    }
}
