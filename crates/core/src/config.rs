//! TOML configuration. Every section has defaults so a partial file (or no
//! file at all) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ports::{DEFAULT_FALLBACK_PORTS, PRIORITY_PORTS, VENDOR_BINARY_PORT};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub cache: CacheConfig,
    pub wire: WireConfig,
    pub connection: ConnectionConfig,
    pub reconnect: ReconnectConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Phase 1 budget (multicast listen window)
    pub multicast_timeout_ms: u64,
    /// Phase 2 budget
    pub priority_scan_budget_ms: u64,
    /// Phase 3 budget
    pub full_scan_budget_ms: u64,
    /// Per-connect / per-probe timeout
    pub probe_timeout_ms: u64,
    /// Maximum concurrent sockets during scans and classification
    pub max_concurrent_sockets: usize,
    pub priority_ports: Vec<u16>,
    /// Added to the built-in catalog for Phase 3
    pub extra_ports: Vec<u16>,
    pub enable_ws_discovery: bool,
    pub enable_ssdp: bool,
    pub enable_mdns: bool,
    pub enable_full_scan: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_timeout_ms: 5_000,
            priority_scan_budget_ms: 15_000,
            full_scan_budget_ms: 30_000,
            probe_timeout_ms: 800,
            max_concurrent_sockets: 64,
            priority_ports: PRIORITY_PORTS.to_vec(),
            extra_ports: Vec::new(),
            enable_ws_discovery: true,
            enable_ssdp: true,
            enable_mdns: true,
            enable_full_scan: true,
        }
    }
}

impl DiscoveryConfig {
    pub fn multicast_timeout(&self) -> Duration {
        Duration::from_millis(self.multicast_timeout_ms)
    }

    pub fn priority_scan_budget(&self) -> Duration {
        Duration::from_millis(self.priority_scan_budget_ms)
    }

    pub fn full_scan_budget(&self) -> Duration {
        Duration::from_millis(self.full_scan_budget_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// JSON snapshot written after each discovery session
    pub snapshot_path: Option<PathBuf>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            snapshot_path: None,
        }
    }
}

/// Vendor binary protocol constants
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    pub magic: u32,
    pub success_code: i64,
    pub login_type: String,
    pub port: u16,
    pub max_payload_bytes: usize,
    pub io_timeout_ms: u64,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            magic: 0xFF01_0000,
            success_code: 100,
            login_type: "DVRIP-Web".to_string(),
            port: VENDOR_BINARY_PORT,
            max_payload_bytes: 1024 * 1024,
            io_timeout_ms: 3_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Per-protocol detection timeout when the type is undetermined
    pub detect_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub default_fallback_ports: Vec<u16>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            detect_timeout_ms: 2_000,
            connect_timeout_ms: 5_000,
            default_fallback_ports: DEFAULT_FALLBACK_PORTS.to_vec(),
        }
    }
}

impl ConnectionConfig {
    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub health_check_interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 8,
            health_check_interval_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse camscout configuration")
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Platform config location, e.g. `~/.config/camscout/camscout.toml`
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?
            .join("camscout");
        Ok(dir.join("camscout.toml"))
    }
}
