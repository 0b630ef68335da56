//! Configuration – reads `~/.hostlink/config.toml`.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! `HOSTLINK_CONFIG` points at a different file.

use std::collections::BTreeMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use hostlink_hal::platform::ProviderKind;
use hostlink_kernel::origin::DEFAULT_ALLOWED_ORIGINS;
use hostlink_server::{DEFAULT_HTTP_PORT, DEFAULT_WS_PORT};
use hostlink_types::ModuleName;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listen address for both servers.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Modules to enable. Unknown names are ignored with a warning.
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,

    /// Origins admitted by exact match.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Remote `{"origins": [...]}` document merged in at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origins_url: Option<String>,

    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    #[serde(default = "default_mount_timeout_ms")]
    pub mount_timeout_ms: u64,

    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Consecutive failed polls before a module is flagged stale.
    #[serde(default = "default_stale_after_failures")]
    pub stale_after_failures: u32,

    #[serde(default = "default_max_tracked_devices")]
    pub max_tracked_devices: usize,

    /// Outbound messages buffered per client before it is dropped.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    #[serde(default = "default_fs_read_max_bytes")]
    pub fs_read_max_bytes: u64,

    #[serde(default = "default_fs_list_max_entries")]
    pub fs_list_max_entries: usize,

    /// Poll interval overrides in milliseconds, keyed by module name.
    /// `0` turns polling off for that module.
    #[serde(default)]
    pub intervals: BTreeMap<String, u64>,

    /// `auto` or `sim`.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Mount unmounted removable partitions before each USB scan.
    #[serde(default = "default_auto_mount")]
    pub auto_mount: bool,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_ws_port() -> u16 {
    DEFAULT_WS_PORT
}
fn default_allowed_modules() -> Vec<String> {
    ModuleName::ALL.iter().map(|m| m.as_str().to_string()).collect()
}
fn default_allowed_origins() -> Vec<String> {
    DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect()
}
fn default_provider_timeout_ms() -> u64 {
    5_000
}
fn default_mount_timeout_ms() -> u64 {
    30_000
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_stale_after_failures() -> u32 {
    3
}
fn default_max_tracked_devices() -> usize {
    128
}
fn default_send_queue_capacity() -> usize {
    256
}
fn default_fs_read_max_bytes() -> u64 {
    1024 * 1024
}
fn default_fs_list_max_entries() -> usize {
    50
}
fn default_provider() -> String {
    "auto".to_string()
}
fn default_auto_mount() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
            allowed_modules: default_allowed_modules(),
            allowed_origins: default_allowed_origins(),
            origins_url: None,
            provider_timeout_ms: default_provider_timeout_ms(),
            mount_timeout_ms: default_mount_timeout_ms(),
            worker_pool_size: default_worker_pool_size(),
            stale_after_failures: default_stale_after_failures(),
            max_tracked_devices: default_max_tracked_devices(),
            send_queue_capacity: default_send_queue_capacity(),
            fs_read_max_bytes: default_fs_read_max_bytes(),
            fs_list_max_entries: default_fs_list_max_entries(),
            intervals: BTreeMap::new(),
            provider: default_provider(),
            auto_mount: default_auto_mount(),
        }
    }
}

impl Config {
    /// Enabled modules in canonical order, duplicates and unknown names
    /// removed.
    pub fn modules(&self) -> Vec<ModuleName> {
        let mut enabled = Vec::new();
        for name in &self.allowed_modules {
            match name.parse::<ModuleName>() {
                Ok(m) if !enabled.contains(&m) => enabled.push(m),
                Ok(_) => {}
                Err(_) => warn!(module = %name, "ignoring unknown module in allowed_modules"),
            }
        }
        enabled.sort();
        enabled
    }

    /// Poll interval for `module`, or `None` when it is not polled.
    pub fn interval_for(&self, module: ModuleName) -> Option<Duration> {
        match self.intervals.get(module.as_str()) {
            Some(0) => None,
            Some(&ms) => Some(Duration::from_millis(ms)),
            None => module.default_interval(),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn mount_timeout(&self) -> Duration {
        Duration::from_millis(self.mount_timeout_ms)
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.parse().unwrap_or_else(|e| {
            warn!(provider = %self.provider, error = %e, "falling back to automatic provider selection");
            ProviderKind::Auto
        })
    }
}

/// `$HOSTLINK_CONFIG`, else `~/.hostlink/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("HOSTLINK_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".hostlink").join("config.toml")
}

/// Load the config file (defaults when absent) and apply environment
/// overrides.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse the file at `path`. Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `HOSTLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HOSTLINK_BIND` | `bind_address` |
/// | `HOSTLINK_HTTP_PORT` | `http_port` |
/// | `HOSTLINK_WS_PORT` | `ws_port` |
/// | `HOSTLINK_ORIGINS_URL` | `origins_url` |
/// | `HOSTLINK_PROVIDER` | `provider` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HOSTLINK_BIND")
        && let Ok(addr) = v.parse::<IpAddr>()
    {
        cfg.bind_address = addr;
    }
    if let Ok(v) = std::env::var("HOSTLINK_HTTP_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.http_port = port;
    }
    if let Ok(v) = std::env::var("HOSTLINK_WS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.ws_port = port;
    }
    if let Ok(v) = std::env::var("HOSTLINK_ORIGINS_URL") {
        cfg.origins_url = Some(v).filter(|u| !u.trim().is_empty());
    }
    if let Ok(v) = std::env::var("HOSTLINK_PROVIDER") {
        cfg.provider = v;
    }
}
