//! Shared vocabulary for every hostlink crate.
//!
//! | Type | Role |
//! |---|---|
//! | [`ModuleName`] | Closed allow-list of capability domains |
//! | [`BroadcastClass`] | Subscription lanes a client can opt into |
//! | [`Envelope`] | `{cmd, val}` wire message used in both directions |
//! | [`CacheEntry`] | Immutable result of one successful poll |
//! | [`MountedVolume`] | A removable volume root the path guard trusts |
//! | [`DeviceRecord`] | One Bluetooth or WiFi scan sighting |
//! | [`LinkError`] | The error taxonomy surfaced to clients |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

/// Identifier handed to every accepted socket connection.
pub type ConnectionId = Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Modules
// ────────────────────────────────────────────────────────────────────────────

/// A named telemetry or control domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleName {
    System,
    Cpu,
    Memory,
    Disk,
    Network,
    Wifi,
    Bluetooth,
    Battery,
    Brightness,
    Volume,
    Usb,
    Fs,
}

impl ModuleName {
    /// Every module, in registration order.
    pub const ALL: [ModuleName; 12] = [
        ModuleName::System,
        ModuleName::Cpu,
        ModuleName::Memory,
        ModuleName::Disk,
        ModuleName::Network,
        ModuleName::Wifi,
        ModuleName::Bluetooth,
        ModuleName::Battery,
        ModuleName::Brightness,
        ModuleName::Volume,
        ModuleName::Usb,
        ModuleName::Fs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleName::System => "system",
            ModuleName::Cpu => "cpu",
            ModuleName::Memory => "memory",
            ModuleName::Disk => "disk",
            ModuleName::Network => "network",
            ModuleName::Wifi => "wifi",
            ModuleName::Bluetooth => "bluetooth",
            ModuleName::Battery => "battery",
            ModuleName::Brightness => "brightness",
            ModuleName::Volume => "volume",
            ModuleName::Usb => "usb",
            ModuleName::Fs => "fs",
        }
    }

    /// Default poll cadence, or `None` for modules that are only queried on
    /// demand (`system`, `fs`).
    pub fn default_interval(self) -> Option<Duration> {
        let ms = match self {
            ModuleName::Cpu
            | ModuleName::Memory
            | ModuleName::Disk
            | ModuleName::Network
            | ModuleName::Battery => 1_000,
            ModuleName::Usb => 2_000,
            ModuleName::Bluetooth | ModuleName::Brightness | ModuleName::Volume => 5_000,
            ModuleName::Wifi => 10_000,
            ModuleName::System | ModuleName::Fs => return None,
        };
        Some(Duration::from_millis(ms))
    }

    /// The subscription lane this module's updates travel on.
    pub fn broadcast_class(self) -> BroadcastClass {
        match self {
            ModuleName::System
            | ModuleName::Cpu
            | ModuleName::Memory
            | ModuleName::Disk
            | ModuleName::Network
            | ModuleName::Battery => BroadcastClass::Metrics,
            ModuleName::Wifi => BroadcastClass::Wifi,
            ModuleName::Bluetooth => BroadcastClass::Bluetooth,
            ModuleName::Brightness | ModuleName::Volume => BroadcastClass::Controls,
            ModuleName::Usb | ModuleName::Fs => BroadcastClass::Drives,
        }
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleName {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleName::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| LinkError::UnknownCommand(format!("unknown module: {s}")))
    }
}

/// Subscription lanes. A fresh connection receives every class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastClass {
    Metrics,
    Wifi,
    Bluetooth,
    Drives,
    Controls,
}

impl BroadcastClass {
    pub const ALL: [BroadcastClass; 5] = [
        BroadcastClass::Metrics,
        BroadcastClass::Wifi,
        BroadcastClass::Bluetooth,
        BroadcastClass::Drives,
        BroadcastClass::Controls,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BroadcastClass::Metrics => "metrics",
            BroadcastClass::Wifi => "wifi",
            BroadcastClass::Bluetooth => "bluetooth",
            BroadcastClass::Drives => "drives",
            BroadcastClass::Controls => "controls",
        }
    }
}

impl FromStr for BroadcastClass {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BroadcastClass::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| LinkError::InvalidArgument(format!("unknown broadcast class: {s}")))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire envelope
// ────────────────────────────────────────────────────────────────────────────

/// The `{cmd, val}` message exchanged over the socket protocol.
///
/// `val` is optional on input (`{"cmd":"ping"}` is valid) and defaults to
/// `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub cmd: String,
    #[serde(default)]
    pub val: Value,
}

impl Envelope {
    pub fn new(cmd: impl Into<String>, val: Value) -> Self {
        Self { cmd: cmd.into(), val }
    }

    /// Build an error-shaped reply. `command` names the request that failed.
    pub fn error(command: Option<&str>, err: &LinkError) -> Self {
        let mut val = err.to_value();
        if let (Some(cmd), Some(obj)) = (command, val.as_object_mut()) {
            obj.insert("command".to_string(), Value::String(cmd.to_string()));
        }
        Self::new("error", val)
    }

    pub fn is_error(&self) -> bool {
        self.cmd == "error"
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cache and device records
// ────────────────────────────────────────────────────────────────────────────

/// Immutable snapshot produced by one successful poll.
///
/// `generation` increases strictly with every write to the cache, so two
/// entries for the same module are always totally ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub module: ModuleName,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    pub generation: u64,
}

/// A mounted removable volume the path guard accepts paths under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedVolume {
    pub root_path: PathBuf,
    pub label: String,
    pub filesystem_kind: String,
    /// Block device node (`/dev/sdb1`), used to detect drive changes.
    #[serde(default)]
    pub device: String,
}

/// One Bluetooth device or WiFi network seen by a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub identifier: String,
    pub display_name: String,
    #[serde(default)]
    pub signal_strength: Option<i32>,
    pub last_seen: DateTime<Utc>,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Serialises as `{"kind": <snake_case kind>, "message": <display text>}`,
/// the shape clients see in error replies and module records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("provider for {module} timed out after {timeout_ms} ms")]
    ProviderTimeout { module: ModuleName, timeout_ms: u64 },

    #[error("provider for {module} failed: {details}")]
    ProviderFailure { module: ModuleName, details: String },

    #[error("{module} unavailable: {reason}")]
    Unavailable { module: ModuleName, reason: String },

    #[error("path rejected: {path} ({reason})")]
    PathRejected { path: String, reason: String },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("origin rejected: {0}")]
    OriginRejected(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("channel error: {0}")]
    Channel(String),
}

impl Serialize for LinkError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = serializer.serialize_struct("LinkError", 2)?;
        st.serialize_field("kind", self.kind())?;
        st.serialize_field("message", &self.to_string())?;
        st.end()
    }
}

impl LinkError {
    /// Stable snake_case identifier used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            LinkError::ProviderTimeout { .. } => "provider_timeout",
            LinkError::ProviderFailure { .. } => "provider_failure",
            LinkError::Unavailable { .. } => "unavailable",
            LinkError::PathRejected { .. } => "path_rejected",
            LinkError::UnknownCommand(_) => "unknown_command",
            LinkError::OriginRejected(_) => "origin_rejected",
            LinkError::ConnectionLost(_) => "connection_lost",
            LinkError::InvalidArgument(_) => "invalid_argument",
            LinkError::Channel(_) => "channel",
        }
    }

    /// `{"kind": ..., "message": ...}`.
    pub fn to_value(&self) -> Value {
        json!({ "kind": self.kind(), "message": self.to_string() })
    }

    pub fn failure(module: ModuleName, details: impl Into<String>) -> Self {
        LinkError::ProviderFailure { module, details: details.into() }
    }

    pub fn unavailable(module: ModuleName, reason: impl Into<String>) -> Self {
        LinkError::Unavailable { module, reason: reason.into() }
    }

    pub fn rejected(path: impl Into<String>, reason: impl Into<String>) -> Self {
        LinkError::PathRejected { path: path.into(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_names_parse_and_display() {
        for m in ModuleName::ALL {
            assert_eq!(m.as_str().parse::<ModuleName>().unwrap(), m);
            assert_eq!(m.to_string(), m.as_str());
        }
        assert!(matches!(
            "toaster".parse::<ModuleName>(),
            Err(LinkError::UnknownCommand(_))
        ));
    }

    #[test]
    fn documented_default_intervals() {
        assert_eq!(ModuleName::Cpu.default_interval(), Some(Duration::from_secs(1)));
        assert_eq!(ModuleName::Bluetooth.default_interval(), Some(Duration::from_secs(5)));
        assert_eq!(ModuleName::Volume.default_interval(), Some(Duration::from_secs(5)));
        assert_eq!(ModuleName::Usb.default_interval(), Some(Duration::from_secs(2)));
        assert_eq!(ModuleName::Wifi.default_interval(), Some(Duration::from_secs(10)));
        assert_eq!(ModuleName::Fs.default_interval(), None);
    }

    #[test]
    fn envelope_val_defaults_to_null() {
        let env: Envelope = serde_json::from_str(r#"{"cmd":"ping"}"#).unwrap();
        assert_eq!(env.cmd, "ping");
        assert!(env.val.is_null());
    }

    #[test]
    fn error_envelope_carries_kind_and_command() {
        let err = LinkError::rejected("/etc/passwd", "outside mounted volumes");
        let env = Envelope::error(Some("fs_read"), &err);
        assert!(env.is_error());
        assert_eq!(env.val["kind"], "path_rejected");
        assert_eq!(env.val["command"], "fs_read");
        assert!(env.val["message"].as_str().unwrap().contains("/etc/passwd"));
    }

    #[test]
    fn link_error_serializes_as_kind_and_message() {
        let err = LinkError::unavailable(ModuleName::Battery, "no battery");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v, json!({ "kind": "unavailable", "message": "battery unavailable: no battery" }));
        assert_eq!(v, err.to_value());

        let v = serde_json::to_value(LinkError::UnknownCommand("toast".into())).unwrap();
        assert_eq!(v["kind"], "unknown_command");
    }

    #[test]
    fn link_error_display() {
        let err = LinkError::ProviderTimeout { module: ModuleName::Wifi, timeout_ms: 5000 };
        assert_eq!(err.to_string(), "provider for wifi timed out after 5000 ms");
        assert_eq!(err.kind(), "provider_timeout");
    }
}
