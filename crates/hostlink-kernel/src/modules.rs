//! [`ModuleRegistry`] – per-module health bookkeeping.
//!
//! Every allowed module is registered once at startup with its poll
//! interval. Poller tasks then report each outcome: successes reset the
//! failure streak, failures and timeouts extend it, and ticks skipped
//! because the previous poll is still running are counted separately.
//!
//! A module whose last `stale_after` consecutive polls failed is reported as
//! *stale*; its cached value (if any) is still served but flagged.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hostlink_types::{LinkError, ModuleName};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Consecutive failed cycles before a module is flagged stale.
pub const DEFAULT_STALE_AFTER: u32 = 3;

/// Health record for one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRecord {
    pub module: ModuleName,
    /// `None` for on-demand modules (`system`, `fs`).
    #[serde(serialize_with = "ser_interval")]
    pub interval: Option<Duration>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<LinkError>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub polls: u64,
    pub failures: u64,
    pub skipped: u64,
    pub stale: bool,
}

fn ser_interval<S: serde::Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(d) => s.serialize_some(&(d.as_millis() as u64)),
        None => s.serialize_none(),
    }
}

impl ModuleRecord {
    fn new(module: ModuleName, interval: Option<Duration>) -> Self {
        Self {
            module,
            interval,
            last_success: None,
            last_error: None,
            last_error_at: None,
            consecutive_failures: 0,
            polls: 0,
            failures: 0,
            skipped: 0,
            stale: false,
        }
    }
}

/// Registry of allowed modules and their health.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hostlink_kernel::ModuleRegistry;
/// use hostlink_types::{LinkError, ModuleName};
///
/// let reg = ModuleRegistry::new(2);
/// reg.register(ModuleName::Wifi, Some(Duration::from_secs(10)));
/// reg.record_failure(ModuleName::Wifi, LinkError::failure(ModuleName::Wifi, "nmcli"));
/// assert!(!reg.is_stale(ModuleName::Wifi));
/// reg.record_failure(ModuleName::Wifi, LinkError::failure(ModuleName::Wifi, "nmcli"));
/// assert!(reg.is_stale(ModuleName::Wifi));
/// ```
pub struct ModuleRegistry {
    records: RwLock<BTreeMap<ModuleName, ModuleRecord>>,
    stale_after: u32,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}

impl ModuleRegistry {
    pub fn new(stale_after: u32) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            stale_after: stale_after.max(1),
        }
    }

    /// Register `module`. Re-registering resets its record.
    pub fn register(&self, module: ModuleName, interval: Option<Duration>) {
        self.records.write().insert(module, ModuleRecord::new(module, interval));
    }

    pub fn is_registered(&self, module: ModuleName) -> bool {
        self.records.read().contains_key(&module)
    }

    /// Registered modules in name order.
    pub fn modules(&self) -> Vec<ModuleName> {
        self.records.read().keys().copied().collect()
    }

    pub fn record_success(&self, module: ModuleName, at: DateTime<Utc>) {
        if let Some(r) = self.records.write().get_mut(&module) {
            r.polls += 1;
            r.last_success = Some(at);
            r.consecutive_failures = 0;
            r.stale = false;
        }
    }

    pub fn record_failure(&self, module: ModuleName, error: LinkError) {
        let mut records = self.records.write();
        let Some(r) = records.get_mut(&module) else {
            return;
        };
        r.polls += 1;
        r.failures += 1;
        r.consecutive_failures += 1;
        r.last_error = Some(error);
        r.last_error_at = Some(Utc::now());
        let became_stale = !r.stale && r.consecutive_failures >= self.stale_after;
        r.stale = r.consecutive_failures >= self.stale_after;
        if became_stale {
            warn!(%module, failures = r.consecutive_failures, "module is now stale");
        }
    }

    /// A tick skipped because the previous poll had not finished.
    pub fn record_skip(&self, module: ModuleName) {
        if let Some(r) = self.records.write().get_mut(&module) {
            r.skipped += 1;
        }
    }

    pub fn is_stale(&self, module: ModuleName) -> bool {
        self.records.read().get(&module).is_some_and(|r| r.stale)
    }

    pub fn record(&self, module: ModuleName) -> Option<ModuleRecord> {
        self.records.read().get(&module).cloned()
    }

    /// Every record as a JSON object keyed by module name.
    pub fn status(&self) -> Value {
        let records = self.records.read();
        let map = records
            .values()
            .map(|r| {
                let v = serde_json::to_value(r).unwrap_or(Value::Null);
                (r.module.as_str().to_string(), v)
            })
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> LinkError {
        LinkError::failure(ModuleName::Bluetooth, "radio off")
    }

    #[test]
    fn success_resets_failure_streak() {
        let reg = ModuleRegistry::new(3);
        reg.register(ModuleName::Bluetooth, Some(Duration::from_secs(5)));
        for _ in 0..3 {
            reg.record_failure(ModuleName::Bluetooth, failure());
        }
        assert!(reg.is_stale(ModuleName::Bluetooth));
        reg.record_success(ModuleName::Bluetooth, Utc::now());
        let r = reg.record(ModuleName::Bluetooth).unwrap();
        assert!(!r.stale);
        assert_eq!(r.consecutive_failures, 0);
        assert_eq!(r.failures, 3);
        assert_eq!(r.polls, 4);
        assert!(r.last_error.is_some());
    }

    #[test]
    fn unregistered_modules_are_ignored() {
        let reg = ModuleRegistry::default();
        reg.record_failure(ModuleName::Cpu, failure());
        reg.record_skip(ModuleName::Cpu);
        assert!(reg.record(ModuleName::Cpu).is_none());
        assert!(!reg.is_stale(ModuleName::Cpu));
    }

    #[test]
    fn status_serialises_interval_and_error() {
        let reg = ModuleRegistry::default();
        reg.register(ModuleName::Usb, Some(Duration::from_secs(2)));
        reg.register(ModuleName::Fs, None);
        reg.record_failure(ModuleName::Usb, failure());
        reg.record_skip(ModuleName::Usb);
        let status = reg.status();
        assert_eq!(status["usb"]["interval"], 2000);
        assert_eq!(status["usb"]["last_error"]["kind"], "provider_failure");
        assert_eq!(status["usb"]["skipped"], 1);
        assert!(status["fs"]["interval"].is_null());
        assert_eq!(reg.modules(), vec![ModuleName::Usb, ModuleName::Fs]);
    }
}
