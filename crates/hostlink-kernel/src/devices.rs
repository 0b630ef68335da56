//! [`DeviceTable`] – bounded memory of Bluetooth devices and WiFi networks.
//!
//! Radio scans are lossy: a device present a moment ago may be missed by
//! the next scan. Sightings are therefore merged into a table keyed by
//! identifier and kept until they have not been seen for the retention
//! window (twice the scan interval by default). The table never grows past
//! its capacity; when it would, the least recently seen entries go first.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hostlink_types::{DeviceRecord, ModuleName};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::scheduler::PollHook;

pub const DEFAULT_CAPACITY: usize = 128;

pub struct DeviceTable {
    entries: HashMap<String, DeviceRecord>,
    capacity: usize,
    retention: chrono::Duration,
}

impl DeviceTable {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            retention: chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    /// Retention of twice `scan_interval`.
    pub fn for_scan_interval(capacity: usize, scan_interval: Duration) -> Self {
        Self::new(capacity, scan_interval.saturating_mul(2))
    }

    /// Merge one scan's sightings, then evict expired and surplus entries.
    pub fn merge(&mut self, sightings: Vec<DeviceRecord>, now: DateTime<Utc>) {
        for record in sightings {
            self.entries.insert(record.identifier.clone(), record);
        }

        let cutoff = now - self.retention;
        self.entries.retain(|_, r| r.last_seen >= cutoff);

        if self.entries.len() > self.capacity {
            let mut by_age: Vec<(DateTime<Utc>, String)> = self
                .entries
                .values()
                .map(|r| (r.last_seen, r.identifier.clone()))
                .collect();
            by_age.sort();
            let surplus = self.entries.len() - self.capacity;
            for (_, id) in by_age.into_iter().take(surplus) {
                self.entries.remove(&id);
            }
        }
    }

    /// Retained records, strongest signal first.
    pub fn records(&self) -> Vec<DeviceRecord> {
        let mut list: Vec<DeviceRecord> = self.entries.values().cloned().collect();
        list.sort_by(|a, b| {
            b.signal_strength
                .cmp(&a.signal_strength)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        list
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merges the device list found under `key` of each scan result into a
/// [`DeviceTable`] and replaces it with the retained set.
pub struct DeviceScanHook {
    key: &'static str,
    table: Mutex<DeviceTable>,
}

impl DeviceScanHook {
    pub fn new(key: &'static str, table: DeviceTable) -> Self {
        Self { key, table: Mutex::new(table) }
    }
}

impl PollHook for DeviceScanHook {
    fn on_success(&self, module: ModuleName, value: &mut Value) {
        let sightings: Vec<DeviceRecord> = match value.get(self.key).cloned() {
            Some(list) => serde_json::from_value(list).unwrap_or_else(|e| {
                warn!(%module, error = %e, "malformed device list in scan result");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let records = {
            let mut table = self.table.lock();
            table.merge(sightings, Utc::now());
            table.records()
        };

        if let Some(obj) = value.as_object_mut() {
            obj.insert("count".to_string(), Value::from(records.len()));
            obj.insert(
                self.key.to_string(),
                serde_json::to_value(records).unwrap_or(Value::Array(Vec::new())),
            );
        }
    }
}
