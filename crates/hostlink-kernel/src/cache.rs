//! [`MetricsCache`] – the most recent successful value per module.
//!
//! Entries are immutable `Arc<CacheEntry>` snapshots. A write swaps the
//! `Arc` under a short write lock; a read clones the `Arc` under a short read
//! lock. Neither side ever holds the lock across a provider call, so readers
//! observe either the old or the new entry and never a partial one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use hostlink_types::{CacheEntry, ModuleName};
use parking_lot::RwLock;
use serde_json::{Map, Value};

#[derive(Default)]
pub struct MetricsCache {
    entries: RwLock<HashMap<ModuleName, Arc<CacheEntry>>>,
    generation: AtomicU64,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest entry for `module`, or `None` if it has never been polled
    /// successfully.
    pub fn get(&self, module: ModuleName) -> Option<Arc<CacheEntry>> {
        self.entries.read().get(&module).cloned()
    }

    /// Store a fresh successful result for `module`, stamped now.
    ///
    /// The returned entry carries a generation strictly greater than every
    /// entry written before it.
    pub fn put(&self, module: ModuleName, value: Value) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry {
            module,
            value,
            timestamp: Utc::now(),
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        });
        self.insert_if_newer(Arc::clone(&entry));
        entry
    }

    /// Replace the stored entry only when `entry` is strictly newer.
    ///
    /// Returns `false` (and leaves the cache untouched) when an entry of the
    /// same or a later generation is already present.
    pub fn insert_if_newer(&self, entry: Arc<CacheEntry>) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&entry.module) {
            Some(current) if current.generation >= entry.generation => false,
            _ => {
                entries.insert(entry.module, entry);
                true
            }
        }
    }

    /// Every cached entry, ordered by module.
    pub fn get_all(&self) -> BTreeMap<ModuleName, Arc<CacheEntry>> {
        self.entries
            .read()
            .iter()
            .map(|(m, e)| (*m, Arc::clone(e)))
            .collect()
    }

    /// Composite snapshot `{module: {value, timestamp, generation}}`, as
    /// pushed to clients on connect and returned by `get_metrics`.
    pub fn snapshot(&self) -> Value {
        let map: Map<String, Value> = self
            .get_all()
            .into_iter()
            .map(|(m, e)| {
                let body = serde_json::json!({
                    "value": e.value,
                    "timestamp": e.timestamp,
                    "generation": e.generation,
                });
                (m.as_str().to_string(), body)
            })
            .collect();
        Value::Object(map)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
