//! Event queue between the poller scheduler and the connection hub.
//!
//! Uses [`tokio::sync::broadcast`] so a slow consumer never blocks the
//! pollers: a lagging receiver loses the oldest updates (they are superseded
//! by newer ones anyway) and is told how many it missed.

use std::sync::Arc;

use hostlink_kernel::UpdateSink;
use hostlink_types::{CacheEntry, Envelope, LinkError};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity (number of buffered updates before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 256;

/// Shared update bus. Clone it cheaply; all clones share one channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<CacheEntry>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a fresh cache entry.
    ///
    /// Returns the number of receivers handed the entry, or
    /// [`LinkError::Channel`] when nobody is listening.
    pub fn publish(&self, entry: Arc<CacheEntry>) -> Result<usize, LinkError> {
        self.sender
            .send(entry)
            .map_err(|e| LinkError::Channel(format!("no subscribers for {}", e.0.module)))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CacheEntry>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl UpdateSink for EventBus {
    fn publish_update(&self, entry: Arc<CacheEntry>) {
        if let Err(e) = self.publish(entry) {
            trace!(error = %e, "update dropped");
        }
    }
}

/// The `module_update` broadcast for a cache entry.
pub fn module_update(entry: &CacheEntry) -> Envelope {
    Envelope::new(
        "module_update",
        json!({
            "module": entry.module,
            "value": entry.value,
            "timestamp": entry.timestamp,
            "generation": entry.generation,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hostlink_types::ModuleName;

    fn entry(module: ModuleName, generation: u64) -> Arc<CacheEntry> {
        Arc::new(CacheEntry {
            module,
            value: json!({"percent": 5}),
            timestamp: Utc::now(),
            generation,
        })
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.publish(entry(ModuleName::Cpu, 1))?, 2);
        assert_eq!(a.recv().await?.generation, 1);
        assert_eq!(b.recv().await?.module, ModuleName::Cpu);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_a_channel_error() {
        let bus = EventBus::new(4);
        let err = bus.publish(entry(ModuleName::Disk, 1)).unwrap_err();
        assert_eq!(err.kind(), "channel");
        bus.publish_update(entry(ModuleName::Disk, 2));
    }

    #[test]
    fn module_update_envelope_shape() {
        let env = module_update(&entry(ModuleName::Battery, 7));
        assert_eq!(env.cmd, "module_update");
        assert_eq!(env.val["module"], "battery");
        assert_eq!(env.val["value"]["percent"], 5);
        assert_eq!(env.val["generation"], 7);
    }
}
