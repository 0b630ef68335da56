//! [`ConnectionHub`] – live client connections and broadcast fan-out.
//!
//! Each accepted connection owns a bounded outbound queue drained by its
//! transport task. The hub only ever `try_send`s into these queues, so one
//! stalled client can never hold up delivery to the others: a full or
//! closed queue gets its connection dropped from the registry instead.
//!
//! ```text
//!  PollerScheduler ──► EventBus ──► pump ─┐
//!                                         ├─► broadcast(class) ─► [queue] ─► client
//!  handle_inbound ─► CommandRouter ─► notify ┘                   [queue] ─► client
//!                                 └─► reply ─► send_to(id) ─────► [queue] ─► client
//! ```

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hostlink_kernel::{MetricsCache, OriginPolicy};
use hostlink_types::{BroadcastClass, ConnectionId, Envelope, LinkError};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{EventBus, module_update};
use crate::router::CommandRouter;

/// Outbound queue depth per connection.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct ClientConnection {
    origin: Option<String>,
    peer: Option<SocketAddr>,
    subscriptions: BTreeSet<BroadcastClass>,
    tx: mpsc::Sender<String>,
    connected_at: DateTime<Utc>,
}

/// Handed to the transport after a successful [`ConnectionHub::accept`].
#[derive(Debug)]
pub struct Registration {
    pub id: ConnectionId,
    /// Serialized envelopes to write to the socket, in order.
    pub outbound: mpsc::Receiver<String>,
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Connections removed because their queue was full or closed.
    pub dropped: Vec<ConnectionId>,
}

pub struct ConnectionHub {
    connections: Mutex<HashMap<ConnectionId, ClientConnection>>,
    policy: Arc<OriginPolicy>,
    router: Arc<CommandRouter>,
    queue_capacity: usize,
}

impl ConnectionHub {
    pub fn new(policy: Arc<OriginPolicy>, router: Arc<CommandRouter>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            policy,
            router,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(2);
        self
    }

    pub fn policy(&self) -> &Arc<OriginPolicy> {
        &self.policy
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    fn cache(&self) -> &Arc<MetricsCache> {
        self.router.cache()
    }

    // ── Registration ────────────────────────────────────────────────────────

    /// Check the origin, register the connection and queue its handshake
    /// followed by the current cache snapshot.
    ///
    /// The snapshot is queued while the registry lock is held, so no
    /// broadcast can slip in ahead of it.
    ///
    /// # Errors
    ///
    /// [`LinkError::OriginRejected`] when the policy refuses the origin; no
    /// connection is created in that case.
    pub fn accept(&self, origin: Option<&str>, peer: Option<SocketAddr>) -> Result<Registration, LinkError> {
        if let Err(e) = self.policy.check(origin, peer.map(|p| p.ip())) {
            warn!(origin = ?origin, peer = ?peer, "connection refused: origin not allowed");
            return Err(e);
        }

        let id = Uuid::new_v4();
        let (tx, outbound) = mpsc::channel(self.queue_capacity);
        let handshake = Envelope::new(
            "handshake",
            json!({
                "server": "hostlink",
                "version": env!("CARGO_PKG_VERSION"),
                "connection_id": id,
                "modules": self.router.modules(),
            }),
        );

        let mut conns = self.connections.lock();
        let snapshot = Envelope::new("metrics", self.cache().snapshot());
        for env in [&handshake, &snapshot] {
            let text = encode(env).ok_or_else(|| LinkError::Channel("cannot encode greeting".into()))?;
            tx.try_send(text)
                .map_err(|_| LinkError::ConnectionLost(format!("{id} closed during handshake")))?;
        }
        conns.insert(
            id,
            ClientConnection {
                origin: origin.map(str::to_string),
                peer,
                subscriptions: BroadcastClass::ALL.into_iter().collect(),
                tx,
                connected_at: Utc::now(),
            },
        );
        info!(connection = %id, origin = ?origin, peer = ?peer, total = conns.len(), "client connected");
        Ok(Registration { id, outbound })
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.connections.lock().remove(&id);
        match removed {
            Some(conn) => {
                let secs = (Utc::now() - conn.connected_at).num_seconds();
                info!(connection = %id, origin = ?conn.origin, peer = ?conn.peer, secs, "client disconnected");
                true
            }
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }

    /// Replace the broadcast classes `id` receives.
    pub fn set_subscriptions(&self, id: ConnectionId, classes: BTreeSet<BroadcastClass>) -> bool {
        match self.connections.lock().get_mut(&id) {
            Some(conn) => {
                conn.subscriptions = classes;
                true
            }
            None => false,
        }
    }

    // ── Delivery ────────────────────────────────────────────────────────────

    /// Enqueue `envelope` for every connection subscribed to `class`.
    ///
    /// Connections whose queue rejects the message are removed; the rest
    /// are unaffected.
    pub fn broadcast(&self, class: BroadcastClass, envelope: &Envelope) -> BroadcastReport {
        let Some(text) = encode(envelope) else {
            return BroadcastReport::default();
        };

        let mut report = BroadcastReport::default();
        let mut conns = self.connections.lock();
        for (id, conn) in conns.iter() {
            if !conn.subscriptions.contains(&class) {
                continue;
            }
            match conn.tx.try_send(text.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    let reason = match e {
                        mpsc::error::TrySendError::Full(_) => "send queue full",
                        mpsc::error::TrySendError::Closed(_) => "connection closed",
                    };
                    warn!(connection = %id, cmd = %envelope.cmd, reason, "dropping client");
                    report.dropped.push(*id);
                }
            }
        }
        for id in &report.dropped {
            conns.remove(id);
        }
        report
    }

    /// Enqueue `envelope` for one connection.
    pub fn send_to(&self, id: ConnectionId, envelope: &Envelope) -> Result<(), LinkError> {
        let text = encode(envelope).ok_or_else(|| LinkError::Channel("cannot encode reply".into()))?;
        let mut conns = self.connections.lock();
        let conn = conns
            .get(&id)
            .ok_or_else(|| LinkError::ConnectionLost(id.to_string()))?;
        if conn.tx.try_send(text).is_err() {
            conns.remove(&id);
            warn!(connection = %id, cmd = %envelope.cmd, "dropping client: reply not deliverable");
            return Err(LinkError::ConnectionLost(id.to_string()));
        }
        Ok(())
    }

    /// Handle one text frame from `id`: parse, dispatch, reply, and fan out
    /// any control notification to every subscriber (the sender included).
    pub async fn handle_inbound(&self, id: ConnectionId, text: &str) {
        let request: Envelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                debug!(connection = %id, error = %e, "malformed frame");
                let err = LinkError::InvalidArgument(format!("invalid JSON: {e}"));
                let _ = self.send_to(id, &Envelope::error(None, &err));
                return;
            }
        };

        let cmd = request.cmd.clone();
        let dispatch = self.router.dispatch(request).await;
        if let Some(classes) = dispatch.subscribe {
            self.set_subscriptions(id, classes);
        }
        if let Err(e) = self.send_to(id, &dispatch.reply) {
            debug!(connection = %id, %cmd, error = %e, "reply dropped");
        }
        if let Some((class, env)) = dispatch.notify {
            let report = self.broadcast(class, &env);
            debug!(%cmd, delivered = report.delivered, dropped = report.dropped.len(), "notification sent");
        }
    }

    /// Forward every cache update on `bus` as a `module_update` broadcast
    /// until the bus closes.
    pub fn spawn_pump(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(entry) => {
                        hub.broadcast(entry.module.broadcast_class(), &module_update(&entry));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "update pump lagged; newer updates supersede the skipped ones");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("update pump stopped");
        })
    }
}

fn encode(envelope: &Envelope) -> Option<String> {
    match serde_json::to_string(envelope) {
        Ok(text) => Some(text),
        Err(e) => {
            error!(cmd = %envelope.cmd, error = %e, "cannot serialize envelope");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use hostlink_hal::{SharedProvider, SimProvider};
    use hostlink_kernel::{BlockingPool, ModuleRegistry, PathGuard};
    use hostlink_types::ModuleName;
    use serde_json::Value;

    use crate::router::RouterContext;

    const LOCAL: &str = "http://localhost:3000";

    fn hub_with(cache: Arc<MetricsCache>) -> Arc<ConnectionHub> {
        Arc::new(build(cache, DEFAULT_QUEUE_CAPACITY))
    }

    fn build(cache: Arc<MetricsCache>, queue_capacity: usize) -> ConnectionHub {
        let provider: SharedProvider = Arc::new(SimProvider::new());
        let ctx = RouterContext::new(
            provider,
            cache,
            Arc::new(ModuleRegistry::default()),
            BlockingPool::new(2, Duration::from_secs(2)),
            Arc::new(PathGuard::new()),
        );
        let router = Arc::new(CommandRouter::new(ctx, &ModuleName::ALL));
        ConnectionHub::new(Arc::new(OriginPolicy::default()), router).with_queue_capacity(queue_capacity)
    }

    fn hub() -> Arc<ConnectionHub> {
        hub_with(Arc::new(MetricsCache::new()))
    }

    fn next(reg: &mut Registration) -> Envelope {
        let text = reg.outbound.try_recv().expect("queued message");
        serde_json::from_str(&text).expect("valid envelope")
    }

    fn drain(reg: &mut Registration) {
        while reg.outbound.try_recv().is_ok() {}
    }

    #[test]
    fn accept_queues_handshake_then_snapshot() {
        let cache = Arc::new(MetricsCache::new());
        cache.put(ModuleName::Cpu, json!({"percent": 9.0}));
        let hub = hub_with(cache);

        let mut reg = hub.accept(Some(LOCAL), None).unwrap();
        let hello = next(&mut reg);
        assert_eq!(hello.cmd, "handshake");
        assert_eq!(hello.val["connection_id"], reg.id.to_string());
        let snap = next(&mut reg);
        assert_eq!(snap.cmd, "metrics");
        assert_eq!(snap.val["cpu"]["value"]["percent"], 9.0);
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn refused_origin_creates_no_connection() {
        let hub = hub();
        let err = hub.accept(Some("https://evil.example"), None).unwrap_err();
        assert_eq!(err.kind(), "origin_rejected");
        assert_eq!(hub.connection_count(), 0);

        let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 40000);
        assert!(hub.accept(None, Some(remote)).is_err());
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000);
        assert!(hub.accept(None, Some(local)).is_ok());
    }

    #[test]
    fn dead_receiver_is_removed_others_still_served() {
        let hub = hub();
        let mut a = hub.accept(Some(LOCAL), None).unwrap();
        let b = hub.accept(Some(LOCAL), None).unwrap();
        let mut c = hub.accept(Some(LOCAL), None).unwrap();
        let dead = b.id;
        drop(b);
        drain(&mut a);
        drain(&mut c);

        let env = Envelope::new("module_update", json!({"module": "cpu"}));
        let report = hub.broadcast(BroadcastClass::Metrics, &env);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, vec![dead]);
        assert_eq!(hub.connection_count(), 2);
        assert_eq!(next(&mut a), env);
        assert_eq!(next(&mut c), env);
    }

    #[test]
    fn full_queue_drops_only_that_client() {
        let hub = build(Arc::new(MetricsCache::new()), 2);
        let slow = hub.accept(Some(LOCAL), None).unwrap();
        let mut fast = hub.accept(Some(LOCAL), None).unwrap();
        drain(&mut fast);

        let env = Envelope::new("module_update", Value::Null);
        let report = hub.broadcast(BroadcastClass::Metrics, &env);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, vec![slow.id]);
        assert!(hub.is_connected(fast.id));
    }

    #[test]
    fn subscriptions_filter_broadcasts() {
        let hub = hub();
        let mut reg = hub.accept(Some(LOCAL), None).unwrap();
        drain(&mut reg);
        hub.set_subscriptions(reg.id, BTreeSet::from([BroadcastClass::Controls]));

        let report = hub.broadcast(BroadcastClass::Metrics, &Envelope::new("module_update", Value::Null));
        assert_eq!(report.delivered, 0);
        assert!(reg.outbound.try_recv().is_err());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let hub = hub();
        let reg = hub.accept(Some(LOCAL), None).unwrap();
        assert!(hub.disconnect(reg.id));
        assert!(!hub.disconnect(reg.id));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn volume_set_reaches_every_client() {
        let hub = hub();
        let mut sender = hub.accept(Some(LOCAL), None).unwrap();
        let mut other = hub.accept(Some(LOCAL), None).unwrap();
        drain(&mut sender);
        drain(&mut other);

        hub.handle_inbound(sender.id, r#"{"cmd":"volume_set","val":50}"#).await;

        let update = Envelope::new("volume_update", json!({"percent": 50}));
        assert_eq!(next(&mut sender).cmd, "volume_set_response");
        assert_eq!(next(&mut sender), update);
        assert_eq!(next(&mut other), update);
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_and_keeps_connection() {
        let hub = hub();
        let mut reg = hub.accept(Some(LOCAL), None).unwrap();
        drain(&mut reg);

        hub.handle_inbound(reg.id, "{not json").await;
        let reply = next(&mut reg);
        assert!(reply.is_error());
        assert_eq!(reply.val["kind"], "invalid_argument");
        assert!(hub.is_connected(reg.id));

        hub.handle_inbound(reg.id, r#"{"cmd":"ping"}"#).await;
        assert_eq!(next(&mut reg).cmd, "pong");
    }

    #[tokio::test]
    async fn pump_forwards_cache_updates() -> Result<(), Box<dyn std::error::Error>> {
        let cache = Arc::new(MetricsCache::new());
        let hub = hub_with(Arc::clone(&cache));
        let bus = EventBus::default();
        let pump = hub.spawn_pump(&bus);
        let mut reg = hub.accept(Some(LOCAL), None)?;
        drain(&mut reg);

        bus.publish(cache.put(ModuleName::Memory, json!({"percent": 40.0})))?;
        let text = tokio::time::timeout(Duration::from_secs(1), reg.outbound.recv())
            .await?
            .ok_or("queue closed")?;
        let env: Envelope = serde_json::from_str(&text)?;
        assert_eq!(env.cmd, "module_update");
        assert_eq!(env.val["module"], "memory");

        drop(bus);
        tokio::time::timeout(Duration::from_secs(1), pump).await??;
        Ok(())
    }
}
