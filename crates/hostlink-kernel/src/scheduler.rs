//! [`PollerScheduler`] – one independent timer task per polled module.
//!
//! Each tick runs the module's provider read on the [`BlockingPool`] under
//! the pool timeout, then:
//!
//! | Outcome | Effect |
//! |---|---|
//! | success | [`PollHook`]s run, [`MetricsCache::put`], success recorded, entry handed to the [`UpdateSink`] |
//! | failure / timeout | error recorded on the [`ModuleRegistry`]; cache untouched |
//! | previous call still running | tick skipped and counted |
//!
//! Polls of one module never overlap: the task awaits its own poll before
//! taking the next tick, and an in-flight flag owned by the blocking call
//! keeps an abandoned (timed-out) call from being doubled up. A poll that
//! overruns its interval resets the timer instead of firing a catch-up tick.
//!
//! The first poll of each module happens one interval after [`start`], so
//! a module is absent from the cache until its own cadence first elapses.
//!
//! [`start`]: PollerScheduler::start

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hostlink_hal::{Action, SharedProvider};
use hostlink_types::{CacheEntry, LinkError, ModuleName};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::cache::MetricsCache;
use crate::executor::BlockingPool;
use crate::modules::ModuleRegistry;

// ────────────────────────────────────────────────────────────────────────────
// Seams
// ────────────────────────────────────────────────────────────────────────────

/// Receives every fresh cache entry. Implemented by the middleware event bus.
pub trait UpdateSink: Send + Sync {
    fn publish_update(&self, entry: Arc<CacheEntry>);
}

/// Post-processing applied to a successful poll before it is cached.
///
/// Hooks own the module's auxiliary state (mount list, device tables) and
/// may rewrite the value that gets cached and broadcast.
pub trait PollHook: Send + Sync {
    fn on_success(&self, module: ModuleName, value: &mut Value);
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduler
// ────────────────────────────────────────────────────────────────────────────

struct PollContext {
    provider: SharedProvider,
    cache: Arc<MetricsCache>,
    registry: Arc<ModuleRegistry>,
    pool: BlockingPool,
    sink: Arc<dyn UpdateSink>,
}

/// Clears the in-flight flag when the provider call is finished or dropped.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct PollerScheduler {
    ctx: Arc<PollContext>,
    jobs: Vec<(ModuleName, Duration)>,
    hooks: HashMap<ModuleName, Vec<Arc<dyn PollHook>>>,
}

impl PollerScheduler {
    pub fn new(
        provider: SharedProvider,
        cache: Arc<MetricsCache>,
        registry: Arc<ModuleRegistry>,
        pool: BlockingPool,
        sink: Arc<dyn UpdateSink>,
    ) -> Self {
        Self {
            ctx: Arc::new(PollContext { provider, cache, registry, pool, sink }),
            jobs: Vec::new(),
            hooks: HashMap::new(),
        }
    }

    /// Poll `module` every `interval` (builder-style). The module is
    /// registered with the [`ModuleRegistry`] if it is not already.
    pub fn with_module(mut self, module: ModuleName, interval: Duration) -> Self {
        if !self.ctx.registry.is_registered(module) {
            self.ctx.registry.register(module, Some(interval));
        }
        self.jobs.retain(|(m, _)| *m != module);
        self.jobs.push((module, interval));
        self
    }

    /// Attach a hook to `module` (builder-style). Hooks run in insertion
    /// order.
    pub fn with_hook(mut self, module: ModuleName, hook: Arc<dyn PollHook>) -> Self {
        self.hooks.entry(module).or_default().push(hook);
        self
    }

    pub fn modules(&self) -> Vec<ModuleName> {
        self.jobs.iter().map(|(m, _)| *m).collect()
    }

    /// Spawn one task per module and return the handle that stops them.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown, _) = broadcast::channel(1);
        let tasks = self
            .jobs
            .iter()
            .map(|&(module, period)| {
                let ctx = Arc::clone(&self.ctx);
                let hooks = self.hooks.get(&module).cloned().unwrap_or_default();
                let rx = shutdown.subscribe();
                tokio::spawn(run_module(ctx, module, period, hooks, rx))
            })
            .collect();
        info!(modules = self.jobs.len(), "poller scheduler started");
        SchedulerHandle { shutdown, tasks }
    }
}

/// Stops the poller tasks.
pub struct SchedulerHandle {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal every task and wait for it to finish its current poll.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            let _ = task.await;
        }
        info!("poller scheduler stopped");
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

async fn run_module(
    ctx: Arc<PollContext>,
    module: ModuleName,
    period: Duration,
    hooks: Vec<Arc<dyn PollHook>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(%module, period_ms = period.as_millis() as u64, "poller started");

    loop {
        tokio::select! {
            scheduled = ticker.tick() => {
                ctx.poll_once(module, &hooks, &in_flight).await;
                if Instant::now() >= scheduled + period {
                    // Overran: drop the missed tick rather than firing it late.
                    ticker.reset();
                    ctx.registry.record_skip(module);
                    debug!(%module, "poll overran its interval; next tick skipped");
                }
            }
            _ = shutdown.recv() => {
                debug!(%module, "poller stopping");
                break;
            }
        }
    }
}

impl PollContext {
    async fn poll_once(&self, module: ModuleName, hooks: &[Arc<dyn PollHook>], in_flight: &Arc<AtomicBool>) {
        if in_flight.swap(true, Ordering::SeqCst) {
            self.registry.record_skip(module);
            debug!(%module, "previous poll still running; tick skipped");
            return;
        }
        let guard = InFlight(Arc::clone(in_flight));
        let provider = Arc::clone(&self.provider);

        let result = self
            .pool
            .run(module, move || {
                let _guard = guard;
                provider.invoke(module, Action::Read, &Value::Null)
            })
            .await;

        match result {
            Ok(mut value) => {
                for hook in hooks {
                    hook.on_success(module, &mut value);
                }
                let entry = self.cache.put(module, value);
                self.registry.record_success(module, entry.timestamp);
                self.sink.publish_update(entry);
            }
            Err(err) => {
                if matches!(err, LinkError::Unavailable { .. }) {
                    debug!(%module, error = %err, "module unavailable");
                } else {
                    warn!(%module, error = %err, "poll failed");
                }
                self.registry.record_failure(module, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_hal::{SimOutcome, SimProvider};
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::sleep;

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<Arc<CacheEntry>>>);

    impl UpdateSink for CollectingSink {
        fn publish_update(&self, entry: Arc<CacheEntry>) {
            self.0.lock().push(entry);
        }
    }

    struct Fixture {
        sim: Arc<SimProvider>,
        cache: Arc<MetricsCache>,
        registry: Arc<ModuleRegistry>,
        sink: Arc<CollectingSink>,
    }

    impl Fixture {
        fn new(sim: SimProvider) -> Self {
            Self {
                sim: Arc::new(sim),
                cache: Arc::new(MetricsCache::new()),
                registry: Arc::new(ModuleRegistry::new(3)),
                sink: Arc::new(CollectingSink::default()),
            }
        }

        fn scheduler(&self, timeout: Duration) -> PollerScheduler {
            PollerScheduler::new(
                self.sim.clone(),
                Arc::clone(&self.cache),
                Arc::clone(&self.registry),
                BlockingPool::new(4, timeout),
                self.sink.clone(),
            )
        }
    }

    #[tokio::test]
    async fn modules_appear_on_their_own_cadence() {
        let fx = Fixture::new(SimProvider::new());
        let handle = fx
            .scheduler(Duration::from_secs(1))
            .with_module(ModuleName::Cpu, Duration::from_millis(200))
            .with_module(ModuleName::Bluetooth, Duration::from_millis(1000))
            .start();

        assert!(fx.cache.get(ModuleName::Cpu).is_none());
        sleep(Duration::from_millis(300)).await;
        assert!(fx.cache.get(ModuleName::Cpu).is_some());
        assert!(fx.cache.get(ModuleName::Bluetooth).is_none());

        sleep(Duration::from_millis(1000)).await;
        assert!(fx.cache.get(ModuleName::Cpu).is_some());
        assert!(fx.cache.get(ModuleName::Bluetooth).is_some());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failures_leave_cache_entry_unchanged() {
        let sim = SimProvider::new().with_outcome(ModuleName::Cpu, SimOutcome::Fail("sensor gone".into()));
        sim.push_outcome(ModuleName::Cpu, SimOutcome::Value(json!({"percent": 1})));
        let fx = Fixture::new(sim);
        let handle = fx
            .scheduler(Duration::from_secs(1))
            .with_module(ModuleName::Cpu, Duration::from_millis(40))
            .start();

        sleep(Duration::from_millis(70)).await;
        let before = fx.cache.get(ModuleName::Cpu).expect("first poll succeeded");
        sleep(Duration::from_millis(300)).await;
        let after = fx.cache.get(ModuleName::Cpu).unwrap();
        handle.shutdown().await;

        assert_eq!(*before, *after);
        let record = fx.registry.record(ModuleName::Cpu).unwrap();
        assert!(record.failures >= 3);
        assert!(record.stale);
        assert_eq!(record.last_error.unwrap().kind(), "provider_failure");
        assert_eq!(fx.sink.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn polls_of_one_module_never_overlap() {
        let sim = SimProvider::new().with_delay(ModuleName::Disk, Duration::from_millis(120));
        let fx = Fixture::new(sim);
        let handle = fx
            .scheduler(Duration::from_secs(2))
            .with_module(ModuleName::Disk, Duration::from_millis(30))
            .start();

        sleep(Duration::from_millis(700)).await;
        handle.shutdown().await;

        assert!(fx.sim.calls(ModuleName::Disk) >= 2);
        assert_eq!(fx.sim.peak_concurrency(ModuleName::Disk), 1);
        assert!(fx.registry.record(ModuleName::Disk).unwrap().skipped > 0);
    }

    #[tokio::test]
    async fn timed_out_poll_is_abandoned_and_not_doubled() {
        let sim = SimProvider::new().with_delay(ModuleName::Wifi, Duration::from_millis(400));
        let fx = Fixture::new(sim);
        let handle = fx
            .scheduler(Duration::from_millis(50))
            .with_module(ModuleName::Wifi, Duration::from_millis(100))
            .start();

        sleep(Duration::from_millis(450)).await;
        handle.shutdown().await;

        assert!(fx.cache.get(ModuleName::Wifi).is_none());
        let record = fx.registry.record(ModuleName::Wifi).unwrap();
        assert_eq!(record.last_error.unwrap().kind(), "provider_timeout");
        assert!(record.skipped > 0);
        assert_eq!(fx.sim.peak_concurrency(ModuleName::Wifi), 1);
    }

    #[tokio::test]
    async fn one_faulty_module_does_not_stop_others() {
        let sim = SimProvider::new().with_outcome(ModuleName::Battery, SimOutcome::Panic);
        let fx = Fixture::new(sim);
        let handle = fx
            .scheduler(Duration::from_secs(1))
            .with_module(ModuleName::Battery, Duration::from_millis(30))
            .with_module(ModuleName::Memory, Duration::from_millis(30))
            .start();

        sleep(Duration::from_millis(200)).await;
        handle.shutdown().await;

        assert!(fx.cache.get(ModuleName::Battery).is_none());
        assert!(fx.cache.get(ModuleName::Memory).is_some());
        assert!(fx.sim.calls(ModuleName::Battery) >= 2);
    }

    struct Tag;

    impl PollHook for Tag {
        fn on_success(&self, _module: ModuleName, value: &mut Value) {
            value["tagged"] = json!(true);
        }
    }

    #[tokio::test]
    async fn hooks_rewrite_value_before_caching() {
        let fx = Fixture::new(SimProvider::new());
        let handle = fx
            .scheduler(Duration::from_secs(1))
            .with_module(ModuleName::Volume, Duration::from_millis(30))
            .with_hook(ModuleName::Volume, Arc::new(Tag))
            .start();

        sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert_eq!(fx.cache.get(ModuleName::Volume).unwrap().value["tagged"], true);
        assert!(fx.sink.0.lock().iter().all(|e| e.value["tagged"] == true));
    }

    #[tokio::test]
    async fn auto_mounted_stick_becomes_browsable() {
        use crate::path_guard::{PathGuard, VolumeRefreshHook};
        use hostlink_hal::AutoMount;

        let stick = tempfile::tempdir().unwrap();
        let root = stick.path().display().to_string();
        let sim = Arc::new(SimProvider::new().with_unmounted("/dev/sdf1", stick.path()));
        let fx = Fixture::new(SimProvider::new());
        let guard = Arc::new(PathGuard::new());
        assert!(guard.validate(&root).is_err());

        let handle = PollerScheduler::new(
            Arc::new(AutoMount::new(sim)),
            Arc::clone(&fx.cache),
            Arc::clone(&fx.registry),
            BlockingPool::new(2, Duration::from_secs(1)),
            fx.sink.clone(),
        )
        .with_module(ModuleName::Usb, Duration::from_millis(40))
        .with_hook(ModuleName::Usb, Arc::new(VolumeRefreshHook::new(Arc::clone(&guard))))
        .start();

        sleep(Duration::from_millis(120)).await;
        handle.shutdown().await;

        let entry = fx.cache.get(ModuleName::Usb).expect("usb polled");
        assert_eq!(entry.value["drives"][0]["device_node"], "/dev/sdf1");
        assert!(guard.validate(&root).is_ok());
    }

    #[tokio::test]
    async fn shutdown_stops_polling() {
        let fx = Fixture::new(SimProvider::new());
        let handle = fx
            .scheduler(Duration::from_secs(1))
            .with_module(ModuleName::Network, Duration::from_millis(20))
            .start();
        assert_eq!(handle.task_count(), 1);
        sleep(Duration::from_millis(80)).await;
        handle.shutdown().await;
        let calls = fx.sim.calls(ModuleName::Network);
        sleep(Duration::from_millis(80)).await;
        assert_eq!(fx.sim.calls(ModuleName::Network), calls);
    }
}
