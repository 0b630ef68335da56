//! `hostlink-kernel` – the orchestration core.
//!
//! It owns all shared runtime state and never talks to the OS directly;
//! every system call goes through a [`CapabilityProvider`][hostlink_hal::CapabilityProvider]
//! on the bounded [`BlockingPool`].
//!
//! # Modules
//!
//! - [`cache`] – [`MetricsCache`]: latest successful value per module,
//!   lock-briefly reads of immutable `Arc<CacheEntry>` snapshots.
//! - [`modules`] – [`ModuleRegistry`]: per-module interval, last error,
//!   failure streak and the derived stale flag.
//! - [`executor`] – [`BlockingPool`]: semaphore-bounded `spawn_blocking`
//!   with a per-call timeout.
//! - [`scheduler`] – [`PollerScheduler`]: one timer task per module, no
//!   overlapping polls, failures isolated per module.
//! - [`path_guard`] – [`PathGuard`]: canonicalises client paths and admits
//!   only descendants of mounted removable volumes.
//! - [`devices`] – [`DeviceTable`]: bounded, time-evicted Bluetooth/WiFi
//!   sightings.
//! - [`origin`] – [`OriginPolicy`]: static, loopback and remote origin
//!   allow-list.

pub mod cache;
pub mod devices;
pub mod executor;
pub mod modules;
pub mod origin;
pub mod path_guard;
pub mod scheduler;

pub use cache::MetricsCache;
pub use devices::{DeviceScanHook, DeviceTable};
pub use executor::BlockingPool;
pub use modules::{ModuleRecord, ModuleRegistry};
pub use origin::OriginPolicy;
pub use path_guard::{PathGuard, ValidatedPath, VolumeRefreshHook};
pub use scheduler::{PollHook, PollerScheduler, SchedulerHandle, UpdateSink};
