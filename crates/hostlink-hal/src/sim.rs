//! In-process simulated provider for tests and `provider = "sim"` demo mode.
//!
//! [`SimProvider`] answers every module with plausible data and lets a test
//! script per-module behaviour: fixed values, failures, unavailability,
//! panics, artificial latency, and a queue of one-shot outcomes consumed in
//! order before falling back to the steady-state behaviour. It also counts
//! calls and records the peak number of concurrent invocations per module.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use hostlink_hal::{Action, CapabilityProvider, SimOutcome, SimProvider};
//! use hostlink_types::ModuleName;
//! use serde_json::{json, Value};
//!
//! let sim = SimProvider::new()
//!     .with_outcome(ModuleName::Cpu, SimOutcome::Value(json!({"percent": 3.0})))
//!     .with_delay(ModuleName::Wifi, Duration::from_millis(10));
//!
//! let v = sim.invoke(ModuleName::Cpu, Action::Read, &Value::Null).unwrap();
//! assert_eq!(v["percent"], 3.0);
//! assert_eq!(sim.calls(ModuleName::Cpu), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use hostlink_types::{LinkError, ModuleName};
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::fsops;
use crate::provider::{Action, CapabilityProvider, percent_arg, unsupported};

/// One scripted result.
#[derive(Debug, Clone, PartialEq)]
pub enum SimOutcome {
    Value(Value),
    Fail(String),
    Unavailable(String),
    /// Panic inside the provider call.
    Panic,
}

#[derive(Default)]
struct Script {
    delay: Duration,
    queue: VecDeque<SimOutcome>,
    steady: Option<SimOutcome>,
}

struct Controls {
    brightness: u8,
    volume: u8,
    muted: bool,
}

#[derive(Default)]
struct Counters {
    calls: HashMap<ModuleName, u64>,
    active: HashMap<ModuleName, usize>,
    peak: HashMap<ModuleName, usize>,
}

pub struct SimProvider {
    scripts: Mutex<HashMap<ModuleName, Script>>,
    controls: Mutex<Controls>,
    mounts: Mutex<Vec<(String, String)>>,
    unmounted: Mutex<Vec<(String, String)>>,
    counters: Mutex<Counters>,
}

impl Default for SimProvider {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            controls: Mutex::new(Controls { brightness: 80, volume: 35, muted: false }),
            mounts: Mutex::new(Vec::new()),
            unmounted: Mutex::new(Vec::new()),
            counters: Mutex::new(Counters::default()),
        }
    }
}

impl SimProvider {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Builder-style scripting ─────────────────────────────────────────────

    /// Steady-state outcome for `module` (builder-style).
    pub fn with_outcome(self, module: ModuleName, outcome: SimOutcome) -> Self {
        self.set_outcome(module, outcome);
        self
    }

    /// Artificial latency before every call on `module` (builder-style).
    pub fn with_delay(self, module: ModuleName, delay: Duration) -> Self {
        self.set_delay(module, delay);
        self
    }

    /// Report `mount_point` as a mounted USB volume backed by `device`.
    pub fn with_mount(self, device: impl Into<String>, mount_point: impl AsRef<Path>) -> Self {
        self.add_mount(device, mount_point);
        self
    }

    /// Report `device` as an unmounted removable partition that mounts at
    /// `mount_point` on [`Action::Mount`].
    pub fn with_unmounted(self, device: impl Into<String>, mount_point: impl AsRef<Path>) -> Self {
        self.unmounted
            .lock()
            .push((device.into(), mount_point.as_ref().display().to_string()));
        self
    }

    // ── Runtime scripting ───────────────────────────────────────────────────

    pub fn set_outcome(&self, module: ModuleName, outcome: SimOutcome) {
        self.scripts.lock().entry(module).or_default().steady = Some(outcome);
    }

    /// Queue a one-shot outcome, consumed before the steady-state one.
    pub fn push_outcome(&self, module: ModuleName, outcome: SimOutcome) {
        self.scripts.lock().entry(module).or_default().queue.push_back(outcome);
    }

    pub fn set_delay(&self, module: ModuleName, delay: Duration) {
        self.scripts.lock().entry(module).or_default().delay = delay;
    }

    pub fn add_mount(&self, device: impl Into<String>, mount_point: impl AsRef<Path>) {
        self.mounts
            .lock()
            .push((device.into(), mount_point.as_ref().display().to_string()));
    }

    pub fn remove_mount(&self, device: &str) {
        self.mounts.lock().retain(|(d, _)| d != device);
    }

    // ── Introspection ───────────────────────────────────────────────────────

    /// Number of `invoke` calls made for `module`.
    pub fn calls(&self, module: ModuleName) -> u64 {
        self.counters.lock().calls.get(&module).copied().unwrap_or(0)
    }

    /// Highest number of simultaneous `invoke` calls observed for `module`.
    pub fn peak_concurrency(&self, module: ModuleName) -> usize {
        self.counters.lock().peak.get(&module).copied().unwrap_or(0)
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn enter(&self, module: ModuleName) -> ActiveGuard<'_> {
        let mut c = self.counters.lock();
        *c.calls.entry(module).or_default() += 1;
        let active = c.active.entry(module).or_default();
        *active += 1;
        let now = *active;
        let peak = c.peak.entry(module).or_default();
        *peak = (*peak).max(now);
        ActiveGuard { sim: self, module }
    }

    /// Returns the delay and the scripted outcome, if any.
    fn next_scripted(&self, module: ModuleName) -> (Duration, Option<SimOutcome>) {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(&module) {
            Some(s) => (s.delay, s.queue.pop_front().or_else(|| s.steady.clone())),
            None => (Duration::ZERO, None),
        }
    }

    fn default_read(&self, module: ModuleName) -> Result<Value, LinkError> {
        let now = Utc::now().to_rfc3339();
        let value = match module {
            ModuleName::System => json!({
                "platform": self.platform(),
                "hostname": "sim-host",
                "architecture": std::env::consts::ARCH,
                "cpu_threads": 8,
                "memory_total_gb": 16.0,
            }),
            ModuleName::Cpu => json!({ "percent": 12.5, "per_core": [10.0, 15.0], "cores": 2 }),
            ModuleName::Memory => json!({ "total": 16u64 << 30, "used": 6u64 << 30, "percent": 37.5 }),
            ModuleName::Disk => json!({ "total": 512u64 << 30, "used": 200u64 << 30, "percent": 39.1 }),
            ModuleName::Network => json!({ "bytes_sent": 1024, "bytes_recv": 4096 }),
            ModuleName::Battery => json!({ "percent": 87.0, "plugged": true, "status": "Charging" }),
            ModuleName::Wifi => json!({
                "connected": true,
                "ssid": "sim-net",
                "signal_strength": 72,
                "networks": [{
                    "identifier": "sim-net", "display_name": "sim-net",
                    "signal_strength": 72, "last_seen": now,
                }],
            }),
            ModuleName::Bluetooth => json!({ "count": 0, "devices": [] }),
            ModuleName::Brightness => json!({ "percent": self.controls.lock().brightness }),
            ModuleName::Volume => {
                let c = self.controls.lock();
                json!({ "percent": c.volume, "muted": c.muted })
            }
            ModuleName::Usb => self.drives(),
            ModuleName::Fs => return Err(unsupported(module, Action::Read)),
        };
        Ok(value)
    }

    fn drives(&self) -> Value {
        let drives: Vec<Value> = self
            .mounts
            .lock()
            .iter()
            .map(|(device, mp)| {
                let name = Path::new(mp)
                    .file_name()
                    .map_or_else(|| "root".to_string(), |n| n.to_string_lossy().into_owned());
                json!({
                    "device_node": device,
                    "name": name,
                    "model": "Sim Flash",
                    "size_gb": 16.0,
                    "mount_points": [{
                        "device": device,
                        "mount_point": mp,
                        "mount_name": name,
                        "filesystem": "vfat",
                        "label": null,
                    }],
                })
            })
            .collect();
        json!({ "drives": drives })
    }

    fn control(&self, module: ModuleName, action: Action, args: &Value) -> Result<Value, LinkError> {
        match (module, action) {
            (_, Action::Read) => self.default_read(module),
            (ModuleName::Brightness, Action::Set) => {
                let pct = percent_arg(module, args, 1)?;
                self.controls.lock().brightness = pct;
                Ok(json!({ "percent": pct }))
            }
            (ModuleName::Volume, Action::Set) => {
                let pct = percent_arg(module, args, 0)?;
                self.controls.lock().volume = pct;
                Ok(json!({ "percent": pct }))
            }
            (ModuleName::Volume, Action::ToggleMute) => {
                let mut c = self.controls.lock();
                c.muted = !c.muted;
                Ok(json!({ "percent": c.volume, "muted": c.muted }))
            }
            (ModuleName::Usb, Action::ListUnmounted) => {
                let devices: Vec<Value> = self
                    .unmounted
                    .lock()
                    .iter()
                    .map(|(device, _)| json!({ "device": device, "label": null, "filesystem": "vfat" }))
                    .collect();
                Ok(json!({ "count": devices.len(), "devices": devices }))
            }
            (ModuleName::Usb, Action::Mount) => {
                let device = device_arg(args)?;
                let mut unmounted = self.unmounted.lock();
                let Some(pos) = unmounted.iter().position(|(d, _)| *d == device) else {
                    return Err(LinkError::InvalidArgument(format!("{device} is not a removable partition")));
                };
                let (device, mount_point) = unmounted.remove(pos);
                self.mounts.lock().push((device.clone(), mount_point.clone()));
                Ok(json!({ "device": device, "mounted": true, "mount_point": mount_point }))
            }
            (ModuleName::Usb, Action::Unmount) => {
                let device = device_arg(args)?;
                self.remove_mount(&device);
                Ok(json!({ "device": device, "removed": true }))
            }
            (ModuleName::Fs, a) if a.is_filesystem() => fsops::dispatch(a, args),
            (m, a) => Err(unsupported(m, a)),
        }
    }
}

fn device_arg(args: &Value) -> Result<String, LinkError> {
    args.as_str()
        .or_else(|| args.get("device").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| LinkError::InvalidArgument("expected a 'device' path".into()))
}

struct ActiveGuard<'a> {
    sim: &'a SimProvider,
    module: ModuleName,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut c = self.sim.counters.lock();
        if let Some(active) = c.active.get_mut(&self.module) {
            *active = active.saturating_sub(1);
        }
    }
}

impl CapabilityProvider for SimProvider {
    fn platform(&self) -> &str {
        "sim"
    }

    fn invoke(&self, module: ModuleName, action: Action, args: &Value) -> Result<Value, LinkError> {
        let _active = self.enter(module);
        let (delay, scripted) = self.next_scripted(module);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        match scripted {
            Some(SimOutcome::Value(v)) if action == Action::Read => Ok(v),
            Some(SimOutcome::Fail(msg)) => Err(LinkError::failure(module, msg)),
            Some(SimOutcome::Unavailable(msg)) => Err(LinkError::unavailable(module, msg)),
            Some(SimOutcome::Panic) => panic!("simulated provider panic in {module}"),
            _ => self.control(module, action, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn queued_outcomes_run_before_steady_state() {
        let sim = SimProvider::new().with_outcome(ModuleName::Cpu, SimOutcome::Value(json!(1)));
        sim.push_outcome(ModuleName::Cpu, SimOutcome::Fail("boom".into()));

        assert!(sim.invoke(ModuleName::Cpu, Action::Read, &Value::Null).is_err());
        assert_eq!(sim.invoke(ModuleName::Cpu, Action::Read, &Value::Null).unwrap(), json!(1));
        assert_eq!(sim.calls(ModuleName::Cpu), 2);
    }

    #[test]
    fn volume_set_and_mute_update_state() {
        let sim = SimProvider::new();
        let v = sim.invoke(ModuleName::Volume, Action::Set, &json!(50)).unwrap();
        assert_eq!(v, json!({ "percent": 50 }));
        let v = sim.invoke(ModuleName::Volume, Action::ToggleMute, &Value::Null).unwrap();
        assert_eq!(v["muted"], true);
        let v = sim.invoke(ModuleName::Volume, Action::Read, &Value::Null).unwrap();
        assert_eq!(v["percent"], 50);
    }

    #[test]
    fn mounts_show_up_as_drives() {
        let sim = SimProvider::new().with_mount("/dev/sdz1", "/media/STICK");
        let v = sim.invoke(ModuleName::Usb, Action::Read, &Value::Null).unwrap();
        assert_eq!(v["drives"][0]["mount_points"][0]["mount_point"], "/media/STICK");
        sim.invoke(ModuleName::Usb, Action::Unmount, &json!({"device": "/dev/sdz1"})).unwrap();
        let v = sim.invoke(ModuleName::Usb, Action::Read, &Value::Null).unwrap();
        assert!(v["drives"].as_array().unwrap().is_empty());
    }

    #[test]
    fn wifi_networks_read_back_as_device_records() {
        let sim = SimProvider::new();
        let v = sim.invoke(ModuleName::Wifi, Action::Read, &Value::Null).unwrap();
        let records: Vec<hostlink_types::DeviceRecord> = serde_json::from_value(v["networks"].clone()).unwrap();
        assert_eq!(records[0].identifier, "sim-net");
        assert_eq!(records[0].signal_strength, Some(72));
    }

    #[test]
    fn mounting_moves_a_partition_into_drives() {
        let sim = SimProvider::new().with_unmounted("/dev/sdy1", "/media/NEW");
        let listed = sim.invoke(ModuleName::Usb, Action::ListUnmounted, &Value::Null).unwrap();
        assert_eq!(listed["devices"][0]["device"], "/dev/sdy1");

        let v = sim.invoke(ModuleName::Usb, Action::Mount, &json!("/dev/sdy1")).unwrap();
        assert_eq!(v["mount_point"], "/media/NEW");
        let listed = sim.invoke(ModuleName::Usb, Action::ListUnmounted, &Value::Null).unwrap();
        assert_eq!(listed["count"], 0);
        let v = sim.invoke(ModuleName::Usb, Action::Read, &Value::Null).unwrap();
        assert_eq!(v["drives"][0]["device_node"], "/dev/sdy1");

        let err = sim.invoke(ModuleName::Usb, Action::Mount, &json!("/dev/sdy1")).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn peak_concurrency_is_tracked() {
        let sim = Arc::new(SimProvider::new().with_delay(ModuleName::Disk, Duration::from_millis(100)));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let sim = Arc::clone(&sim);
                thread::spawn(move || sim.invoke(ModuleName::Disk, Action::Read, &Value::Null))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(sim.peak_concurrency(ModuleName::Disk), 3);
    }
}
