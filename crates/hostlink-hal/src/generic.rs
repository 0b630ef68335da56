//! Portable metrics through `sysinfo`.
//!
//! [`SystemProbe`] owns the long-lived `sysinfo` handles (CPU usage is a
//! delta between two refreshes, so the same `System` must be reused across
//! polls). [`GenericProvider`] exposes it as a [`CapabilityProvider`] on
//! hosts without a dedicated implementation.

use std::path::Path;

use hostlink_types::{LinkError, ModuleName};
use parking_lot::Mutex;
use serde_json::{Value, json};
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};

use crate::fsops;
use crate::provider::{Action, CapabilityProvider, unsupported};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Shared `sysinfo` state for the portable modules.
pub struct SystemProbe {
    system: Mutex<System>,
    networks: Mutex<Networks>,
    disks: Mutex<Disks>,
}

impl Default for SystemProbe {
    fn default() -> Self {
        let refresh = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        Self {
            system: Mutex::new(System::new_with_specifics(refresh)),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }
}

impl SystemProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu(&self) -> Value {
        let mut sys = self.system.lock();
        sys.refresh_cpu_usage();
        let per_core: Vec<f64> = sys
            .cpus()
            .iter()
            .map(|c| round1(f64::from(c.cpu_usage())))
            .collect();
        let frequency = sys.cpus().first().map(|c| c.frequency());
        json!({
            "percent": round1(f64::from(sys.global_cpu_usage())),
            "per_core": per_core,
            "cores": per_core.len(),
            "frequency_mhz": frequency,
        })
    }

    pub fn memory(&self) -> Value {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        let total = sys.total_memory();
        let used = sys.used_memory();
        json!({
            "total": total,
            "used": used,
            "available": sys.available_memory(),
            "percent": percent(used, total),
            "swap_total": sys.total_swap(),
            "swap_used": sys.used_swap(),
        })
    }

    /// Usage of the volume mounted at `/` (or the first disk reported).
    pub fn disk(&self) -> Value {
        let mut disks = self.disks.lock();
        disks.refresh(true);
        let root = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .or_else(|| disks.list().first());
        match root {
            Some(d) => {
                let total = d.total_space();
                let used = total.saturating_sub(d.available_space());
                json!({
                    "mount_point": d.mount_point().display().to_string(),
                    "total": total,
                    "used": used,
                    "free": d.available_space(),
                    "percent": percent(used, total),
                })
            }
            None => json!({ "total": 0, "used": 0, "free": 0, "percent": 0.0 }),
        }
    }

    /// Cumulative byte counters summed over every interface.
    pub fn network(&self) -> Value {
        let mut networks = self.networks.lock();
        networks.refresh(true);
        let (mut sent, mut recv, mut psent, mut precv) = (0u64, 0u64, 0u64, 0u64);
        for data in networks.values() {
            sent += data.total_transmitted();
            recv += data.total_received();
            psent += data.total_packets_transmitted();
            precv += data.total_packets_received();
        }
        json!({
            "bytes_sent": sent,
            "bytes_recv": recv,
            "packets_sent": psent,
            "packets_recv": precv,
            "interfaces": networks.len(),
        })
    }

    pub fn system_info(&self, platform: &str) -> Value {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        json!({
            "platform": platform,
            "os": System::long_os_version(),
            "kernel": System::kernel_version(),
            "hostname": System::host_name(),
            "architecture": std::env::consts::ARCH,
            "cpu_threads": sys.cpus().len(),
            "memory_total_gb": round1(sys.total_memory() as f64 / GIB),
            "uptime_secs": System::uptime(),
        })
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round1(part as f64 * 100.0 / total as f64)
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ────────────────────────────────────────────────────────────────────────────
// GenericProvider
// ────────────────────────────────────────────────────────────────────────────

/// Provider for hosts without platform-specific control tooling.
///
/// Reads system, cpu, memory, disk and network; serves file operations; and
/// reports every other module as [`LinkError::Unavailable`].
#[derive(Default)]
pub struct GenericProvider {
    probe: SystemProbe,
}

impl GenericProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CapabilityProvider for GenericProvider {
    fn platform(&self) -> &str {
        std::env::consts::OS
    }

    fn invoke(&self, module: ModuleName, action: Action, args: &Value) -> Result<Value, LinkError> {
        match (module, action) {
            (ModuleName::System, Action::Read) => Ok(self.probe.system_info(self.platform())),
            (ModuleName::Cpu, Action::Read) => Ok(self.probe.cpu()),
            (ModuleName::Memory, Action::Read) => Ok(self.probe.memory()),
            (ModuleName::Disk, Action::Read) => Ok(self.probe.disk()),
            (ModuleName::Network, Action::Read) => Ok(self.probe.network()),
            (ModuleName::Fs, a) if a.is_filesystem() => fsops::dispatch(a, args),
            (ModuleName::Cpu | ModuleName::Memory | ModuleName::Disk | ModuleName::Network, a) => {
                Err(unsupported(module, a))
            }
            _ => Err(LinkError::unavailable(
                module,
                format!("not supported on {}", self.platform()),
            )),
        }
    }
}
