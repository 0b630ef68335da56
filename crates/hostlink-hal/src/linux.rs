//! [`LinuxProvider`] – desktop Linux implementation of every module.
//!
//! | Module | Source |
//! |---|---|
//! | system, cpu, memory, disk, network | `sysinfo` via [`SystemProbe`] |
//! | battery | `/sys/class/power_supply/*` |
//! | brightness | `brightnessctl -m` / `brightnessctl set N%` |
//! | volume | `amixer get/set Master` |
//! | wifi | `nmcli -t device wifi list` |
//! | bluetooth | `bluetoothctl show` + a short `scan on` |
//! | usb | `lsblk -J` for enumeration, `udisksctl` for mount/unmount |
//! | fs | [`crate::fsops`] |
//!
//! Parsing is kept in free functions so it can be tested against captured
//! command output without the tools being installed.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use hostlink_types::{DeviceRecord, LinkError, ModuleName};
use serde_json::{Value, json};
use tracing::debug;

use crate::command::{DEFAULT_COMMAND_TIMEOUT, run_command};
use crate::fsops;
use crate::generic::SystemProbe;
use crate::provider::{Action, CapabilityProvider, percent_arg, unsupported};

/// Mount and unmount may wait on slow media.
pub const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(30);

/// WiFi scans report at most this many networks.
pub const MAX_WIFI_NETWORKS: usize = 20;

const BLUETOOTH_SCAN_SECS: &str = "2";
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

pub struct LinuxProvider {
    probe: SystemProbe,
    command_timeout: Duration,
    mount_timeout: Duration,
    power_supply_root: PathBuf,
}

impl Default for LinuxProvider {
    fn default() -> Self {
        Self {
            probe: SystemProbe::new(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            mount_timeout: DEFAULT_MOUNT_TIMEOUT,
            power_supply_root: PathBuf::from("/sys/class/power_supply"),
        }
    }
}

impl LinuxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-command timeout (builder-style).
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Override the mount/unmount timeout (builder-style).
    pub fn with_mount_timeout(mut self, timeout: Duration) -> Self {
        self.mount_timeout = timeout;
        self
    }

    /// Read batteries from a different sysfs root. Used by tests.
    pub fn with_power_supply_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.power_supply_root = root.into();
        self
    }

    fn run(&self, module: ModuleName, program: &str, args: &[&str]) -> Result<String, LinkError> {
        let out = run_command(module, program, args, self.command_timeout)?;
        Ok(out.into_success(module, program)?.stdout)
    }

    // ── Battery ─────────────────────────────────────────────────────────────

    fn battery(&self) -> Result<Value, LinkError> {
        read_battery(&self.power_supply_root)
    }

    // ── Controls ────────────────────────────────────────────────────────────

    fn brightness(&self, action: Action, args: &Value) -> Result<Value, LinkError> {
        let m = ModuleName::Brightness;
        match action {
            Action::Read => parse_brightnessctl(&self.run(m, "brightnessctl", &["-m"])?),
            Action::Set => {
                let pct = percent_arg(m, args, 1)?;
                self.run(m, "brightnessctl", &["set", &format!("{pct}%")])?;
                Ok(json!({ "percent": pct }))
            }
            other => Err(unsupported(m, other)),
        }
    }

    fn volume(&self, action: Action, args: &Value) -> Result<Value, LinkError> {
        let m = ModuleName::Volume;
        match action {
            Action::Read => parse_amixer(&self.run(m, "amixer", &["get", "Master"])?),
            Action::Set => {
                let pct = percent_arg(m, args, 0)?;
                self.run(m, "amixer", &["set", "Master", &format!("{pct}%")])?;
                Ok(json!({ "percent": pct }))
            }
            Action::ToggleMute => parse_amixer(&self.run(m, "amixer", &["set", "Master", "toggle"])?),
            other => Err(unsupported(m, other)),
        }
    }

    // ── Radios ──────────────────────────────────────────────────────────────

    fn wifi(&self) -> Result<Value, LinkError> {
        let out = self.run(
            ModuleName::Wifi,
            "nmcli",
            &["-t", "-f", "IN-USE,SSID,SIGNAL,FREQ", "device", "wifi", "list"],
        )?;
        Ok(parse_nmcli_wifi(&out))
    }

    fn bluetooth_available(&self) -> bool {
        self.run(ModuleName::Bluetooth, "bluetoothctl", &["show"])
            .map(|out| out.contains("Controller"))
            .unwrap_or(false)
    }

    fn bluetooth(&self) -> Result<Value, LinkError> {
        if !self.bluetooth_available() {
            return Err(LinkError::unavailable(ModuleName::Bluetooth, "no bluetooth controller"));
        }
        // `--timeout` makes bluetoothctl exit on its own; its exit status is
        // not meaningful, so only the captured output is used.
        let out = run_command(
            ModuleName::Bluetooth,
            "bluetoothctl",
            &["--timeout", BLUETOOTH_SCAN_SECS, "scan", "on"],
            self.command_timeout,
        )?;
        let devices = parse_bluetooth_scan(&out.stdout);
        Ok(json!({ "count": devices.len(), "devices": devices }))
    }

    // ── USB ─────────────────────────────────────────────────────────────────

    fn usb_disks(&self) -> Result<Vec<UsbDisk>, LinkError> {
        let out = self.run(
            ModuleName::Usb,
            "lsblk",
            &["-J", "-b", "-o", "NAME,PATH,LABEL,MODEL,FSTYPE,MOUNTPOINT,TRAN,SIZE,RM"],
        )?;
        parse_lsblk(&out).map_err(|e| LinkError::failure(ModuleName::Usb, e))
    }

    fn usb(&self, action: Action, args: &Value) -> Result<Value, LinkError> {
        let m = ModuleName::Usb;
        match action {
            Action::Read => Ok(drives_value(&self.usb_disks()?)),
            Action::ListUnmounted => Ok(unmounted_value(&self.usb_disks()?)),
            Action::Mount => {
                let device = self.removable_partition(args)?;
                let out = run_command(m, "udisksctl", &["mount", "-b", &device], self.mount_timeout)?
                    .into_success(m, "udisksctl")?;
                Ok(json!({
                    "device": device,
                    "mounted": true,
                    "mount_point": parse_udisks_mount_point(&out.stdout),
                }))
            }
            Action::Unmount => {
                let device = self.removable_partition(args)?;
                run_command(m, "udisksctl", &["unmount", "-b", &device], self.mount_timeout)?
                    .into_success(m, "udisksctl")?;
                Ok(json!({ "device": device, "removed": true }))
            }
            other => Err(unsupported(m, other)),
        }
    }

    /// Resolve `args` to a device node and require it to belong to a
    /// removable disk, so arbitrary block devices cannot be (un)mounted.
    fn removable_partition(&self, args: &Value) -> Result<String, LinkError> {
        let device = args
            .as_str()
            .or_else(|| args.get("device").and_then(Value::as_str))
            .ok_or_else(|| LinkError::InvalidArgument("expected a 'device' path".into()))?
            .to_string();
        let known = self
            .usb_disks()?
            .iter()
            .flat_map(|d| d.partitions.iter())
            .any(|p| p.device == device);
        if known {
            Ok(device)
        } else {
            Err(LinkError::InvalidArgument(format!("{device} is not a removable partition")))
        }
    }
}

impl CapabilityProvider for LinuxProvider {
    fn platform(&self) -> &str {
        "linux"
    }

    fn invoke(&self, module: ModuleName, action: Action, args: &Value) -> Result<Value, LinkError> {
        match (module, action) {
            (ModuleName::System, Action::Read) => {
                let mut info = self.probe.system_info(self.platform());
                info["bluetooth_available"] = Value::Bool(self.bluetooth_available());
                Ok(info)
            }
            (ModuleName::Cpu, Action::Read) => Ok(self.probe.cpu()),
            (ModuleName::Memory, Action::Read) => Ok(self.probe.memory()),
            (ModuleName::Disk, Action::Read) => Ok(self.probe.disk()),
            (ModuleName::Network, Action::Read) => Ok(self.probe.network()),
            (ModuleName::Battery, Action::Read) => self.battery(),
            (ModuleName::Wifi, Action::Read) => self.wifi(),
            (ModuleName::Bluetooth, Action::Read) => self.bluetooth(),
            (ModuleName::Brightness, a) => self.brightness(a, args),
            (ModuleName::Volume, a) => self.volume(a, args),
            (ModuleName::Usb, a) => self.usb(a, args),
            (ModuleName::Fs, a) if a.is_filesystem() => fsops::dispatch(a, args),
            (m, a) => Err(unsupported(m, a)),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Parsers
// ────────────────────────────────────────────────────────────────────────────

/// Read the first `type == Battery` supply below `root`.
pub fn read_battery(root: &Path) -> Result<Value, LinkError> {
    let m = ModuleName::Battery;
    let entries = fs::read_dir(root).map_err(|_| LinkError::unavailable(m, "no power supply class"))?;
    for entry in entries.filter_map(Result::ok) {
        let dir = entry.path();
        let kind = fs::read_to_string(dir.join("type")).unwrap_or_default();
        if kind.trim() != "Battery" {
            continue;
        }
        let capacity = fs::read_to_string(dir.join("capacity"))
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .ok_or_else(|| LinkError::failure(m, format!("unreadable capacity in {}", dir.display())))?;
        let status = fs::read_to_string(dir.join("status")).unwrap_or_default().trim().to_string();
        return Ok(json!({
            "percent": capacity,
            "plugged": status != "Discharging",
            "status": status,
        }));
    }
    Err(LinkError::unavailable(m, "no battery present"))
}

/// `brightnessctl -m` → `device,class,current,percent%,max`.
pub fn parse_brightnessctl(out: &str) -> Result<Value, LinkError> {
    let m = ModuleName::Brightness;
    let line = out.lines().next().unwrap_or_default();
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() < 5 {
        return Err(LinkError::failure(m, format!("unexpected brightnessctl output: {line}")));
    }
    let percent = fields[3]
        .trim_end_matches('%')
        .parse::<u8>()
        .map_err(|_| LinkError::failure(m, format!("bad percentage: {}", fields[3])))?;
    Ok(json!({
        "percent": percent,
        "current": fields[2].parse::<u64>().ok(),
        "max": fields[4].parse::<u64>().ok(),
        "device": fields[0],
    }))
}

/// Pull `[NN%]` and `[on]/[off]` out of `amixer get|set Master` output.
pub fn parse_amixer(out: &str) -> Result<Value, LinkError> {
    let percent = out
        .split('[')
        .filter_map(|chunk| chunk.split_once("%]").map(|(n, _)| n))
        .find_map(|n| n.parse::<u8>().ok())
        .ok_or_else(|| LinkError::failure(ModuleName::Volume, "no volume level in amixer output"))?;
    Ok(json!({ "percent": percent, "muted": out.contains("[off]") }))
}

/// Split one `nmcli -t` line on unescaped `:` and unescape `\:` / `\\`.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let (Some(next), Some(last)) = (chars.next(), fields.last_mut()) {
                    last.push(next);
                }
            }
            ':' => fields.push(String::new()),
            _ => {
                if let Some(last) = fields.last_mut() {
                    last.push(c);
                }
            }
        }
    }
    fields
}

/// Parse `nmcli -t -f IN-USE,SSID,SIGNAL,FREQ device wifi list`.
///
/// Networks are de-duplicated by SSID (strongest wins), sorted by signal
/// and truncated to [`MAX_WIFI_NETWORKS`].
pub fn parse_nmcli_wifi(out: &str) -> Value {
    let now = Utc::now();
    let mut connected: Option<(String, i32)> = None;
    let mut best: HashMap<String, i32> = HashMap::new();

    for line in out.lines().filter(|l| !l.trim().is_empty()) {
        let fields = split_terse(line);
        if fields.len() < 3 {
            continue;
        }
        let ssid = fields[1].trim();
        if ssid.is_empty() {
            continue;
        }
        let signal = fields[2].trim().parse::<i32>().unwrap_or(0);
        if fields[0].trim() == "*" {
            connected = Some((ssid.to_string(), signal));
        }
        let slot = best.entry(ssid.to_string()).or_insert(signal);
        *slot = (*slot).max(signal);
    }

    let mut networks: Vec<DeviceRecord> = best
        .into_iter()
        .map(|(ssid, signal)| DeviceRecord {
            identifier: ssid.clone(),
            display_name: ssid,
            signal_strength: Some(signal),
            last_seen: now,
        })
        .collect();
    networks.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength).then_with(|| a.identifier.cmp(&b.identifier)));
    networks.truncate(MAX_WIFI_NETWORKS);

    let (ssid, signal) = connected.clone().unwrap_or_default();
    json!({
        "connected": connected.is_some(),
        "ssid": ssid,
        "signal_strength": signal,
        "networks": networks,
    })
}

/// Parse `[NEW] Device <addr> <name>` and `[CHG] Device <addr> RSSI: …`
/// lines from a `bluetoothctl scan on` transcript.
pub fn parse_bluetooth_scan(out: &str) -> Vec<DeviceRecord> {
    let now = Utc::now();
    let mut devices: HashMap<String, DeviceRecord> = HashMap::new();

    for line in out.lines() {
        let Some(rest) = line.split_once("Device ").map(|(_, r)| r) else {
            continue;
        };
        let Some((address, tail)) = rest.split_once(' ') else {
            continue;
        };
        let record = devices.entry(address.to_string()).or_insert_with(|| DeviceRecord {
            identifier: address.to_string(),
            display_name: "Unknown".to_string(),
            signal_strength: None,
            last_seen: now,
        });
        if let Some(rssi) = tail.strip_prefix("RSSI: ") {
            record.signal_strength = parse_rssi(rssi);
        } else if line.contains("[NEW]") && !tail.contains(": ") {
            record.display_name = tail.trim().to_string();
        }
    }

    let mut list: Vec<DeviceRecord> = devices.into_values().collect();
    list.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));
    list
}

/// Accepts `-60` as well as the newer `0xffffffc4 (-60)` form.
fn parse_rssi(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if let Some((_, inner)) = raw.split_once('(') {
        return inner.trim_end_matches(')').parse().ok();
    }
    raw.parse().ok()
}

/// The `udisksctl mount` reply is `Mounted /dev/sdb1 at /run/media/u/X`.
pub fn parse_udisks_mount_point(out: &str) -> Option<String> {
    out.lines()
        .find_map(|l| l.split_once(" at ").map(|(_, p)| p.trim().trim_end_matches('.').to_string()))
}

/// A removable disk as reported by `lsblk`.
#[derive(Debug, Clone, PartialEq)]
pub struct UsbDisk {
    pub device_node: String,
    pub model: String,
    pub size_bytes: u64,
    pub partitions: Vec<UsbPartition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsbPartition {
    pub device: String,
    pub label: Option<String>,
    pub fstype: Option<String>,
    pub mount_point: Option<String>,
    pub size_bytes: u64,
}

fn flag(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => s == "1" || s == "true",
        Value::Number(n) => n.as_u64() == Some(1),
        _ => false,
    }
}

fn number(v: &Value) -> u64 {
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

fn text(v: &Value) -> Option<String> {
    v.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

fn partition_from(dev: &Value) -> UsbPartition {
    UsbPartition {
        device: text(&dev["path"]).unwrap_or_else(|| format!("/dev/{}", dev["name"].as_str().unwrap_or_default())),
        label: text(&dev["label"]),
        fstype: text(&dev["fstype"]),
        mount_point: text(&dev["mountpoint"]),
        size_bytes: number(&dev["size"]),
    }
}

/// Parse `lsblk -J -b -o NAME,PATH,LABEL,MODEL,FSTYPE,MOUNTPOINT,TRAN,SIZE,RM`,
/// keeping only disks on the USB transport or flagged removable.
pub fn parse_lsblk(out: &str) -> Result<Vec<UsbDisk>, String> {
    let root: Value = serde_json::from_str(out).map_err(|e| format!("invalid lsblk JSON: {e}"))?;
    let devices = root["blockdevices"].as_array().cloned().unwrap_or_default();

    let disks = devices
        .iter()
        .filter(|d| d["tran"].as_str() == Some("usb") || flag(&d["rm"]))
        .map(|d| {
            let partitions = match d["children"].as_array() {
                Some(children) if !children.is_empty() => children.iter().map(partition_from).collect(),
                _ => vec![partition_from(d)],
            };
            let base = partition_from(d);
            UsbDisk {
                device_node: base.device,
                model: text(&d["model"]).unwrap_or_else(|| "Unknown".to_string()),
                size_bytes: base.size_bytes,
                partitions,
            }
        })
        .collect();
    Ok(disks)
}

fn mount_name(mount_point: &str) -> String {
    Path::new(mount_point)
        .file_name()
        .map_or_else(|| "root".to_string(), |n| n.to_string_lossy().into_owned())
}

/// `{"drives": [...]}` listing every removable disk with a mounted partition.
pub fn drives_value(disks: &[UsbDisk]) -> Value {
    let drives: Vec<Value> = disks
        .iter()
        .filter_map(|disk| {
            let mounts: Vec<Value> = disk
                .partitions
                .iter()
                .filter_map(|p| {
                    let mp = p.mount_point.as_deref()?;
                    Some(json!({
                        "device": p.device,
                        "mount_point": mp,
                        "mount_name": mount_name(mp),
                        "filesystem": p.fstype.as_deref().unwrap_or("unknown"),
                        "label": p.label,
                    }))
                })
                .collect();
            if mounts.is_empty() {
                return None;
            }
            let name = disk
                .partitions
                .iter()
                .find_map(|p| p.label.clone())
                .unwrap_or_else(|| mounts[0]["mount_name"].as_str().unwrap_or_default().to_string());
            Some(json!({
                "device_node": disk.device_node,
                "name": name,
                "model": disk.model,
                "size_gb": (disk.size_bytes as f64 / GIB * 100.0).round() / 100.0,
                "mount_points": mounts,
            }))
        })
        .collect();
    debug!(count = drives.len(), "usb drives enumerated");
    json!({ "drives": drives })
}

/// `{"devices": [...]}` listing removable partitions that carry a filesystem
/// but are not mounted.
pub fn unmounted_value(disks: &[UsbDisk]) -> Value {
    let devices: Vec<Value> = disks
        .iter()
        .flat_map(|disk| disk.partitions.iter().map(move |p| (disk, p)))
        .filter(|(_, p)| p.mount_point.is_none() && p.fstype.is_some())
        .map(|(disk, p)| {
            json!({
                "device": p.device,
                "label": p.label,
                "filesystem": p.fstype,
                "model": disk.model,
                "size_gb": (p.size_bytes as f64 / GIB * 100.0).round() / 100.0,
            })
        })
        .collect();
    json!({ "count": devices.len(), "devices": devices })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const LSBLK: &str = r#"{
      "blockdevices": [
        {"name":"nvme0n1","path":"/dev/nvme0n1","label":null,"model":"Samsung SSD","fstype":null,"mountpoint":null,"tran":"nvme","size":512110190592,"rm":false,
         "children":[{"name":"nvme0n1p1","path":"/dev/nvme0n1p1","label":null,"model":null,"fstype":"ext4","mountpoint":"/","tran":null,"size":512000000000,"rm":false}]},
        {"name":"sdb","path":"/dev/sdb","label":null,"model":"Cruzer Blade","fstype":null,"mountpoint":null,"tran":"usb","size":"16008609792","rm":"1",
         "children":[
           {"name":"sdb1","path":"/dev/sdb1","label":"KEYS","model":null,"fstype":"vfat","mountpoint":"/run/media/me/KEYS","tran":null,"size":8000000000,"rm":"1"},
           {"name":"sdb2","path":"/dev/sdb2","label":null,"model":null,"fstype":"exfat","mountpoint":null,"tran":null,"size":8000000000,"rm":"1"}
         ]}
      ]
    }"#;

    #[test]
    fn lsblk_keeps_only_removable_disks() {
        let disks = parse_lsblk(LSBLK).unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].device_node, "/dev/sdb");
        assert_eq!(disks[0].partitions.len(), 2);
        assert_eq!(disks[0].size_bytes, 16_008_609_792);
    }

    #[test]
    fn drives_and_unmounted_views() {
        let disks = parse_lsblk(LSBLK).unwrap();
        let drives = drives_value(&disks);
        let mp = &drives["drives"][0]["mount_points"][0];
        assert_eq!(mp["mount_point"], "/run/media/me/KEYS");
        assert_eq!(mp["mount_name"], "KEYS");
        assert_eq!(mp["filesystem"], "vfat");
        assert_eq!(drives["drives"][0]["name"], "KEYS");

        let unmounted = unmounted_value(&disks);
        assert_eq!(unmounted["count"], 1);
        assert_eq!(unmounted["devices"][0]["device"], "/dev/sdb2");
    }

    #[test]
    fn amixer_levels_and_mute() {
        let out = "Simple mixer control 'Master',0\n  Front Left: Playback 42 [65%] [-12.00dB] [off]\n";
        let v = parse_amixer(out).unwrap();
        assert_eq!(v["percent"], 65);
        assert_eq!(v["muted"], true);
        assert!(parse_amixer("nothing useful").is_err());
    }

    #[test]
    fn brightnessctl_machine_output() {
        let v = parse_brightnessctl("intel_backlight,backlight,400,42%,960\n").unwrap();
        assert_eq!(v["percent"], 42);
        assert_eq!(v["max"], 960);
        assert!(parse_brightnessctl("garbage").is_err());
    }

    #[test]
    fn nmcli_dedupes_sorts_and_unescapes() {
        let out = "*:Home\\:Net:70:2437 MHz\n :Cafe:40:2412 MHz\n :Cafe:55:5180 MHz\n ::90:2412 MHz\n";
        let v = parse_nmcli_wifi(out);
        assert_eq!(v["connected"], true);
        assert_eq!(v["ssid"], "Home:Net");
        let nets = v["networks"].as_array().unwrap();
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0]["identifier"], "Home:Net");
        assert_eq!(nets[1]["signal_strength"], 55);
    }

    #[test]
    fn bluetooth_scan_transcript() {
        let out = "Discovery started\n\
                   [CHG] Controller 00:11:22:33:44:55 Discovering: yes\n\
                   [NEW] Device AA:BB:CC:DD:EE:01 Headphones\n\
                   [NEW] Device AA:BB:CC:DD:EE:02 AA-BB-CC-DD-EE-02\n\
                   [CHG] Device AA:BB:CC:DD:EE:01 RSSI: 0xffffffc4 (-60)\n\
                   [CHG] Device AA:BB:CC:DD:EE:02 RSSI: -80\n";
        let devices = parse_bluetooth_scan(out);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].display_name, "Headphones");
        assert_eq!(devices[0].signal_strength, Some(-60));
        assert_eq!(devices[1].signal_strength, Some(-80));
    }

    #[test]
    fn udisks_mount_point() {
        assert_eq!(
            parse_udisks_mount_point("Mounted /dev/sdb1 at /run/media/me/KEYS\n").as_deref(),
            Some("/run/media/me/KEYS")
        );
    }

    #[test]
    fn battery_from_sysfs() {
        let root = tempdir().unwrap();
        let ac = root.path().join("AC");
        fs::create_dir(&ac).unwrap();
        fs::write(ac.join("type"), "Mains\n").unwrap();
        let bat = root.path().join("BAT0");
        fs::create_dir(&bat).unwrap();
        fs::write(bat.join("type"), "Battery\n").unwrap();
        fs::write(bat.join("capacity"), "81\n").unwrap();
        fs::write(bat.join("status"), "Discharging\n").unwrap();

        let provider = LinuxProvider::new().with_power_supply_root(root.path());
        let v = provider.invoke(ModuleName::Battery, Action::Read, &Value::Null).unwrap();
        assert_eq!(v["percent"], 81.0);
        assert_eq!(v["plugged"], false);
    }

    #[test]
    fn missing_battery_is_unavailable() {
        let root = tempdir().unwrap();
        let err = read_battery(root.path()).unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }
}
