//! `hostlink-hal` – the Capability Provider layer.
//!
//! Everything that touches the operating system lives here, behind the
//! [`CapabilityProvider`] trait. The orchestration core never branches on
//! platform: it receives a [`SharedProvider`] chosen once by
//! [`platform::detect`].
//!
//! | Provider | Hosts | Coverage |
//! |---|---|---|
//! | [`LinuxProvider`] | Linux | every module (sysfs, `brightnessctl`, `amixer`, `nmcli`, `bluetoothctl`, `lsblk`, `udisksctl`) |
//! | [`GenericProvider`] | anything `sysinfo` supports | system, cpu, memory, disk, network, fs |
//! | [`SimProvider`] | tests and demo mode | every module, scripted |
//!
//! [`AutoMount`] wraps any of them to mount new removable partitions
//! before each USB scan.

pub mod automount;
pub mod command;
pub mod fsops;
pub mod generic;
pub mod linux;
pub mod platform;
pub mod provider;
pub mod sim;

pub use automount::AutoMount;
pub use generic::GenericProvider;
pub use linux::LinuxProvider;
pub use provider::{Action, CapabilityProvider, SharedProvider};
pub use sim::{SimOutcome, SimProvider};
