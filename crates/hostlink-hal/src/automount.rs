//! [`AutoMount`] – mounts freshly inserted removable partitions.
//!
//! Wraps another provider. Every USB read first asks the inner provider for
//! unmounted partitions and mounts each one, so a stick that was just
//! plugged in shows up in `drives` with a mount root the Path Guard will
//! accept. Every other call is forwarded untouched.

use hostlink_types::{LinkError, ModuleName};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::provider::{Action, CapabilityProvider, SharedProvider};

pub struct AutoMount {
    inner: SharedProvider,
}

impl AutoMount {
    pub fn new(inner: SharedProvider) -> Self {
        Self { inner }
    }

    /// Mount every partition the inner provider lists as unmounted.
    /// Returns the device nodes that were mounted; failures are logged and
    /// retried on the next scan.
    pub fn mount_pending(&self) -> Vec<String> {
        let listing = match self.inner.invoke(ModuleName::Usb, Action::ListUnmounted, &Value::Null) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "cannot list unmounted partitions");
                return Vec::new();
            }
        };
        let devices: Vec<String> = listing
            .get("devices")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|d| d.get("device").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut mounted = Vec::new();
        for device in devices {
            match self.inner.invoke(ModuleName::Usb, Action::Mount, &json!({ "device": device })) {
                Ok(v) => {
                    info!(%device, mount_point = %v["mount_point"], "auto-mounted removable partition");
                    mounted.push(device);
                }
                Err(e) => debug!(%device, error = %e, "auto-mount failed"),
            }
        }
        mounted
    }
}

impl CapabilityProvider for AutoMount {
    fn platform(&self) -> &str {
        self.inner.platform()
    }

    fn invoke(&self, module: ModuleName, action: Action, args: &Value) -> Result<Value, LinkError> {
        if module == ModuleName::Usb && action == Action::Read {
            self.mount_pending();
        }
        self.inner.invoke(module, action, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::sim::{SimOutcome, SimProvider};

    #[test]
    fn usb_read_mounts_pending_partitions_first() {
        let sim = Arc::new(SimProvider::new().with_unmounted("/dev/sdc1", "/media/FRESH"));
        let provider = AutoMount::new(sim.clone());

        let v = provider.invoke(ModuleName::Usb, Action::Read, &Value::Null).unwrap();
        let drives = v["drives"].as_array().unwrap();
        assert_eq!(drives.len(), 1);
        assert_eq!(drives[0]["mount_points"][0]["mount_point"], "/media/FRESH");

        let pending = sim.invoke(ModuleName::Usb, Action::ListUnmounted, &Value::Null).unwrap();
        assert_eq!(pending["count"], 0);
    }

    #[test]
    fn nothing_pending_mounts_nothing() {
        let provider = AutoMount::new(Arc::new(SimProvider::new().with_mount("/dev/sdd1", "/media/OLD")));
        assert!(provider.mount_pending().is_empty());
        let v = provider.invoke(ModuleName::Usb, Action::Read, &Value::Null).unwrap();
        assert_eq!(v["drives"][0]["device_node"], "/dev/sdd1");
    }

    #[test]
    fn other_calls_are_forwarded_untouched() {
        let sim = Arc::new(
            SimProvider::new()
                .with_unmounted("/dev/sde1", "/media/WAIT")
                .with_outcome(ModuleName::Cpu, SimOutcome::Fail("gone".into())),
        );
        let provider = AutoMount::new(sim.clone());

        assert!(provider.invoke(ModuleName::Cpu, Action::Read, &Value::Null).is_err());
        let listed = provider.invoke(ModuleName::Usb, Action::ListUnmounted, &Value::Null).unwrap();
        assert_eq!(listed["count"], 1);
        assert_eq!(provider.platform(), "sim");
    }
}
