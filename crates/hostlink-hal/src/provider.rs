//! The [`CapabilityProvider`] contract.
//!
//! A provider answers `invoke(module, action, args)` with either a JSON value
//! or a [`LinkError`]. Calls are synchronous and may block for seconds; the
//! kernel always runs them on a bounded worker pool under a timeout.

use std::fmt;
use std::sync::Arc;

use hostlink_types::{LinkError, ModuleName};
use serde_json::Value;

/// What the caller wants a module to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Produce the module's current state. Used by every poll.
    Read,
    /// Apply a numeric setting (brightness or volume percent).
    Set,
    /// Flip the output mute state.
    ToggleMute,
    /// Mount a removable block device.
    Mount,
    /// Unmount (and power off where supported) a removable device.
    Unmount,
    /// List removable partitions that are not mounted.
    ListUnmounted,
    ListDir,
    ReadFile,
    WriteFile,
    MakeDir,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Set => "set",
            Action::ToggleMute => "toggle_mute",
            Action::Mount => "mount",
            Action::Unmount => "unmount",
            Action::ListUnmounted => "list_unmounted",
            Action::ListDir => "list_dir",
            Action::ReadFile => "read_file",
            Action::WriteFile => "write_file",
            Action::MakeDir => "make_dir",
            Action::Delete => "delete",
        }
    }

    /// `true` for actions that operate on a client-supplied path.
    pub fn is_filesystem(self) -> bool {
        matches!(
            self,
            Action::ListDir | Action::ReadFile | Action::WriteFile | Action::MakeDir | Action::Delete
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-platform implementation of every module's read and control actions.
///
/// Implementations must be `Send + Sync`: a single instance is shared by all
/// poller tasks and command handlers.
pub trait CapabilityProvider: Send + Sync {
    /// Short platform tag reported in `system_info` (e.g. `"linux"`).
    fn platform(&self) -> &str;

    /// Perform `action` on `module`.
    ///
    /// `args` is `null` for reads and carries the command's `val` otherwise.
    ///
    /// # Errors
    ///
    /// * [`LinkError::Unavailable`] when the module does not apply to this
    ///   host or the action is not supported.
    /// * [`LinkError::ProviderFailure`] when the underlying command or file
    ///   operation fails.
    fn invoke(&self, module: ModuleName, action: Action, args: &Value) -> Result<Value, LinkError>;
}

pub type SharedProvider = Arc<dyn CapabilityProvider>;

/// Standard error for a `(module, action)` pair a provider does not handle.
pub fn unsupported(module: ModuleName, action: Action) -> LinkError {
    LinkError::unavailable(module, format!("action '{action}' is not supported"))
}

/// Extract a percentage from `args`, accepting either a bare number or
/// `{"percent": n}`, and clamp it to `min..=100`.
pub fn percent_arg(module: ModuleName, args: &Value, min: u8) -> Result<u8, LinkError> {
    let raw = args
        .as_f64()
        .or_else(|| args.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        .or_else(|| args.get("percent").and_then(Value::as_f64))
        .ok_or_else(|| {
            LinkError::InvalidArgument(format!("{module} expects a numeric percentage"))
        })?;
    Ok(raw.round().clamp(f64::from(min), 100.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn percent_arg_accepts_number_string_and_object() {
        assert_eq!(percent_arg(ModuleName::Volume, &json!(50), 0).unwrap(), 50);
        assert_eq!(percent_arg(ModuleName::Volume, &json!("42"), 0).unwrap(), 42);
        assert_eq!(percent_arg(ModuleName::Volume, &json!({"percent": 7}), 0).unwrap(), 7);
    }

    #[test]
    fn percent_arg_clamps() {
        assert_eq!(percent_arg(ModuleName::Volume, &json!(150), 0).unwrap(), 100);
        assert_eq!(percent_arg(ModuleName::Brightness, &json!(0), 1).unwrap(), 1);
        assert_eq!(percent_arg(ModuleName::Volume, &json!(-5), 0).unwrap(), 0);
    }

    #[test]
    fn percent_arg_rejects_garbage() {
        let err = percent_arg(ModuleName::Volume, &json!({"level": "loud"}), 0).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn filesystem_actions_are_flagged() {
        assert!(Action::ReadFile.is_filesystem());
        assert!(!Action::Mount.is_filesystem());
    }
}
