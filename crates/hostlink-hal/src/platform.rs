//! Startup-time provider selection.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hostlink_types::LinkError;
use tracing::info;

use crate::generic::GenericProvider;
use crate::linux::LinuxProvider;
use crate::provider::SharedProvider;
use crate::sim::SimProvider;

/// Which provider family to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// Pick the best provider for the running OS.
    #[default]
    Auto,
    /// Scripted in-process provider; no OS access beyond file operations.
    Sim,
}

impl FromStr for ProviderKind {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ProviderKind::Auto),
            "sim" => Ok(ProviderKind::Sim),
            other => Err(LinkError::InvalidArgument(format!("unknown provider: {other}"))),
        }
    }
}

/// Build the provider for this host.
///
/// `command_timeout` bounds every external command the Linux provider runs;
/// `mount_timeout` bounds mount and unmount.
pub fn detect(kind: ProviderKind, command_timeout: Duration, mount_timeout: Duration) -> SharedProvider {
    let provider: SharedProvider = match kind {
        ProviderKind::Sim => Arc::new(SimProvider::new()),
        ProviderKind::Auto if cfg!(target_os = "linux") => Arc::new(
            LinuxProvider::new()
                .with_command_timeout(command_timeout)
                .with_mount_timeout(mount_timeout),
        ),
        ProviderKind::Auto => Arc::new(GenericProvider::new()),
    };
    info!(platform = provider.platform(), "capability provider selected");
    provider
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_kind() {
        assert_eq!("SIM".parse::<ProviderKind>().unwrap(), ProviderKind::Sim);
        assert_eq!("auto".parse::<ProviderKind>().unwrap(), ProviderKind::Auto);
        assert!("mainframe".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn sim_kind_builds_sim_provider() {
        let p = detect(ProviderKind::Sim, Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(p.platform(), "sim");
    }
}
