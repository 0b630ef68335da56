//! [`OriginPolicy`] – decides which browser origins may connect.
//!
//! An origin is admitted when any of these holds:
//!
//! 1. it is in the embedded static list (exact match);
//! 2. it is in the remote list most recently fetched (exact match);
//! 3. its host is loopback (`localhost`, `127.0.0.0/8`, `[::1]`).
//!
//! Requests without an `Origin` header are native clients; they are
//! admitted only from a loopback peer address. Everything else is refused
//! with [`LinkError::OriginRejected`] before any connection state exists.

use std::collections::HashSet;
use std::net::IpAddr;

use hostlink_types::LinkError;
use parking_lot::RwLock;
use url::{Host, Url};

/// Origins trusted out of the box.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "https://turbowarp.org",
    "https://origin.mistium.com",
    "http://localhost:5001",
    "http://localhost:5002",
    "http://localhost:3000",
    "http://127.0.0.1:5001",
    "http://127.0.0.1:5002",
    "http://127.0.0.1:3000",
];

/// # Example
///
/// ```
/// use hostlink_kernel::OriginPolicy;
///
/// let policy = OriginPolicy::new(["https://turbowarp.org"]);
/// assert!(policy.check(Some("https://turbowarp.org"), None).is_ok());
/// assert!(policy.check(Some("http://localhost:8000"), None).is_ok());
/// assert!(policy.check(Some("https://evil.example"), None).is_err());
/// ```
pub struct OriginPolicy {
    embedded: HashSet<String>,
    remote: RwLock<HashSet<String>>,
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_ORIGINS.iter().copied())
    }
}

impl OriginPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            embedded: origins.into_iter().map(|o| normalize(o.as_ref())).collect(),
            remote: RwLock::new(HashSet::new()),
        }
    }

    /// Replace the remote list. An empty list reverts to the embedded list
    /// alone.
    pub fn replace_remote<I, S>(&self, origins: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: HashSet<String> = origins.into_iter().map(|o| normalize(o.as_ref())).collect();
        let n = set.len();
        *self.remote.write() = set;
        n
    }

    /// Every origin currently admitted by exact match, sorted.
    pub fn allowed(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .embedded
            .iter()
            .chain(self.remote.read().iter())
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        all.sort();
        all
    }

    /// Admit or refuse a connection attempt.
    pub fn check(&self, origin: Option<&str>, peer: Option<IpAddr>) -> Result<(), LinkError> {
        match origin.map(str::trim).filter(|o| !o.is_empty()) {
            Some(origin) => {
                let key = normalize(origin);
                if self.embedded.contains(&key)
                    || self.remote.read().contains(&key)
                    || is_loopback_origin(origin)
                {
                    Ok(())
                } else {
                    Err(LinkError::OriginRejected(origin.to_string()))
                }
            }
            None if peer.is_some_and(|ip| ip.is_loopback()) => Ok(()),
            None => Err(LinkError::OriginRejected(match peer {
                Some(ip) => format!("no origin from {ip}"),
                None => "no origin".to_string(),
            })),
        }
    }
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

fn is_loopback_origin(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host() {
        Some(Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn exact_match_is_case_and_slash_insensitive() {
        let policy = OriginPolicy::default();
        assert!(policy.check(Some("https://TurboWarp.org/"), None).is_ok());
        assert!(policy.check(Some("https://turbowarp.org.evil.com"), None).is_err());
    }

    #[test]
    fn loopback_origins_are_allowed() {
        let policy = OriginPolicy::new(Vec::<String>::new());
        assert!(policy.check(Some("http://localhost:9999"), None).is_ok());
        assert!(policy.check(Some("http://127.0.0.1"), None).is_ok());
        assert!(policy.check(Some("http://[::1]:8080"), None).is_ok());
        assert!(policy.check(Some("http://localhost.evil.com"), None).is_err());
        assert!(policy.check(Some("file://localhost/x"), None).is_err());
    }

    #[test]
    fn foreign_origin_is_refused_even_from_loopback_peer() {
        let policy = OriginPolicy::default();
        let err = policy
            .check(Some("https://evil.example"), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)))
            .unwrap_err();
        assert_eq!(err, LinkError::OriginRejected("https://evil.example".into()));
    }

    #[test]
    fn missing_origin_needs_loopback_peer() {
        let policy = OriginPolicy::default();
        assert!(policy.check(None, Some(IpAddr::V6(Ipv6Addr::LOCALHOST))).is_ok());
        assert!(policy.check(None, Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9)))).is_err());
        assert!(policy.check(Some("  "), None).is_err());
    }

    #[test]
    fn remote_list_extends_and_can_be_cleared() {
        let policy = OriginPolicy::default();
        assert!(policy.check(Some("https://app.example"), None).is_err());
        assert_eq!(policy.replace_remote(["https://app.example"]), 1);
        assert!(policy.check(Some("https://app.example"), None).is_ok());
        assert!(policy.allowed().contains(&"https://app.example".to_string()));
        policy.replace_remote(Vec::<String>::new());
        assert!(policy.check(Some("https://app.example"), None).is_err());
        assert!(policy.check(Some("https://turbowarp.org"), None).is_ok());
    }
}
