//! [`PathGuard`] – confines client-supplied paths to mounted removable
//! volumes.
//!
//! `validate` canonicalises the request (resolving `..` and symlinks) and
//! admits it only if the result is a mounted volume root or lies beneath
//! one. The volume list is a snapshot refreshed by every USB poll through
//! [`VolumeRefreshHook`]; nothing about a validation is remembered, so every
//! file operation is checked against the mounts current at that moment.
//!
//! Volumes mounted at a protected system location (`/`, `/boot`, the macOS
//! system volumes, …) are never trusted as roots.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use hostlink_types::{LinkError, ModuleName, MountedVolume};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info};

use crate::scheduler::PollHook;

/// System locations that are never accepted as a volume root.
pub const PROTECTED_ROOTS: &[&str] = &[
    "/",
    "/boot",
    "/boot/efi",
    "/etc",
    "/home",
    "/usr",
    "/var",
    "/System",
    "/System/Volumes/Data",
    "/System/Volumes/Preboot",
    "/System/Volumes/VM",
];

/// Volume labels of macOS system volumes.
pub const PROTECTED_LABELS: &[&str] = &["Macintosh HD", "System", "Data", "Preboot", "Recovery", "VM"];

/// A path that passed validation, with the volume root that admitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath {
    pub path: PathBuf,
    pub root: PathBuf,
}

impl ValidatedPath {
    /// `true` when the path is the volume root itself.
    pub fn is_root(&self) -> bool {
        self.path == self.root
    }
}

pub struct PathGuard {
    volumes: RwLock<Vec<MountedVolume>>,
    protected: Vec<PathBuf>,
}

impl Default for PathGuard {
    fn default() -> Self {
        Self {
            volumes: RwLock::new(Vec::new()),
            protected: PROTECTED_ROOTS.iter().map(PathBuf::from).collect(),
        }
    }
}

impl PathGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the trusted volume list.
    pub fn replace_volumes(&self, volumes: Vec<MountedVolume>) {
        *self.volumes.write() = volumes;
    }

    pub fn volumes(&self) -> Vec<MountedVolume> {
        self.volumes.read().clone()
    }

    /// Canonicalise `requested` and require it to live under exactly one
    /// trusted volume root. Nested mounts resolve to the deepest root.
    ///
    /// Relative requests are taken relative to `/`, which is how HTTP path
    /// captures arrive.
    ///
    /// # Errors
    ///
    /// [`LinkError::PathRejected`] when the path is empty, cannot be
    /// resolved, escapes every root, or names a protected location.
    pub fn validate(&self, requested: &str) -> Result<ValidatedPath, LinkError> {
        if requested.trim().is_empty() || requested.contains('\0') {
            return Err(LinkError::rejected(requested, "empty or malformed path"));
        }
        let absolute = if requested.starts_with('/') {
            PathBuf::from(requested)
        } else {
            Path::new("/").join(requested)
        };

        let canonical = canonicalize_lenient(&absolute)
            .map_err(|e| LinkError::rejected(requested, format!("cannot resolve path: {e}")))?;

        if self.is_protected(&canonical) {
            return Err(LinkError::rejected(requested, "protected system location"));
        }

        let roots = self.trusted_roots();
        let root = roots
            .into_iter()
            .filter(|root| canonical.starts_with(root))
            .max_by_key(|root| root.components().count())
            .ok_or_else(|| LinkError::rejected(requested, "outside mounted volumes"))?;

        debug!(path = %canonical.display(), root = %root.display(), "path admitted");
        Ok(ValidatedPath { path: canonical, root })
    }

    fn is_protected(&self, path: &Path) -> bool {
        self.protected.iter().any(|p| p == path)
    }

    /// Canonical roots of the current volumes, minus protected ones and
    /// those that no longer exist.
    fn trusted_roots(&self) -> BTreeSet<PathBuf> {
        self.volumes
            .read()
            .iter()
            .filter(|v| !PROTECTED_LABELS.contains(&v.label.as_str()))
            .filter_map(|v| fs::canonicalize(&v.root_path).ok())
            .filter(|root| !self.is_protected(root))
            .collect()
    }
}

/// Canonicalise a path whose final components may not exist yet.
///
/// The longest existing ancestor is canonicalised and the missing tail is
/// appended; a tail containing `..` or `.` is refused because it cannot be
/// resolved safely.
fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    if let Ok(p) = fs::canonicalize(path) {
        return Ok(p);
    }
    let mut tail = Vec::new();
    let mut cursor = path;
    loop {
        let Some(parent) = cursor.parent() else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no existing ancestor"));
        };
        match cursor.components().next_back() {
            Some(Component::Normal(name)) => tail.push(name.to_os_string()),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "unresolvable component in missing path",
                ));
            }
        }
        cursor = parent;
        if let Ok(base) = fs::canonicalize(cursor) {
            return Ok(tail.iter().rev().fold(base, |acc, name| acc.join(name)));
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// USB poll hook
// ────────────────────────────────────────────────────────────────────────────

/// Refreshes the [`PathGuard`] from each USB poll and annotates the cached
/// value with a `change_type` of `initial`, `addition`, `removal`,
/// `changed` or `unchanged`.
pub struct VolumeRefreshHook {
    guard: Arc<PathGuard>,
    previous: Mutex<Option<BTreeSet<String>>>,
}

impl VolumeRefreshHook {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard, previous: Mutex::new(None) }
    }
}

/// Extract mounted volumes from a `{"drives": [{mount_points: [...]}]}` value.
pub fn volumes_from_drives(value: &Value) -> Vec<MountedVolume> {
    let drives = value["drives"].as_array().map(Vec::as_slice).unwrap_or_default();
    drives
        .iter()
        .flat_map(|d| d["mount_points"].as_array().map(Vec::as_slice).unwrap_or_default())
        .filter_map(|mp| {
            let root = mp["mount_point"].as_str()?;
            let label = mp["label"]
                .as_str()
                .or_else(|| mp["mount_name"].as_str())
                .unwrap_or_default();
            Some(MountedVolume {
                root_path: PathBuf::from(root),
                label: label.to_string(),
                filesystem_kind: mp["filesystem"].as_str().unwrap_or("unknown").to_string(),
                device: mp["device"].as_str().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

impl PollHook for VolumeRefreshHook {
    fn on_success(&self, _module: ModuleName, value: &mut Value) {
        let volumes = volumes_from_drives(value);
        let ids: BTreeSet<String> = value["drives"]
            .as_array()
            .map(|drives| {
                drives
                    .iter()
                    .filter_map(|d| d["device_node"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut previous = self.previous.lock();
        let change = match previous.as_ref() {
            None => "initial",
            Some(prev) => {
                let added = ids.difference(prev).count();
                let removed = prev.difference(&ids).count();
                match (added, removed) {
                    (0, 0) => "unchanged",
                    (_, 0) => "addition",
                    (0, _) => "removal",
                    _ => "changed",
                }
            }
        };
        if matches!(change, "addition" | "removal" | "changed") {
            info!(change, drives = ids.len(), "usb drives changed");
        }
        *previous = Some(ids);
        drop(previous);

        self.guard.replace_volumes(volumes);
        if let Some(obj) = value.as_object_mut() {
            obj.insert("change_type".to_string(), Value::String(change.to_string()));
        }
    }
}
