//! File operations on already-validated paths.
//!
//! Every function here trusts its `path` argument: the command router runs
//! each request through the kernel's path guard and passes the canonical
//! result in `args["path"]`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hostlink_types::{LinkError, ModuleName};
use serde_json::{Value, json};

use crate::provider::{Action, unsupported};

/// Largest file `read_file` will return unless the caller asks for less.
pub const DEFAULT_MAX_READ_BYTES: u64 = 1024 * 1024;

/// Directory listings are truncated to this many entries by default.
pub const DEFAULT_MAX_LIST_ENTRIES: usize = 50;

const TEXT_SNIFF_BYTES: usize = 1024;

/// Route a filesystem [`Action`] to its implementation.
pub fn dispatch(action: Action, args: &Value) -> Result<Value, LinkError> {
    let path = path_arg(args)?;
    match action {
        Action::ListDir => {
            let max = args
                .get("max_entries")
                .and_then(Value::as_u64)
                .map_or(DEFAULT_MAX_LIST_ENTRIES, |n| n as usize);
            list_dir(&path, max)
        }
        Action::ReadFile => {
            let max = args
                .get("max_size")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_MAX_READ_BYTES);
            read_file(&path, max)
        }
        Action::WriteFile => {
            let content = args
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| LinkError::InvalidArgument("fs_write requires 'content'".into()))?;
            let kind = args.get("type").and_then(Value::as_str).unwrap_or("text");
            write_file(&path, content, kind)
        }
        Action::MakeDir => make_dir(&path),
        Action::Delete => delete_path(&path),
        other => Err(unsupported(ModuleName::Fs, other)),
    }
}

fn path_arg(args: &Value) -> Result<PathBuf, LinkError> {
    args.get("path")
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or_else(|| LinkError::InvalidArgument("missing 'path'".into()))
}

fn io_failure(path: &Path, e: io::Error) -> LinkError {
    let details = match e.kind() {
        io::ErrorKind::NotFound => format!("{} does not exist", path.display()),
        io::ErrorKind::PermissionDenied => format!("permission denied: {}", path.display()),
        _ => format!("{}: {e}", path.display()),
    };
    LinkError::failure(ModuleName::Fs, details)
}

// ────────────────────────────────────────────────────────────────────────────
// Listing
// ────────────────────────────────────────────────────────────────────────────

/// List `path`, directories first, then by case-insensitive name.
pub fn list_dir(path: &Path, max_entries: usize) -> Result<Value, LinkError> {
    let reader = fs::read_dir(path).map_err(|e| io_failure(path, e))?;

    let mut items: Vec<(bool, String, Value)> = reader
        .filter_map(Result::ok)
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let item = describe(&entry.path(), &name);
            let is_dir = item["type"] == "directory";
            (is_dir, name, item)
        })
        .collect();

    items.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.to_lowercase().cmp(&b.1.to_lowercase())));
    let total = items.len();
    let contents: Vec<Value> = items.into_iter().take(max_entries).map(|(_, _, v)| v).collect();

    Ok(json!({
        "path": path.display().to_string(),
        "contents": contents,
        "total": total,
        "truncated": total > max_entries,
    }))
}

fn describe(path: &Path, name: &str) -> Value {
    let meta = fs::metadata(path).ok();
    let is_dir = meta.as_ref().is_some_and(|m| m.is_dir());
    let modified = meta
        .as_ref()
        .and_then(|m| m.modified().ok())
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339());
    let extension = if is_dir {
        None
    } else {
        path.extension().map(|e| e.to_string_lossy().to_lowercase())
    };

    json!({
        "name": name,
        "type": if is_dir { "directory" } else { "file" },
        "readable": meta.is_some(),
        "writable": meta.as_ref().is_some_and(|m| !m.permissions().readonly()),
        "path": path.display().to_string(),
        "modified": modified,
        "permissions": meta.as_ref().and_then(permission_bits),
        "size": meta.as_ref().filter(|m| m.is_file()).map(|m| m.len()),
        "extension": extension,
    })
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:o}", meta.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
fn permission_bits(_meta: &fs::Metadata) -> Option<String> {
    None
}

// ────────────────────────────────────────────────────────────────────────────
// Reading and writing
// ────────────────────────────────────────────────────────────────────────────

/// Read a file of at most `max_size` bytes.
///
/// Content whose first kilobyte contains no NUL byte is returned as text
/// (UTF-8, falling back to Latin-1); anything else is base64-encoded.
pub fn read_file(path: &Path, max_size: u64) -> Result<Value, LinkError> {
    let meta = fs::metadata(path).map_err(|e| io_failure(path, e))?;
    if meta.is_dir() {
        return Err(LinkError::InvalidArgument(format!("{} is a directory", path.display())));
    }
    if meta.len() > max_size {
        return Err(LinkError::failure(
            ModuleName::Fs,
            format!("file too large: {} bytes (limit {max_size})", meta.len()),
        ));
    }

    let bytes = fs::read(path).map_err(|e| io_failure(path, e))?;
    let sample = &bytes[..bytes.len().min(TEXT_SNIFF_BYTES)];

    let (content, kind, encoding) = if sample.contains(&0) {
        (BASE64.encode(&bytes), "binary", "base64")
    } else {
        match std::str::from_utf8(&bytes) {
            Ok(text) => (text.to_string(), "text", "utf-8"),
            Err(_) => (bytes.iter().map(|&b| char::from(b)).collect(), "text", "latin-1"),
        }
    };

    Ok(json!({
        "path": path.display().to_string(),
        "content": content,
        "type": kind,
        "size": bytes.len(),
        "encoding": encoding,
    }))
}

/// Write `content` to `path`. `kind` is `"text"` or `"binary"` (base64).
pub fn write_file(path: &Path, content: &str, kind: &str) -> Result<Value, LinkError> {
    match path.parent() {
        Some(parent) if parent.is_dir() => {}
        _ => {
            return Err(LinkError::failure(
                ModuleName::Fs,
                format!("directory does not exist: {}", path.display()),
            ));
        }
    }

    let bytes = match kind {
        "text" => content.as_bytes().to_vec(),
        "binary" => BASE64
            .decode(content)
            .map_err(|e| LinkError::InvalidArgument(format!("invalid base64 content: {e}")))?,
        other => return Err(LinkError::InvalidArgument(format!("unknown content type: {other}"))),
    };

    fs::write(path, &bytes).map_err(|e| io_failure(path, e))?;
    Ok(json!({ "path": path.display().to_string(), "size": bytes.len(), "written": true }))
}

pub fn make_dir(path: &Path) -> Result<Value, LinkError> {
    if path.exists() {
        return Err(LinkError::failure(
            ModuleName::Fs,
            format!("path already exists: {}", path.display()),
        ));
    }
    fs::create_dir_all(path).map_err(|e| io_failure(path, e))?;
    Ok(json!({ "path": path.display().to_string(), "created": true }))
}

/// Delete a file, or a directory and everything beneath it.
pub fn delete_path(path: &Path) -> Result<Value, LinkError> {
    let meta = fs::symlink_metadata(path).map_err(|e| io_failure(path, e))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).map_err(|e| io_failure(path, e))?;
    } else {
        fs::remove_file(path).map_err(|e| io_failure(path, e))?;
    }
    Ok(json!({ "path": path.display().to_string(), "deleted": true }))
}
