//! Utility functions for migratus
//!
//! Small helpers shared by the managers: SHA-256 hashing, atomic file
//! writes, relative path handling and human-readable sizes.
//!
//! ## Path conventions
//!
//! Paths stored in archives, manifests and checksums are always relative to
//! the configuration root and use `/` as separator regardless of platform
//! (see [`normalize_rel_path`]). This keeps checksums and archive layouts
//! identical across operating systems.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::utils::{hash_data, atomic_write, format_bytes};
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let digest = hash_data(b"version: 1.2.0");
//! assert_eq!(digest.len(), 64);
//!
//! atomic_write(Path::new(".version"), b"1.2.0\n")?;
//! println!("{}", format_bytes(1536)); // "1.50 KB"
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::trace;

/// Hash a file's content using SHA-256
///
/// Reads the file through an 8KB buffer so large files are never held in
/// memory at once.
///
/// # Arguments
///
/// * `path` - Path to the file to hash
///
/// # Returns
///
/// Returns the SHA-256 hash as a 64-character hexadecimal string.
///
/// # Errors
///
/// - [`MigratusError::Io`](crate::error::MigratusError::Io) if the file cannot be read
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash arbitrary data using SHA-256
///
/// Returns the SHA-256 hash as a 64-character hexadecimal string.
///
/// ```rust,ignore
/// let hash = hash_data(b"Hello, world!");
/// assert_eq!(hash, hash_data(b"Hello, world!"));
/// ```
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Atomic file write (write to a temp file in the same directory, then rename)
///
/// Parent directories are created when missing. Readers observe either the
/// previous content or the complete new content, never a partial file. The
/// temporary file is removed automatically if any step fails.
///
/// # Errors
///
/// - [`MigratusError::Io`](crate::error::MigratusError::Io) if the directory
///   cannot be created or the temp file cannot be written or persisted
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let mut temp = NamedTempFile::new_in(&parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Make a path relative to a base path
///
/// Tries a lexical strip first and falls back to canonicalising both paths,
/// which handles `..` components and symlinked roots.
///
/// # Errors
///
/// - [`MigratusError::Io`](crate::error::MigratusError::Io) if canonicalisation fails
/// - [`MigratusError::Internal`](crate::error::MigratusError::Internal) if `path`
///   is not under `base`
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            crate::error::MigratusError::internal(format!(
                "Path {:?} is not under base {:?}",
                path, base
            ))
        })
}

/// Render a relative path with `/` separators
///
/// Used for archive member names, manifest keys and checksum input.
pub fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Check that a relative path stays inside the directory it is joined onto
///
/// Rejects absolute paths, drive prefixes and any `..` component.
pub fn is_contained_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Remove now-empty directories from `dir` upwards, stopping at `stop_at`
///
/// Returns the number of directories removed.
pub fn prune_empty_dirs(dir: &Path, stop_at: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut current = Some(dir);

    while let Some(path) = current {
        if path == stop_at || !path.starts_with(stop_at) {
            break;
        }
        let is_empty = match fs::read_dir(path) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => break,
        };
        if !is_empty {
            break;
        }
        fs::remove_dir(path)?;
        removed += 1;
        current = path.parent();
    }

    Ok(removed)
}

/// Format bytes as human-readable string
///
/// ```rust,ignore
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
