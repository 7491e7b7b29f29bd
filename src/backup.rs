//! Backup archives of a configuration tree
//!
//! [`BackupManager`] snapshots the files selected by the tree's include and
//! exclude globs into a deflate-compressed zip archive inside the backup
//! store (`.claude/backups` by default).
//!
//! ## Archive layout
//!
//! ```text
//! backup_20240501_101500_123456.zip
//! ├── CLAUDE.md
//! ├── .claude/settings.json
//! ├── .claude/commands/build.md
//! └── backup_metadata.json          manifest
//! ```
//!
//! Members mirror the tree's relative paths. The manifest records the
//! timestamp, description, file count, total size, detected version, the glob
//! sets used and a SHA-256 digest per member:
//!
//! ```json
//! {
//!   "timestamp": "2024-05-01T10:15:00.123456+00:00",
//!   "description": "Pre-upgrade backup (1.0.0 -> 1.2.0)",
//!   "files_count": 3,
//!   "total_size": 2048,
//!   "version": "1.0.0",
//!   "backup_patterns": ["CLAUDE.md", "..."],
//!   "exclude_patterns": [".claude/backups/**", "..."],
//!   "checksums": {"CLAUDE.md": "5d41402a..."}
//! }
//! ```
//!
//! ## Guarantees
//!
//! - A failed `create_backup` never leaves a partial archive behind
//! - `restore_backup` without confirmation touches nothing
//! - Restore validates every member before the first write and takes a
//!   safety backup of the current state
//! - After restore, the files matched by the archive's recorded globs are
//!   exactly the archived ones
//!
//! ## Example
//!
//! ```rust,no_run
//! use migratus::{BackupManager, TreeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = BackupManager::new(TreeConfig::new("./project"))?;
//! let backup = manager.create_backup("Before editing settings")?;
//!
//! // ... edit files ...
//!
//! let result = manager.restore_backup(&backup.name, true);
//! assert!(result.is_success());
//! manager.cleanup_old_backups(10)?;
//! # Ok(())
//! # }
//! ```

use crate::config::TreeConfig;
use crate::error::{MigratusError, Result};
use crate::file_tracking::FileTracker;
use crate::types::{lenient_timestamp, unsupported_migration, MigrationResult, Migrator};
use crate::utils;
use crate::version::Version;
use crate::version_manager::VersionManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the manifest member inside every archive
pub const MANIFEST_ENTRY: &str = "backup_metadata.json";

const ARCHIVE_EXTENSION: &str = "zip";

/// Manifest stored inside each archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// When the archive was written
    #[serde(with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied description
    #[serde(default)]
    pub description: String,
    /// Number of mirrored files
    #[serde(default)]
    pub files_count: usize,
    /// Sum of mirrored file sizes
    #[serde(default)]
    pub total_size: u64,
    /// Version detected at backup time
    #[serde(default)]
    pub version: Option<String>,
    /// Include globs used
    #[serde(default)]
    pub backup_patterns: Vec<String>,
    /// Exclude globs used
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// SHA-256 per member; empty for archives written by older tools
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

/// A stored backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Backup name (archive file stem)
    pub name: String,
    /// Manifest timestamp
    pub timestamp: DateTime<Utc>,
    /// Archive path
    pub path: PathBuf,
    /// Archive size in bytes
    pub size_bytes: u64,
    /// Manifest description
    pub description: String,
    /// Number of mirrored files
    pub files_count: usize,
    /// Version detected at backup time
    pub version: Option<String>,
    /// SHA-256 of the archive file
    pub checksum: String,
}

/// What a restore did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Backup that was restored
    pub backup_name: String,
    /// Files written from the archive, relative to the root
    pub files_restored: Vec<PathBuf>,
    /// Tracked files removed because the archive did not contain them
    pub files_removed: Vec<PathBuf>,
    /// Snapshot of the state just before restoring
    pub safety_backup: Option<BackupInfo>,
}

impl RestoreReport {
    /// Every path the restore wrote or removed
    pub fn files_affected(&self) -> Vec<PathBuf> {
        self.files_restored
            .iter()
            .chain(&self.files_removed)
            .cloned()
            .collect()
    }
}

/// Integrity report for one archive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupVerification {
    /// Backup name
    pub name: String,
    /// Members hashed
    pub files_checked: usize,
    /// Members whose digest differs from the manifest
    pub mismatched: Vec<String>,
    /// Manifest entries with no member
    pub missing: Vec<String>,
    /// Members not listed in the manifest (or with unsafe names)
    pub unexpected: Vec<String>,
}

impl BackupVerification {
    /// Whether the archive matches its manifest
    pub fn is_valid(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Creates, restores and maintains backup archives for one tree
#[derive(Debug, Clone)]
pub struct BackupManager {
    config: TreeConfig,
    version_manager: VersionManager,
}

impl BackupManager {
    /// Create a manager and make sure the backup store exists
    ///
    /// # Errors
    ///
    /// - [`MigratusError::Io`] if the backup directory cannot be created
    pub fn new(config: TreeConfig) -> Result<Self> {
        let version_manager = VersionManager::new(config.clone())?;
        fs::create_dir_all(config.backups_path())?;
        Ok(Self {
            config,
            version_manager,
        })
    }

    /// Tree configuration
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Absolute path of the backup store
    pub fn backups_path(&self) -> PathBuf {
        self.config.backups_path()
    }

    /// Archive path for a backup name
    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.backups_path()
            .join(format!("{}.{}", name, ARCHIVE_EXTENSION))
    }

    /// Snapshot the tree into a new archive
    ///
    /// # Arguments
    ///
    /// * `description` - Stored in the manifest; shown by [`list_backups`](Self::list_backups)
    ///
    /// # Errors
    ///
    /// - [`MigratusError::BackupCreationFailed`] if anything goes wrong; the
    ///   partial archive has already been deleted
    #[instrument(skip(self), fields(root = ?self.config.root_path))]
    pub fn create_backup(&self, description: &str) -> Result<BackupInfo> {
        let now = Utc::now();
        let name = self.unique_name(&format!("backup_{}", now.format("%Y%m%d_%H%M%S_%6f")));
        let path = self.archive_path(&name);

        if let Err(e) = self.write_archive(&path, description, now) {
            if path.exists() {
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!("Failed to remove partial archive {:?}: {}", path, remove_err);
                }
            }
            return Err(MigratusError::BackupCreationFailed {
                name,
                reason: e.to_string(),
            });
        }

        let info = self.read_info(&path)?;
        info!(
            name = %info.name,
            files = info.files_count,
            size = %utils::format_bytes(info.size_bytes),
            "Created backup"
        );
        Ok(info)
    }

    fn unique_name(&self, base: &str) -> String {
        if !self.archive_path(base).exists() {
            return base.to_string();
        }
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_{}", base, &suffix[..8])
    }

    fn write_archive(&self, path: &Path, description: &str, timestamp: DateTime<Utc>) -> Result<()> {
        fs::create_dir_all(self.backups_path())?;
        let files = FileTracker::for_backup(&self.config).scan()?;

        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let mut zip = ZipWriter::new(file);
        let mut checksums = BTreeMap::new();
        let mut total_size = 0u64;

        for tracked in &files {
            if tracked.rel_path == MANIFEST_ENTRY {
                warn!("Skipping {} because it collides with the manifest entry", tracked.rel_path);
                continue;
            }
            let bytes = fs::read(&tracked.path)?;
            total_size += bytes.len() as u64;
            checksums.insert(tracked.rel_path.clone(), utils::hash_data(&bytes));

            zip.start_file(tracked.rel_path.as_str(), entry_options())?;
            zip.write_all(&bytes)?;
        }

        let manifest = BackupManifest {
            timestamp,
            description: description.to_string(),
            files_count: checksums.len(),
            total_size,
            version: self
                .version_manager
                .detect_current_version()
                .map(|v| v.to_string()),
            backup_patterns: self.config.include_patterns.clone(),
            exclude_patterns: self.config.exclude_patterns.clone(),
            checksums,
        };
        zip.start_file(MANIFEST_ENTRY, entry_options())?;
        zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
        zip.finish()?;

        debug!("Wrote {} members to {:?}", manifest.files_count, path);
        Ok(())
    }

    /// Read the manifest of an archive
    ///
    /// # Errors
    ///
    /// - [`MigratusError::InvalidBackup`] if the file is not a zip archive or
    ///   has no readable manifest
    pub fn read_manifest(&self, path: &Path) -> Result<BackupManifest> {
        let invalid = |reason: String| MigratusError::InvalidBackup {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file).map_err(|e| invalid(format!("not an archive: {}", e)))?;
        let mut entry = archive
            .by_name(MANIFEST_ENTRY)
            .map_err(|_| invalid("missing manifest".to_string()))?;

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| invalid(format!("unreadable manifest: {}", e)))?;
        serde_json::from_str(&content).map_err(|e| invalid(format!("corrupted manifest: {}", e)))
    }

    fn read_info(&self, path: &Path) -> Result<BackupInfo> {
        let manifest = self.read_manifest(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(BackupInfo {
            name,
            timestamp: manifest.timestamp,
            path: path.to_path_buf(),
            size_bytes: fs::metadata(path)?.len(),
            description: manifest.description,
            files_count: manifest.files_count,
            version: manifest.version,
            checksum: utils::hash_file_content(path)?,
        })
    }

    /// Archives in the store, newest first
    ///
    /// Archives that cannot be read are logged and skipped.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let mut backups: Vec<BackupInfo> = self
            .archive_paths()?
            .into_iter()
            .filter_map(|path| match self.read_info(&path) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("Skipping unreadable backup {:?}: {}", path, e);
                    None
                }
            })
            .collect();

        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.name.cmp(&a.name)));
        Ok(backups)
    }

    fn archive_paths(&self) -> Result<Vec<PathBuf>> {
        let dir = self.backups_path();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Look up one backup by name
    pub fn get_backup(&self, name: &str) -> Result<BackupInfo> {
        validate_name(name)?;
        let path = self.archive_path(name);
        if !path.is_file() {
            return Err(MigratusError::BackupNotFound(name.to_string()));
        }
        self.read_info(&path)
    }

    /// Restore a backup and report the outcome as a result record
    ///
    /// Without `confirm` nothing is touched and the result is FAILED. On
    /// success `backup_path` points at the safety backup of the pre-restore
    /// state.
    pub fn restore_backup(&self, name: &str, confirm: bool) -> MigrationResult {
        match self.try_restore(name, confirm) {
            Ok(report) => {
                let mut result = MigrationResult::success(format!(
                    "Restored backup '{}' ({} files restored, {} removed)",
                    name,
                    report.files_restored.len(),
                    report.files_removed.len()
                ))
                .with_backup(report.safety_backup.as_ref().map(|b| b.path.clone()));
                result.files_affected = report.files_affected();
                result
            }
            Err(MigratusError::RestoreConfirmationRequired) => MigrationResult::failed(
                "Restore requires explicit confirmation",
                MigratusError::RestoreConfirmationRequired,
            )
            .with_warning("Set confirm=true to proceed with restore"),
            Err(e) => MigrationResult::failed(format!("Restore of backup '{}' failed", name), e.user_message()),
        }
    }

    /// Restore a backup
    ///
    /// 1. Checks the archive exists and `confirm` is set
    /// 2. Reads every member and checks it against the manifest digests
    ///    (no writes yet)
    /// 3. Takes a safety backup of the current state
    /// 4. Writes every member, recreating parent directories
    /// 5. Removes files matched by the archive's recorded globs that the
    ///    archive does not contain; files outside those globs are left alone
    ///
    /// # Errors
    ///
    /// - [`MigratusError::BackupNotFound`] if the archive is absent
    /// - [`MigratusError::RestoreConfirmationRequired`] if `confirm` is false
    /// - [`MigratusError::InvalidBackup`] if the archive is unreadable or
    ///   contains members that would escape the root
    /// - [`MigratusError::ChecksumMismatch`] if a member differs from its
    ///   manifest digest
    /// - [`MigratusError::BackupCreationFailed`] if the safety backup fails
    #[instrument(skip(self), fields(root = ?self.config.root_path))]
    pub fn try_restore(&self, name: &str, confirm: bool) -> Result<RestoreReport> {
        validate_name(name)?;
        let path = self.archive_path(name);
        if !path.is_file() {
            return Err(MigratusError::BackupNotFound(name.to_string()));
        }
        if !confirm {
            return Err(MigratusError::RestoreConfirmationRequired);
        }

        let manifest = self.read_manifest(&path)?;
        let members = read_members(&path)?;
        for (rel_path, bytes) in &members {
            let key = utils::normalize_rel_path(rel_path);
            if let Some(expected) = manifest.checksums.get(&key) {
                let actual = utils::hash_data(bytes);
                if &actual != expected {
                    return Err(MigratusError::ChecksumMismatch {
                        path: key,
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
        }

        let safety_backup = self.create_backup(&format!("Safety backup before restoring {}", name))?;
        debug!("Safety backup {} taken", safety_backup.name);

        // Only files the archive's own globs cover are candidates for removal
        let archived: HashSet<String> = members
            .iter()
            .map(|(rel, _)| utils::normalize_rel_path(rel))
            .collect();
        let stale: Vec<_> =
            FileTracker::for_backup_patterns(&self.config, manifest.backup_patterns, manifest.exclude_patterns)
                .scan()?
                .into_iter()
                .filter(|tracked| !archived.contains(&tracked.rel_path))
                .collect();

        let root = &self.config.root_path;
        let mut files_restored = Vec::with_capacity(members.len());
        for (rel_path, bytes) in &members {
            utils::atomic_write(&root.join(rel_path), bytes)?;
            files_restored.push(rel_path.clone());
        }

        let mut files_removed = Vec::new();
        for tracked in stale {
            fs::remove_file(&tracked.path)?;
            if let Some(parent) = tracked.path.parent() {
                utils::prune_empty_dirs(parent, root)?;
            }
            files_removed.push(PathBuf::from(&tracked.rel_path));
        }

        info!(
            backup = name,
            restored = files_restored.len(),
            removed = files_removed.len(),
            "Restored backup"
        );
        Ok(RestoreReport {
            backup_name: name.to_string(),
            files_restored,
            files_removed,
            safety_backup: Some(safety_backup),
        })
    }

    /// Delete a backup; returns whether it existed
    pub fn delete_backup(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let path = self.archive_path(name);
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        info!(backup = name, "Deleted backup");
        Ok(true)
    }

    /// Keep the `keep_count` newest backups and delete the rest
    ///
    /// Returns the number of backups deleted. Individual delete failures are
    /// logged and not counted.
    pub fn cleanup_old_backups(&self, keep_count: usize) -> Result<usize> {
        let backups = self.list_backups()?;
        let mut deleted = 0;

        for backup in backups.iter().skip(keep_count) {
            match fs::remove_file(&backup.path) {
                Ok(()) => {
                    debug!("Removed old backup {}", backup.name);
                    deleted += 1;
                }
                Err(e) => warn!("Failed to remove old backup {}: {}", backup.name, e),
            }
        }

        if deleted > 0 {
            info!(deleted, kept = keep_count, "Cleaned up old backups");
        }
        Ok(deleted)
    }

    /// Total size of all archives in the store
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0;
        for path in self.archive_paths()? {
            total += fs::metadata(&path)?.len();
        }
        Ok(total)
    }

    /// Copy a backup out of the store
    ///
    /// If `destination` is an existing directory the archive keeps its file
    /// name inside it. Missing parent directories are created.
    ///
    /// # Returns
    ///
    /// The path written.
    pub fn export_backup(&self, name: &str, destination: &Path) -> Result<PathBuf> {
        validate_name(name)?;
        let source = self.archive_path(name);
        if !source.is_file() {
            return Err(MigratusError::BackupNotFound(name.to_string()));
        }

        let target = if destination.is_dir() {
            destination.join(format!("{}.{}", name, ARCHIVE_EXTENSION))
        } else {
            destination.to_path_buf()
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, &target)?;

        info!(backup = name, destination = ?target, "Exported backup");
        Ok(target)
    }

    /// Copy an archive into the store
    ///
    /// The name defaults to `imported_<timestamp>`. The source must be a
    /// readable archive with a valid manifest.
    ///
    /// # Errors
    ///
    /// - [`MigratusError::InvalidBackup`] if the file is missing or not a valid backup
    /// - [`MigratusError::BackupCreationFailed`] if the name is already taken
    pub fn import_backup(&self, source: &Path, name: Option<&str>) -> Result<BackupInfo> {
        if !source.is_file() {
            return Err(MigratusError::InvalidBackup {
                path: source.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }
        self.read_manifest(source)?;

        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("imported_{}", Utc::now().format("%Y%m%d_%H%M%S")));
        validate_name(&name)?;

        let target = self.archive_path(&name);
        if target.exists() {
            return Err(MigratusError::BackupCreationFailed {
                name,
                reason: "a backup with this name already exists".to_string(),
            });
        }

        fs::create_dir_all(self.backups_path())?;
        fs::copy(source, &target)?;
        match self.read_info(&target) {
            Ok(info) => {
                info!(backup = %info.name, "Imported backup");
                Ok(info)
            }
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&target) {
                    warn!("Failed to remove invalid import {:?}: {}", target, remove_err);
                }
                Err(e)
            }
        }
    }

    /// Re-hash every member and compare against the manifest
    pub fn verify_backup(&self, name: &str) -> Result<BackupVerification> {
        validate_name(name)?;
        let path = self.archive_path(name);
        if !path.is_file() {
            return Err(MigratusError::BackupNotFound(name.to_string()));
        }
        let manifest = self.read_manifest(&path)?;
        let mut report = BackupVerification {
            name: name.to_string(),
            ..Default::default()
        };

        let mut archive = ZipArchive::new(File::open(&path)?)?;
        let mut seen = HashSet::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() || entry.name() == MANIFEST_ENTRY {
                continue;
            }
            let member = entry.name().to_string();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            report.files_checked += 1;

            let safe = entry
                .enclosed_name()
                .is_some_and(|p| utils::is_contained_relative(&p));
            if !safe {
                report.unexpected.push(member);
                continue;
            }
            if manifest.checksums.is_empty() {
                continue;
            }
            match manifest.checksums.get(&member) {
                Some(expected) if *expected == utils::hash_data(&bytes) => {}
                Some(_) => report.mismatched.push(member.clone()),
                None => report.unexpected.push(member.clone()),
            }
            seen.insert(member);
        }

        report.missing = manifest
            .checksums
            .keys()
            .filter(|k| !seen.contains(*k))
            .cloned()
            .collect();

        debug!(backup = name, valid = report.is_valid(), "Verified backup");
        Ok(report)
    }

    /// Version manager for the same tree
    pub fn version_manager(&self) -> &VersionManager {
        &self.version_manager
    }
}

impl Migrator for BackupManager {
    fn migrate(&mut self, source: &Version, target: &Version) -> MigrationResult {
        unsupported_migration("BackupManager", source, target)
    }

    fn can_migrate(&self, _source: &Version, _target: &Version) -> bool {
        false
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Backup names are plain file stems
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(MigratusError::InvalidBackupName(name.to_string()))
    }
}

/// Read every non-manifest member, rejecting names that escape the root
fn read_members(path: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut members = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || entry.name() == MANIFEST_ENTRY {
            continue;
        }
        let rel_path = entry
            .enclosed_name()
            .filter(|p| utils::is_contained_relative(p))
            .ok_or_else(|| MigratusError::InvalidBackup {
                path: path.to_path_buf(),
                reason: format!("unsafe member name '{}'", entry.name()),
            })?;

        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        members.push((rel_path, bytes));
    }

    Ok(members)
}
