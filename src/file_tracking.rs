//! File selection for configuration trees
//!
//! [`FileTracker`] walks a tree and returns the files selected by an include
//! glob set minus an exclude glob set. The result is always sorted by the
//! normalized relative path, so anything derived from it (checksums, archive
//! layouts, diffs) is independent of directory traversal order.
//!
//! ## Pattern semantics
//!
//! Patterns are matched against paths relative to the root with `/`
//! separators. `*` never crosses a separator, `**` spans any number of
//! directories:
//!
//! ```text
//! CLAUDE.md                     only the root file
//! *.yml                         YAML files at the root
//! .claude/commands/**/*.md      markdown anywhere below commands/
//! **/node_modules/**            any node_modules directory
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use crate::file_tracking::FileTracker;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let files = FileTracker::new("./project")
//!     .with_include_patterns(vec!["CLAUDE.md".into(), ".claude/**/*.md".into()])
//!     .with_exclude_patterns(vec![".claude/backups/**".into()])
//!     .scan()?;
//!
//! for file in &files {
//!     println!("{} ({} bytes)", file.rel_path, file.size);
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::{compile_globset, TreeConfig};
use crate::error::Result;
use crate::utils;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// A file selected by a [`FileTracker`] scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// Relative path with `/` separators
    pub rel_path: String,
    /// Absolute (root-joined) path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Glob-driven file selector for one tree
///
/// ## Configuration Options
///
/// - `root_path`: Base directory to scan
/// - `include_patterns`: Files to select (empty selects nothing)
/// - `exclude_patterns`: Files to drop even when included
/// - `skip_dirs`: Relative directories never descended into
/// - `follow_symlinks`: Whether to follow symbolic links
/// - `strict`: Fail the scan on unreadable entries instead of skipping them
#[derive(Debug, Clone)]
pub struct FileTracker {
    root_path: PathBuf,
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
    skip_dirs: Vec<PathBuf>,
    follow_symlinks: bool,
    strict: bool,
}

impl FileTracker {
    /// Create a tracker that selects nothing until patterns are set
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            skip_dirs: Vec::new(),
            follow_symlinks: false,
            strict: false,
        }
    }

    /// Tracker for the backup selection of a configured tree
    ///
    /// Uses the include/exclude pair and never enters the backup store.
    /// Scans are strict: a file that cannot be reached fails the scan rather
    /// than silently dropping out of the archive.
    pub fn for_backup(config: &TreeConfig) -> Self {
        Self::for_backup_patterns(
            config,
            config.include_patterns.clone(),
            config.exclude_patterns.clone(),
        )
    }

    /// Strict backup selection with explicit glob sets
    ///
    /// Used on restore with the globs recorded in an archive's manifest.
    pub fn for_backup_patterns(config: &TreeConfig, include: Vec<String>, exclude: Vec<String>) -> Self {
        Self::new(&config.root_path)
            .with_include_patterns(include)
            .with_exclude_patterns(exclude)
            .with_skip_dir(&config.backup_dir)
            .with_follow_symlinks(config.follow_symlinks)
            .with_strict(true)
    }

    /// Tracker for the checksum selection of a configured tree
    pub fn for_checksum(config: &TreeConfig) -> Self {
        Self::new(&config.root_path)
            .with_include_patterns(config.checksum_patterns.clone())
            .with_exclude_patterns(config.exclude_patterns.clone())
            .with_skip_dir(&config.backup_dir)
            .with_follow_symlinks(config.follow_symlinks)
    }

    /// Tracker for the diff selection of a configured tree
    pub fn for_diff(config: &TreeConfig) -> Self {
        Self::new(&config.root_path)
            .with_include_patterns(config.diff_patterns.clone())
            .with_exclude_patterns(config.exclude_patterns.clone())
            .with_skip_dir(&config.backup_dir)
            .with_follow_symlinks(config.follow_symlinks)
    }

    /// Set include patterns
    pub fn with_include_patterns(mut self, patterns: Vec<String>) -> Self {
        self.include_patterns = patterns;
        self
    }

    /// Set exclude patterns
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    /// Never descend into this directory (relative to the root)
    pub fn with_skip_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.skip_dirs.push(dir.as_ref().to_path_buf());
        self
    }

    /// Set symbolic link following behavior
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Fail on walk errors instead of logging and skipping them
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Scan the tree
    ///
    /// A missing root yields an empty selection. Unreadable entries below the
    /// root are logged and skipped unless the tracker is strict.
    ///
    /// # Returns
    ///
    /// Selected files sorted by relative path.
    ///
    /// # Errors
    ///
    /// - [`MigratusError::InvalidPattern`](crate::error::MigratusError::InvalidPattern)
    ///   if a glob fails to compile
    /// - [`MigratusError::WalkDir`](crate::error::MigratusError::WalkDir)
    ///   on an unreadable entry when strict
    pub fn scan(&self) -> Result<Vec<TrackedFile>> {
        let start = Instant::now();
        let include = compile_globset(&self.include_patterns)?;
        let exclude = compile_globset(&self.exclude_patterns)?;

        if !self.root_path.is_dir() {
            debug!("Scan root {:?} does not exist, selecting nothing", self.root_path);
            return Ok(Vec::new());
        }

        let skip_dirs: Vec<PathBuf> = self.skip_dirs.iter().map(|d| self.root_path.join(d)).collect();
        let walker = WalkDir::new(&self.root_path)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| !skip_dirs.iter().any(|skip| entry.path() == skip));

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if self.strict => return Err(e.into()),
                Err(e) => {
                    warn!("Walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = utils::make_relative(entry.path(), &self.root_path)?;
            let rel_path = utils::normalize_rel_path(&relative);
            if !include.is_match(&rel_path) || exclude.is_match(&rel_path) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            trace!("Selected {} ({} bytes)", rel_path, size);
            files.push(TrackedFile {
                rel_path,
                path: entry.path().to_path_buf(),
                size,
            });
        }

        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        debug!(
            "Scanned {:?}: {} files selected in {:?}",
            self.root_path,
            files.len(),
            start.elapsed()
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigratusError;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_file_tracker_scan() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "CLAUDE.md", "# Instructions");
        write(root, ".claude/settings.json", "{}");
        write(root, ".claude/commands/build.md", "build");
        write(root, ".claude/commands/nested/test.md", "test");
        write(root, "notes.txt", "ignored");

        let config = TreeConfig::new(root);
        let files = FileTracker::for_backup(&config).scan().unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();

        assert_eq!(
            paths,
            vec![
                ".claude/commands/build.md",
                ".claude/commands/nested/test.md",
                ".claude/settings.json",
                "CLAUDE.md",
            ]
        );
    }

    #[test]
    fn test_excludes_win_over_includes() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, ".claude/settings.json", "{}");
        write(root, ".claude/settings.local.json", "{}");
        write(root, ".claude/commands/node_modules/x.md", "x");

        let tracker = FileTracker::new(root)
            .with_include_patterns(vec![".claude/**".to_string()])
            .with_exclude_patterns(vec![
                ".claude/settings.local.json".to_string(),
                "**/node_modules/**".to_string(),
            ]);
        let files = tracker.scan().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, ".claude/settings.json");
    }

    #[test]
    fn test_backup_dir_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "CLAUDE.md", "x");
        write(root, ".claude/backups/.claude/commands/old.md", "old");

        let config = TreeConfig::new(root);
        let tracker = FileTracker::for_backup(&config).with_include_patterns(vec!["**/*.md".to_string()]);
        let files = tracker.scan().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "CLAUDE.md");
    }

    #[test]
    fn test_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let files = FileTracker::new(temp_dir.path().join("missing"))
            .with_include_patterns(vec!["**".to_string()])
            .scan()
            .unwrap();
        assert!(files.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_strict_scan_fails_on_walk_errors() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "CLAUDE.md", "x");
        write(root, ".claude/commands/build.md", "build");
        std::os::unix::fs::symlink(root, root.join(".claude/commands/loop")).unwrap();

        let lenient = FileTracker::new(root)
            .with_include_patterns(vec!["**/*.md".to_string()])
            .with_follow_symlinks(true);
        assert_eq!(lenient.scan().unwrap().len(), 2);

        let strict = lenient.with_strict(true);
        assert!(matches!(strict.scan(), Err(MigratusError::WalkDir(_))));
    }
}
