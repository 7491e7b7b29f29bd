//! Configuration tree layout
//!
//! A [`TreeConfig`] describes what "the configuration" of a project is: where
//! the tree lives, which files belong to it, where backups are kept and which
//! names carry special meaning (version marker, metadata record, instructions
//! document, settings file, server registry).
//!
//! The defaults describe the standard layout:
//!
//! ```text
//! <root>/
//! ├── CLAUDE.md                  instructions document
//! ├── .mcp.json
//! ├── .version                   version marker
//! ├── .metadata.json             metadata record
//! └── .claude/
//!     ├── settings.json          structured settings
//!     ├── commands/**/*.md
//!     ├── personas/**/*.md
//!     └── backups/               backup store (never backed up itself)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use migratus::TreeConfigBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TreeConfigBuilder::new()
//!     .backup_dir(".migratus/backups")
//!     .add_exclude_pattern("**/*.bak")
//!     .build("./my_project")?;
//!
//! config.save("./my_project/migratus.json")?;
//! # Ok(())
//! # }
//! ```

use crate::error::{MigratusError, Result};
use crate::utils;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files included in backups by default
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[
    "CLAUDE.md",
    ".mcp.json",
    ".claude/settings.json",
    ".claude/settings.local.json.example",
    ".claude/commands/**/*.md",
    ".claude/personas/**/*.md",
    ".version",
    ".metadata.json",
];

/// Files excluded from backups by default
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    ".claude/backups/**",
    ".claude/settings.local.json",
    ".claude/.cache/**",
    "**/__pycache__/**",
    "**/*.pyc",
    "**/node_modules/**",
];

/// Files whose paths and bytes feed the tree checksum
pub const DEFAULT_CHECKSUM_PATTERNS: &[&str] = &[
    "CLAUDE.md",
    ".claude/settings.json",
    ".claude/commands/**/*.md",
];

/// Files compared by the diff engine and conflict detection
pub const DEFAULT_DIFF_PATTERNS: &[&str] = &[
    "CLAUDE.md",
    ".mcp.json",
    "*.yml",
    "*.yaml",
    ".claude/settings.json",
    ".claude/commands/**/*.md",
    ".claude/personas/**/*.md",
];

/// Section names whose changes are always critical
pub const DEFAULT_CRITICAL_SECTIONS: &[&str] = &[
    "Core Configuration",
    "MCP Integration",
    "Security Standards",
    "mcpServers",
];

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Layout and file-selection rules for one configuration tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Root of the configuration tree
    pub root_path: PathBuf,
    /// Backup store, relative to the root
    pub backup_dir: PathBuf,
    /// Globs selecting the files that make up a backup
    pub include_patterns: Vec<String>,
    /// Globs removed from every file selection
    pub exclude_patterns: Vec<String>,
    /// Globs selecting the files hashed into the tree checksum
    pub checksum_patterns: Vec<String>,
    /// Globs selecting the files compared by diff and conflict detection
    pub diff_patterns: Vec<String>,
    /// Single-line version marker
    pub version_file: PathBuf,
    /// Persisted [`ConfigMetadata`](crate::version_manager::ConfigMetadata) record
    pub metadata_file: PathBuf,
    /// Main instructions document
    pub instructions_file: PathBuf,
    /// Structured settings file
    pub settings_file: PathBuf,
    /// Key of the external server registry inside structured files
    pub server_registry_key: String,
    /// Product name used in "<product> vX.Y.Z" banners of the instructions document
    pub product_name: String,
    /// Section names treated as critical
    pub critical_sections: Vec<String>,
    /// Follow symbolic links while scanning
    pub follow_symlinks: bool,
    /// Files larger than this are compared without line detail (0 = unlimited)
    pub max_diff_file_size: u64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
            backup_dir: PathBuf::from(".claude/backups"),
            include_patterns: to_strings(DEFAULT_INCLUDE_PATTERNS),
            exclude_patterns: to_strings(DEFAULT_EXCLUDE_PATTERNS),
            checksum_patterns: to_strings(DEFAULT_CHECKSUM_PATTERNS),
            diff_patterns: to_strings(DEFAULT_DIFF_PATTERNS),
            version_file: PathBuf::from(".version"),
            metadata_file: PathBuf::from(".metadata.json"),
            instructions_file: PathBuf::from("CLAUDE.md"),
            settings_file: PathBuf::from(".claude/settings.json"),
            server_registry_key: "mcpServers".to_string(),
            product_name: "SuperClaude".to_string(),
            critical_sections: to_strings(DEFAULT_CRITICAL_SECTIONS),
            follow_symlinks: false,
            max_diff_file_size: 10 * 1024 * 1024,
        }
    }
}

impl TreeConfig {
    /// Default layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults. A relative `root_path` is
    /// resolved against the directory containing the file.
    ///
    /// # Errors
    ///
    /// - [`MigratusError::Io`] if the file cannot be read
    /// - [`MigratusError::Json`] if it is not valid JSON
    /// - [`MigratusError::InvalidConfiguration`] if validation fails
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config: TreeConfig = serde_json::from_str(&content)?;

        if config.root_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.root_path = dir.join(&config.root_path);
            }
        }

        config.validate()?;
        debug!("Loaded tree configuration from {:?}", path);
        Ok(config)
    }

    /// Write this configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        utils::atomic_write(path.as_ref(), json.as_bytes())
    }

    /// Check the configuration for obvious mistakes
    ///
    /// # Errors
    ///
    /// - [`MigratusError::InvalidConfiguration`] for an empty include set, an
    ///   absolute pattern, or a backup directory outside the root
    /// - [`MigratusError::InvalidPattern`] if any glob fails to compile
    pub fn validate(&self) -> Result<()> {
        if self.include_patterns.is_empty() {
            return Err(MigratusError::InvalidConfiguration(
                "include_patterns must not be empty".to_string(),
            ));
        }

        let all_patterns = self
            .include_patterns
            .iter()
            .chain(&self.exclude_patterns)
            .chain(&self.checksum_patterns)
            .chain(&self.diff_patterns);
        for pattern in all_patterns {
            if pattern.starts_with('/') {
                return Err(MigratusError::InvalidConfiguration(format!(
                    "pattern '{}' must be relative to the tree root",
                    pattern
                )));
            }
            compile_glob(pattern)?;
        }

        if !utils::is_contained_relative(&self.backup_dir) {
            return Err(MigratusError::InvalidConfiguration(format!(
                "backup_dir {:?} must be a relative path inside the tree",
                self.backup_dir
            )));
        }

        Ok(())
    }

    /// Absolute path of the backup store
    pub fn backups_path(&self) -> PathBuf {
        self.root_path.join(&self.backup_dir)
    }

    /// Absolute path of the version marker
    pub fn version_path(&self) -> PathBuf {
        self.root_path.join(&self.version_file)
    }

    /// Absolute path of the metadata record
    pub fn metadata_path(&self) -> PathBuf {
        self.root_path.join(&self.metadata_file)
    }

    /// Absolute path of the instructions document
    pub fn instructions_path(&self) -> PathBuf {
        self.root_path.join(&self.instructions_file)
    }

    /// Absolute path of the settings file
    pub fn settings_path(&self) -> PathBuf {
        self.root_path.join(&self.settings_file)
    }

    /// Same layout rooted somewhere else
    ///
    /// Used to scan a second tree (e.g. a template) with identical rules.
    pub fn rebased(&self, root: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root.into(),
            ..self.clone()
        }
    }
}

/// Compile a single glob with `*` confined to one path component
pub(crate) fn compile_glob(pattern: &str) -> Result<Glob> {
    Ok(GlobBuilder::new(pattern).literal_separator(true).build()?)
}

/// Compile a list of globs into one matcher
pub(crate) fn compile_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_glob(pattern)?);
    }
    Ok(builder.build()?)
}

/// Builder for [`TreeConfig`]
///
/// Starts from the default layout; every setter replaces one field.
///
/// # Default Values
///
/// - `backup_dir`: `.claude/backups`
/// - `include_patterns`: [`DEFAULT_INCLUDE_PATTERNS`]
/// - `exclude_patterns`: [`DEFAULT_EXCLUDE_PATTERNS`]
/// - `server_registry_key`: `mcpServers`
#[derive(Debug, Default)]
pub struct TreeConfigBuilder {
    config: TreeConfig,
}

impl TreeConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backup store location (relative to the root)
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.backup_dir = dir.into();
        self
    }

    /// Replace the backup include globs
    pub fn include_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.include_patterns = patterns;
        self
    }

    /// Replace the exclude globs
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.exclude_patterns = patterns;
        self
    }

    /// Add one exclude glob
    pub fn add_exclude_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.exclude_patterns.push(pattern.into());
        self
    }

    /// Replace the checksum globs
    pub fn checksum_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.checksum_patterns = patterns;
        self
    }

    /// Replace the diff globs
    pub fn diff_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.diff_patterns = patterns;
        self
    }

    /// Set the version marker file name
    pub fn version_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.version_file = path.into();
        self
    }

    /// Set the metadata record file name
    pub fn metadata_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.metadata_file = path.into();
        self
    }

    /// Set the instructions document path
    pub fn instructions_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.instructions_file = path.into();
        self
    }

    /// Set the structured settings path
    pub fn settings_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.settings_file = path.into();
        self
    }

    /// Set the server registry key
    pub fn server_registry_key(mut self, key: impl Into<String>) -> Self {
        self.config.server_registry_key = key.into();
        self
    }

    /// Set the product name used for banner version detection
    pub fn product_name(mut self, name: impl Into<String>) -> Self {
        self.config.product_name = name.into();
        self
    }

    /// Replace the critical section names
    pub fn critical_sections(mut self, sections: Vec<String>) -> Self {
        self.config.critical_sections = sections;
        self
    }

    /// Follow symbolic links while scanning
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.config.follow_symlinks = follow;
        self
    }

    /// Limit for line-level diffing (0 = unlimited)
    pub fn max_diff_file_size(mut self, size: u64) -> Self {
        self.config.max_diff_file_size = size;
        self
    }

    /// Finish the configuration for the tree at `root`
    ///
    /// # Errors
    ///
    /// Returns the first validation failure, see [`TreeConfig::validate`].
    pub fn build(self, root: impl Into<PathBuf>) -> Result<TreeConfig> {
        let mut config = self.config;
        config.root_path = root.into();
        config.validate()?;
        Ok(config)
    }
}
