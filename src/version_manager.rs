//! Version detection, checksums and metadata persistence
//!
//! [`VersionManager`] answers "which version is this configuration tree, and
//! has it drifted since we last recorded it?".
//!
//! ## Version detection
//!
//! Sources are tried in order, the first hit wins:
//!
//! 1. **Marker**: the single-line version file (`.version`)
//! 2. **Instructions**: heuristic matches in the instructions document such
//!    as `Version: 1.2.0` or `SuperClaude v1.2.0`. A match is ignored when the
//!    50 characters around it look like documentation of the version format
//!    ("e.g.", "example", "format:", "such as", ...)
//! 3. **Settings**: a top-level `"version"` string in the settings file
//!
//! ## Checksum
//!
//! SHA-256 over every tracked file: for each file in relative-path order the
//! path bytes are hashed, then the file bytes. The digest only depends on
//! tracked paths and content, never on traversal order or timestamps.
//!
//! ## Metadata
//!
//! [`ConfigMetadata`] is persisted as JSON next to the marker:
//!
//! ```json
//! {
//!   "version": "1.2.0",
//!   "created_at": "2024-05-01T10:00:00+00:00",
//!   "updated_at": "2024-05-02T08:30:00+00:00",
//!   "checksum": "9f86d0...",
//!   "template_type": "default",
//!   "dependencies": [],
//!   "author": null,
//!   "description": null
//! }
//! ```

use crate::config::TreeConfig;
use crate::error::Result;
use crate::file_tracking::FileTracker;
use crate::types::lenient_timestamp;
use crate::utils;
use crate::version::Version;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use regex_lite::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fs;
use tracing::{debug, info, instrument, warn};

/// Phrases that mark a version-looking string as documentation, not a declaration
const DOC_INDICATORS: &[&str] = &[
    "semantic versioning",
    "version tagging",
    "example",
    "e.g.",
    "for example",
    "(v1.2.3)",
    "format:",
    "like:",
    "such as",
];

/// Characters inspected on each side of a heuristic match
const CONTEXT_WINDOW: usize = 50;

/// Where a detected version came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    /// The dedicated version marker file
    Marker,
    /// Heuristic match in the instructions document
    Instructions,
    /// `version` field of the settings file
    Settings,
}

/// Persisted description of a configuration tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Version of the tree
    pub version: Version,
    /// When the record was first written
    #[serde(with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
    /// When the record was last refreshed
    #[serde(with = "lenient_timestamp")]
    pub updated_at: DateTime<Utc>,
    /// Tree checksum at `updated_at`
    pub checksum: String,
    /// Template the tree was created from
    #[serde(default = "default_template_type")]
    pub template_type: String,
    /// Declared dependencies
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Author, if recorded
    #[serde(default)]
    pub author: Option<String>,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
}

fn default_template_type() -> String {
    "default".to_string()
}

/// Version detection and metadata bookkeeping for one tree
#[derive(Debug, Clone)]
pub struct VersionManager {
    config: TreeConfig,
    patterns: Vec<Regex>,
}

impl VersionManager {
    /// Create a manager for the configured tree
    ///
    /// # Errors
    ///
    /// - [`MigratusError::Regex`] if the product name produces an invalid pattern
    pub fn new(config: TreeConfig) -> Result<Self> {
        let declared = RegexBuilder::new(
            r"version[:\s]+v?(\d+\.\d+\.\d+(?:-[a-zA-Z0-9\-.]+)?(?:\+[a-zA-Z0-9\-.]+)?)",
        )
        .case_insensitive(true)
        .build()?;
        let banner = RegexBuilder::new(&format!(
            r"{} v(\d+\.\d+\.\d+)",
            regex_lite::escape(&config.product_name)
        ))
        .case_insensitive(true)
        .build()?;

        Ok(Self {
            config,
            patterns: vec![declared, banner],
        })
    }

    /// Tree configuration
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Parse a version string
    pub fn parse_version(&self, text: &str) -> Result<Version> {
        Version::parse(text)
    }

    /// Detect the tree's current version
    ///
    /// Returns `None` when no source yields a valid version.
    pub fn detect_current_version(&self) -> Option<Version> {
        self.detect_current_version_with_source().map(|(v, _)| v)
    }

    /// Detect the tree's current version and report which source supplied it
    pub fn detect_current_version_with_source(&self) -> Option<(Version, VersionSource)> {
        if let Some(version) = self.version_from_marker() {
            return Some((version, VersionSource::Marker));
        }
        if let Some(version) = self.version_from_instructions() {
            return Some((version, VersionSource::Instructions));
        }
        if let Some(version) = self.version_from_settings() {
            return Some((version, VersionSource::Settings));
        }
        debug!("No version found in {:?}", self.config.root_path);
        None
    }

    fn version_from_marker(&self) -> Option<Version> {
        let path = self.config.version_path();
        let content = fs::read_to_string(&path).ok()?;
        match Version::parse(&content) {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("Ignoring version marker {:?}: {}", path, e);
                None
            }
        }
    }

    fn version_from_instructions(&self) -> Option<Version> {
        let content = fs::read_to_string(self.config.instructions_path()).ok()?;
        self.extract_declared_version(&content)
    }

    /// Find a declared version in free text, skipping documentation examples
    pub fn extract_declared_version(&self, content: &str) -> Option<Version> {
        for pattern in &self.patterns {
            for caps in pattern.captures_iter(content) {
                let (Some(whole), Some(group)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let context = surrounding(content, whole.start(), whole.end()).to_lowercase();
                if DOC_INDICATORS.iter().any(|cue| context.contains(cue)) {
                    debug!("Skipping documentation example '{}'", whole.as_str());
                    continue;
                }
                if let Ok(version) = Version::parse(group.as_str()) {
                    return Some(version);
                }
            }
        }
        None
    }

    fn version_from_settings(&self) -> Option<Version> {
        let content = fs::read_to_string(self.config.settings_path()).ok()?;
        let value: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                debug!("Settings file is not valid JSON: {}", e);
                return None;
            }
        };
        value
            .get("version")
            .and_then(|v| v.as_str())
            .and_then(|s| Version::parse(s).ok())
    }

    /// Write the version marker
    pub fn save_version(&self, version: &Version) -> Result<()> {
        let content = format!("{}\n", version);
        utils::atomic_write(&self.config.version_path(), content.as_bytes())?;
        info!(version = %version, "Saved version marker");
        Ok(())
    }

    /// Compute the tree checksum
    ///
    /// # Errors
    ///
    /// - [`MigratusError::Io`] if a tracked file cannot be read
    /// - [`MigratusError::InvalidPattern`] if a checksum glob is invalid
    #[instrument(skip(self), fields(root = ?self.config.root_path))]
    pub fn calculate_checksum(&self) -> Result<String> {
        let files = FileTracker::for_checksum(&self.config).scan()?;

        // Reads run in parallel; the collected order is the sorted scan order
        let contents: Vec<(String, Vec<u8>)> = files
            .par_iter()
            .map(|file| Ok((file.rel_path.clone(), fs::read(&file.path)?)))
            .collect::<Result<_>>()?;

        let mut hasher = Sha256::new();
        for (rel_path, bytes) in &contents {
            hasher.update(rel_path.as_bytes());
            hasher.update(bytes);
        }
        let checksum = hex::encode(hasher.finalize());
        debug!(files = contents.len(), %checksum, "Computed tree checksum");
        Ok(checksum)
    }

    /// Load the persisted metadata
    ///
    /// Returns `None` when the record is missing or unreadable; corruption is
    /// logged.
    pub fn load_metadata(&self) -> Option<ConfigMetadata> {
        let path = self.config.metadata_path();
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Ignoring corrupt metadata {:?}: {}", path, e);
                None
            }
        }
    }

    /// Persist metadata
    pub fn save_metadata(&self, metadata: &ConfigMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        utils::atomic_write(&self.config.metadata_path(), json.as_bytes())
    }

    /// Create and persist a fresh metadata record for the current tree
    pub fn create_metadata(
        &self,
        version: Version,
        template_type: impl Into<String>,
        author: Option<String>,
        description: Option<String>,
    ) -> Result<ConfigMetadata> {
        let now = Utc::now();
        let metadata = ConfigMetadata {
            version,
            created_at: now,
            updated_at: now,
            checksum: self.calculate_checksum()?,
            template_type: template_type.into(),
            dependencies: Vec::new(),
            author,
            description,
        };
        self.save_metadata(&metadata)?;
        info!(version = %metadata.version, "Created configuration metadata");
        Ok(metadata)
    }

    /// Refresh timestamp and checksum of an existing record and persist it
    pub fn update_metadata(&self, mut metadata: ConfigMetadata) -> Result<ConfigMetadata> {
        metadata.updated_at = Utc::now();
        metadata.checksum = self.calculate_checksum()?;
        self.save_metadata(&metadata)?;
        debug!(version = %metadata.version, "Refreshed configuration metadata");
        Ok(metadata)
    }

    /// Compare two versions
    pub fn compare_versions(&self, a: &Version, b: &Version) -> Ordering {
        a.cmp(b)
    }

    /// Hops needed to go from `source` to `target`
    ///
    /// Empty when they are equal, otherwise the single direct hop.
    pub fn migration_path(&self, source: &Version, target: &Version) -> Vec<(Version, Version)> {
        if source == target {
            Vec::new()
        } else {
            vec![(source.clone(), target.clone())]
        }
    }

    /// Whether the tree needs a migration
    ///
    /// True when no version is detected, no metadata is persisted, or the
    /// tree checksum differs from the recorded one.
    pub fn is_migration_needed(&self) -> Result<bool> {
        if self.detect_current_version().is_none() {
            return Ok(true);
        }
        let Some(metadata) = self.load_metadata() else {
            return Ok(true);
        };
        Ok(self.calculate_checksum()? != metadata.checksum)
    }
}

/// Slice up to `CONTEXT_WINDOW` characters on each side of `start..end`
fn surrounding(content: &str, start: usize, end: usize) -> &str {
    let from = content[..start]
        .char_indices()
        .rev()
        .nth(CONTEXT_WINDOW - 1)
        .map_or(0, |(i, _)| i);
    let to = content[end..]
        .char_indices()
        .nth(CONTEXT_WINDOW)
        .map_or(content.len(), |(i, _)| end + i);
    &content[from..to]
}
