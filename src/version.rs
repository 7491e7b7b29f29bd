//! Semantic versions and the upgrade catalog
//!
//! [`Version`] parses `major.minor.patch[-prerelease][+build]` and orders
//! versions by `(major, minor, patch)` first. A release is greater than any
//! pre-release of the same triple. Pre-release tags compare as plain strings,
//! so `1.0.0-rc.10 < 1.0.0-rc.9`. Build metadata never affects equality or
//! ordering.
//!
//! [`VersionCatalog`] is the ordered list of versions an upgrade can target.
//!
//! ```rust
//! use migratus::Version;
//!
//! let stable: Version = "1.2.0".parse().unwrap();
//! let rc: Version = "1.2.0-rc.1".parse().unwrap();
//! assert!(rc < stable);
//! assert_eq!(stable.to_string(), "1.2.0");
//! ```

use crate::error::{MigratusError, Result};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;

fn version_regex() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex_lite::Error>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-([a-zA-Z0-9\-.]+))?(?:\+([a-zA-Z0-9\-.]+))?$")
    })
    .as_ref()
    .map_err(|e| MigratusError::internal(format!("version pattern: {}", e)))
}

/// A semantic version
///
/// Immutable once constructed; the `with_*` methods return new values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    pre_release: Option<String>,
    build_metadata: Option<String>,
}

impl Version {
    /// Release version `major.minor.patch`
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
            build_metadata: None,
        }
    }

    /// Parse a version string
    ///
    /// Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// - [`MigratusError::InvalidVersionFormat`] for anything that is not
    ///   `major.minor.patch[-prerelease][+build]`
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let invalid = || MigratusError::InvalidVersionFormat(text.to_string());
        let caps = version_regex()?.captures(trimmed).ok_or_else(invalid)?;

        let number = |idx: usize| -> Result<u64> {
            caps.get(idx)
                .ok_or_else(invalid)?
                .as_str()
                .parse::<u64>()
                .map_err(|_| invalid())
        };

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            pre_release: caps.get(4).map(|m| m.as_str().to_string()),
            build_metadata: caps.get(5).map(|m| m.as_str().to_string()),
        })
    }

    /// Copy with a pre-release tag
    pub fn with_pre_release(&self, tag: impl Into<String>) -> Self {
        Self {
            pre_release: Some(tag.into()),
            ..self.clone()
        }
    }

    /// Copy with build metadata
    pub fn with_build_metadata(&self, build: impl Into<String>) -> Self {
        Self {
            build_metadata: Some(build.into()),
            ..self.clone()
        }
    }

    /// Major component
    pub fn major(&self) -> u64 {
        self.major
    }

    /// Minor component
    pub fn minor(&self) -> u64 {
        self.minor
    }

    /// Patch component
    pub fn patch(&self) -> u64 {
        self.patch
    }

    /// Pre-release tag, if any
    pub fn pre_release(&self) -> Option<&str> {
        self.pre_release.as_deref()
    }

    /// Build metadata, if any
    pub fn build_metadata(&self) -> Option<&str> {
        self.build_metadata.as_deref()
    }

    /// Whether this is a pre-release
    pub fn is_pre_release(&self) -> bool {
        self.pre_release.is_some()
    }

    /// Same major version
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.pre_release.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{}", pre)?;
        }
        if let Some(build) = &self.build_metadata {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = MigratusError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = MigratusError;

    fn try_from(value: String) -> Result<Self> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

/// A catalog entry: a version that can be upgraded to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// The version
    pub version: Version,
    /// What the version introduced
    pub description: String,
}

/// Ordered list of known versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCatalog {
    entries: Vec<CatalogEntry>,
}

impl VersionCatalog {
    /// Build a catalog; entries are sorted ascending and de-duplicated
    pub fn new(mut entries: Vec<CatalogEntry>) -> Self {
        entries.sort_by(|a, b| a.version.cmp(&b.version));
        entries.dedup_by(|a, b| a.version == b.version);
        Self { entries }
    }

    /// Highest version
    pub fn latest(&self) -> Option<&CatalogEntry> {
        self.entries.last()
    }

    /// Smallest version strictly greater than `current`
    pub fn next_after(&self, current: &Version) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.version > *current)
    }

    /// Entry for an exact version
    pub fn get(&self, version: &Version) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.version == *version)
    }

    /// Entries in ascending order
    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for VersionCatalog {
    fn default() -> Self {
        let entry = |major, minor, patch, description: &str| CatalogEntry {
            version: Version::new(major, minor, patch),
            description: description.to_string(),
        };
        Self::new(vec![
            entry(1, 0, 0, "Initial template version"),
            entry(1, 1, 0, "Added persona support and improved MCP configuration"),
            entry(1, 2, 0, "Enhanced security settings and validation"),
            entry(2, 0, 0, "Major restructure with new command system"),
            entry(2, 0, 1, "Enhanced validation and migration system"),
        ])
    }
}
