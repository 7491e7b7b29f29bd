//! Common types and data structures for migratus
//!
//! This module holds the records that cross component boundaries and are
//! handed to collaborators (CLI, reporting):
//!
//! - **Result records**: [`MigrationStatus`], [`MigrationResult`], [`Migrator`]
//! - **Change vocabulary**: [`ChangeType`], [`ImpactLevel`], [`ConfigChange`],
//!   [`ChangeSummary`]
//! - **Line diffs**: [`DiffOptions`]
//!
//! All of them serialize with serde so they can be rendered as JSON without
//! any presentation code in the library.

use crate::error::MigratusError;
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a migration-style operation
///
/// Runs move `Pending → InProgress → {Success | Failed | RollbackRequired}`
/// and never leave a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Not started
    Pending,
    /// Steps are being applied
    InProgress,
    /// Completed and persisted
    Success,
    /// Failed; the tree is unchanged or was restored from backup
    Failed,
    /// Failed and the automatic rollback failed too; needs manual recovery
    RollbackRequired,
}

impl MigrationStatus {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MigrationStatus::Success | MigrationStatus::Failed | MigrationStatus::RollbackRequired
        )
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: MigrationStatus) -> bool {
        match (self, next) {
            (MigrationStatus::Pending, MigrationStatus::InProgress) => true,
            // Runs that fail validation never start
            (MigrationStatus::Pending, MigrationStatus::Failed) => true,
            (MigrationStatus::InProgress, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::InProgress => "in_progress",
            MigrationStatus::Success => "success",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RollbackRequired => "rollback_required",
        };
        f.write_str(s)
    }
}

/// Outcome of a restore, upgrade, rollback or migrate call
///
/// Display-agnostic: the CLI renders it, the library only fills it in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Final status
    pub status: MigrationStatus,
    /// One-line human summary
    pub message: String,
    /// Version before the operation
    pub source_version: Option<String>,
    /// Version the operation aimed for
    pub target_version: Option<String>,
    /// Files written or removed, relative to the tree root
    pub files_affected: Vec<PathBuf>,
    /// Backup created by (or used for) the operation
    pub backup_path: Option<PathBuf>,
    /// Errors encountered
    pub errors: Vec<String>,
    /// Non-fatal notes
    pub warnings: Vec<String>,
    /// When the result was produced
    pub timestamp: DateTime<Utc>,
}

impl MigrationResult {
    /// Create a result with the given status and message
    pub fn new(status: MigrationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source_version: None,
            target_version: None,
            files_affected: Vec::new(),
            backup_path: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Successful result
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(MigrationStatus::Success, message)
    }

    /// Failed result carrying one error
    pub fn failed(message: impl Into<String>, error: impl fmt::Display) -> Self {
        let mut result = Self::new(MigrationStatus::Failed, message);
        result.errors.push(error.to_string());
        result
    }

    /// Set source and target versions
    pub fn with_versions(mut self, source: Option<String>, target: Option<String>) -> Self {
        self.source_version = source;
        self.target_version = target;
        self
    }

    /// Set the backup path
    pub fn with_backup(mut self, path: Option<PathBuf>) -> Self {
        self.backup_path = path;
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Whether the operation succeeded
    pub fn is_success(&self) -> bool {
        self.status == MigrationStatus::Success
    }

    /// Whether any error was recorded
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether the tree needs manual recovery
    pub fn needs_rollback(&self) -> bool {
        self.status == MigrationStatus::RollbackRequired
    }
}

/// A component that can move a configuration tree between versions
///
/// Only the upgrade workflow migrates; the other managers implement this to
/// answer caller misuse with a FAILED result instead of an error.
pub trait Migrator {
    /// Migrate the tree from `source` to `target`
    fn migrate(&mut self, source: &Version, target: &Version) -> MigrationResult;

    /// Whether a migration from `source` to `target` is possible
    fn can_migrate(&self, source: &Version, target: &Version) -> bool;
}

/// Result for components that do not migrate
pub(crate) fn unsupported_migration(component: &str, source: &Version, target: &Version) -> MigrationResult {
    MigrationResult::failed(
        format!("{} does not support migration operations", component),
        MigratusError::UnsupportedOperation(format!("migrate {} -> {}", source, target)),
    )
    .with_versions(Some(source.to_string()), Some(target.to_string()))
}

/// Kind of a single configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Present only in the new tree
    Added,
    /// Present only in the old tree
    Removed,
    /// Present in both with different content
    Modified,
    /// Same content at a different path
    Moved,
    /// Both sides changed the same region
    Conflict,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Added => "added",
            ChangeType::Removed => "removed",
            ChangeType::Modified => "modified",
            ChangeType::Moved => "moved",
            ChangeType::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

/// How risky a change is to apply without review
///
/// Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    /// Cosmetic or documentation change
    Low,
    /// Generic settings change
    Medium,
    /// Security, version or environment change
    High,
    /// Server registry or critical section change
    Critical,
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImpactLevel::Low => "low",
            ImpactLevel::Medium => "medium",
            ImpactLevel::High => "high",
            ImpactLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One typed, impact-classified difference between two trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChange {
    /// What kind of change this is
    pub change_type: ChangeType,
    /// File path relative to the tree root
    pub file_path: PathBuf,
    /// Content before the change
    pub old_content: Option<String>,
    /// Content after the change
    pub new_content: Option<String>,
    /// 1-based line number for line-level changes
    pub line_number: Option<usize>,
    /// Section header, JSON path or other locator
    pub section: Option<String>,
    /// Human readable description
    pub description: String,
    /// Risk classification
    pub impact_level: ImpactLevel,
    /// Whether the change can be merged without review
    pub auto_mergeable: bool,
}

impl ConfigChange {
    /// Create a change with no content, locator or line number
    pub fn new(
        change_type: ChangeType,
        file_path: impl Into<PathBuf>,
        description: impl Into<String>,
        impact_level: ImpactLevel,
    ) -> Self {
        Self {
            change_type,
            file_path: file_path.into(),
            old_content: None,
            new_content: None,
            line_number: None,
            section: None,
            description: description.into(),
            impact_level,
            auto_mergeable: false,
        }
    }

    /// Set old and new content
    pub fn with_content(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_content = old;
        self.new_content = new;
        self
    }

    /// Set the locator
    pub fn with_section(mut self, section: Option<String>) -> Self {
        self.section = section;
        self
    }

    /// Set the line number
    pub fn with_line(mut self, line: usize) -> Self {
        self.line_number = Some(line);
        self
    }

    /// Mark as auto-mergeable or not
    pub fn mergeable(mut self, auto_mergeable: bool) -> Self {
        self.auto_mergeable = auto_mergeable;
        self
    }
}

/// Counts per change type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeTypeCounts {
    /// Added changes
    pub added: usize,
    /// Removed changes
    pub removed: usize,
    /// Modified changes
    pub modified: usize,
    /// Moved changes
    pub moved: usize,
    /// Conflict changes
    pub conflicts: usize,
}

/// Counts per impact level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactCounts {
    /// Critical changes
    pub critical: usize,
    /// High impact changes
    pub high: usize,
    /// Medium impact changes
    pub medium: usize,
    /// Low impact changes
    pub low: usize,
}

/// Aggregate view of a change set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Number of changes
    pub total_changes: usize,
    /// Counts by change type
    pub by_type: ChangeTypeCounts,
    /// Counts by impact level
    pub by_impact: ImpactCounts,
    /// Changes that can be merged automatically
    pub auto_mergeable: usize,
    /// Changes that need review
    pub requires_review: usize,
}

impl ChangeSummary {
    /// Build a summary from a list of changes
    pub fn from_changes<'a>(changes: impl IntoIterator<Item = &'a ConfigChange>) -> Self {
        let mut summary = ChangeSummary::default();
        for change in changes {
            summary.total_changes += 1;
            match change.change_type {
                ChangeType::Added => summary.by_type.added += 1,
                ChangeType::Removed => summary.by_type.removed += 1,
                ChangeType::Modified => summary.by_type.modified += 1,
                ChangeType::Moved => summary.by_type.moved += 1,
                ChangeType::Conflict => summary.by_type.conflicts += 1,
            }
            match change.impact_level {
                ImpactLevel::Critical => summary.by_impact.critical += 1,
                ImpactLevel::High => summary.by_impact.high += 1,
                ImpactLevel::Medium => summary.by_impact.medium += 1,
                ImpactLevel::Low => summary.by_impact.low += 1,
            }
            if change.auto_mergeable {
                summary.auto_mergeable += 1;
            } else {
                summary.requires_review += 1;
            }
        }
        summary
    }

    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.total_changes == 0
    }
}

/// Options for line-level diffs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Compare lines with surrounding whitespace trimmed
    pub ignore_whitespace: bool,
}

/// Serde helpers for timestamps written by older tooling
///
/// Writes RFC 3339. Reads RFC 3339, or a naive ISO-8601 timestamp which is
/// taken as UTC.
pub(crate) mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
