//! Conflict detection and resolution between a local and a remote tree
//!
//! When a template upgrade collides with local customization, the
//! [`ConflictResolver`] finds every region where the two trees disagree and
//! proposes a resolution for each one.
//!
//! ## Detection
//!
//! | File kind   | Conflict                 | Auto-resolvable when                         |
//! |-------------|--------------------------|----------------------------------------------|
//! | JSON        | `json_merge` per key     | key on one side only, or arrays are subsets  |
//! | JSON        | `structure` (whole file) | never; exactly one side fails to parse       |
//! | Markdown    | `section` per section    | one side empty, or word Jaccard > 0.8        |
//! | other text  | `content` (whole file)   | a side has < 3 lines, or line Jaccard > 0.8  |
//!
//! ## Resolution
//!
//! Each [`ConflictType`] has an ordered table of [`ResolutionStrategy`]s.
//! Without an explicit strategy every registered one runs and the highest
//! [`Confidence`] wins, the earlier registration winning ties. If none
//! produces a result the conflict falls back to manual review, keeping the
//! local content.
//!
//! [`ConflictResolver::resolve_all`] writes a resolution only when
//! auto-resolve is enabled, the resolution needs no review and its
//! confidence is at least [`AUTO_APPLY_THRESHOLD`]. Writes touch only the
//! located region (whole file, one section, or one JSON key) and keep a
//! single `<file>.conflict_backup` copy of the original.
//!
//! ## Example
//!
//! ```rust,no_run
//! use migratus::{ConflictResolver, TreeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = ConflictResolver::new(TreeConfig::new("./project"));
//! let conflicts = resolver.detect_conflicts("./project".as_ref(), "./template".as_ref())?;
//!
//! let report = resolver.resolve_all(&conflicts, true);
//! println!(
//!     "{} resolved automatically, {} need review",
//!     report.auto_resolved, report.manual_required
//! );
//! # Ok(())
//! # }
//! ```

use crate::config::TreeConfig;
use crate::diff::{edit_script, LineEdit};
use crate::document::{line_similarity, word_similarity, DocumentKind, SectionedDocument};
use crate::error::{MigratusError, Result};
use crate::file_tracking::{FileTracker, TrackedFile};
use crate::structured::{self, JsonDiffKind};
use crate::types::{unsupported_migration, ChangeType, ConfigChange, ImpactLevel, MigrationResult, Migrator};
use crate::utils;
use crate::version::Version;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

/// Minimum confidence for writing a resolution without review
pub const AUTO_APPLY_THRESHOLD: f64 = 0.8;

/// Suffix of the sibling copy kept before the first applied resolution
pub const CONFLICT_BACKUP_SUFFIX: &str = "conflict_backup";

const SIMILARITY_THRESHOLD: f64 = 0.8;
const SHORT_CONTENT_LINES: usize = 3;

/// Kind of conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Whole-file text disagreement
    Content,
    /// One section of a sectioned document
    Section,
    /// One key of a structured document
    JsonMerge,
    /// A line range; never detected, only constructed by callers
    Line,
    /// One side of a structured file does not parse
    Structure,
}

impl ConflictType {
    /// Registered strategies, in tie-breaking order
    pub fn strategies(self) -> &'static [ResolutionStrategy] {
        use ResolutionStrategy::*;
        match self {
            ConflictType::Content => &[ContentMerge, PreferLocal, PreferRemote],
            ConflictType::Line => &[ContentMerge],
            ConflictType::Section => &[SectionMerge, SectionAppend],
            ConflictType::JsonMerge => &[JsonDeepMerge, JsonPreferStructure],
            ConflictType::Structure => &[PreserveBoth, PrioritizeLonger],
        }
    }

    /// Name used in reports
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictType::Content => "content",
            ConflictType::Section => "section",
            ConflictType::JsonMerge => "json_merge",
            ConflictType::Line => "line",
            ConflictType::Structure => "structure",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a conflict lives inside its file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "at")]
pub enum ConflictLocation {
    /// The whole file
    File,
    /// One section, by section key
    Section(String),
    /// One key, by object path
    JsonPath(Vec<String>),
}

impl fmt::Display for ConflictLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictLocation::File => f.write_str("<file>"),
            ConflictLocation::Section(key) => f.write_str(key),
            ConflictLocation::JsonPath(path) => f.write_str(&structured::format_path(path)),
        }
    }
}

/// A detected conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// Kind of conflict
    pub conflict_type: ConflictType,
    /// Local file the conflict applies to
    pub file_path: PathBuf,
    /// Region inside the file
    pub location: ConflictLocation,
    /// Local side; empty when absent
    pub local_content: String,
    /// Remote side; empty when absent
    pub remote_content: String,
    /// Human readable description
    pub description: String,
    /// Whether a strategy is expected to resolve it safely
    pub auto_resolvable: bool,
    /// Strategy hint from detection
    pub suggested_strategy: Option<ResolutionStrategy>,
}

impl ConflictInfo {
    /// Create a conflict with no suggestion that is not auto-resolvable
    pub fn new(
        conflict_type: ConflictType,
        file_path: impl Into<PathBuf>,
        location: ConflictLocation,
        local_content: impl Into<String>,
        remote_content: impl Into<String>,
    ) -> Self {
        Self {
            conflict_type,
            file_path: file_path.into(),
            location,
            local_content: local_content.into(),
            remote_content: remote_content.into(),
            description: String::new(),
            auto_resolvable: false,
            suggested_strategy: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set auto-resolvability and a strategy hint
    pub fn resolvable(mut self, auto_resolvable: bool, suggestion: Option<ResolutionStrategy>) -> Self {
        self.auto_resolvable = auto_resolvable;
        self.suggested_strategy = suggestion;
        self
    }
}

impl From<&ConflictInfo> for ConfigChange {
    fn from(conflict: &ConflictInfo) -> Self {
        let section = match &conflict.location {
            ConflictLocation::File => None,
            location => Some(location.to_string()),
        };
        ConfigChange::new(
            ChangeType::Conflict,
            &conflict.file_path,
            conflict.description.clone(),
            ImpactLevel::High,
        )
        .with_content(
            Some(conflict.local_content.clone()),
            Some(conflict.remote_content.clone()),
        )
        .with_section(section)
    }
}

/// A score in `[0, 1]`
///
/// Out-of-range inputs are clamped and NaN becomes 0.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    /// No confidence
    pub const ZERO: Confidence = Confidence(0.0);

    /// Clamp a raw score
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            Confidence(0.0)
        } else {
            Confidence(value.clamp(0.0, 1.0))
        }
    }

    /// Raw score
    pub fn value(self) -> f64 {
        self.0
    }

    /// Whether a resolution with this score may be written unattended
    pub fn allows_auto_apply(self) -> bool {
        self.0 >= AUTO_APPLY_THRESHOLD
    }
}

impl From<f64> for Confidence {
    fn from(value: f64) -> Self {
        Confidence::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(confidence: Confidence) -> Self {
        confidence.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// A way of resolving a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Walk both sides line by line, marking lines that cannot be matched
    ContentMerge,
    /// Keep the local side
    PreferLocal,
    /// Take the remote side
    PreferRemote,
    /// Concatenate both section bodies
    SectionMerge,
    /// Append the remote body under a marker
    SectionAppend,
    /// Recursive JSON merge
    JsonDeepMerge,
    /// Keep the structurally larger JSON value
    JsonPreferStructure,
    /// Keep both sides under a marker
    PreserveBoth,
    /// Keep the longer side
    PrioritizeLonger,
    /// Keep local and flag for review
    Manual,
}

impl ResolutionStrategy {
    /// Every strategy
    pub const ALL: [ResolutionStrategy; 10] = [
        ResolutionStrategy::ContentMerge,
        ResolutionStrategy::PreferLocal,
        ResolutionStrategy::PreferRemote,
        ResolutionStrategy::SectionMerge,
        ResolutionStrategy::SectionAppend,
        ResolutionStrategy::JsonDeepMerge,
        ResolutionStrategy::JsonPreferStructure,
        ResolutionStrategy::PreserveBoth,
        ResolutionStrategy::PrioritizeLonger,
        ResolutionStrategy::Manual,
    ];

    /// Stable name
    pub fn name(self) -> &'static str {
        match self {
            ResolutionStrategy::ContentMerge => "content_merge",
            ResolutionStrategy::PreferLocal => "prefer_local",
            ResolutionStrategy::PreferRemote => "prefer_remote",
            ResolutionStrategy::SectionMerge => "section_merge",
            ResolutionStrategy::SectionAppend => "section_append",
            ResolutionStrategy::JsonDeepMerge => "json_deep_merge",
            ResolutionStrategy::JsonPreferStructure => "json_prefer_structure",
            ResolutionStrategy::PreserveBoth => "preserve_both",
            ResolutionStrategy::PrioritizeLonger => "prioritize_longer",
            ResolutionStrategy::Manual => "manual",
        }
    }

    /// Run the strategy
    ///
    /// Returns the resolved content, its confidence and whether it still
    /// needs review, or `None` if the strategy cannot handle the input.
    fn apply(self, local: &str, remote: &str) -> Option<(String, Confidence, bool)> {
        use ResolutionStrategy::*;
        let outcome = match self {
            ContentMerge => {
                let (merged, marked) = interleave(local, remote);
                let confidence = if marked { 0.3 } else { 0.7 };
                (merged, confidence, confidence < 0.5)
            }
            PreferLocal => (local.to_string(), 0.9, false),
            PreferRemote => (remote.to_string(), 0.9, false),
            SectionMerge => {
                if local.trim().is_empty() {
                    (remote.to_string(), 1.0, false)
                } else if remote.trim().is_empty() {
                    (local.to_string(), 1.0, false)
                } else {
                    (format!("{}\n\n{}", local, remote), 0.6, true)
                }
            }
            SectionAppend => (format!("{}\n\n--- From Remote ---\n{}", local, remote), 0.8, false),
            JsonDeepMerge => {
                let merged = match (parse_side(local)?, parse_side(remote)?) {
                    (Some(l), Some(r)) => structured::pretty(&structured::deep_merge(&l, &r)),
                    (Some(l), None) => structured::pretty(&l),
                    (None, Some(r)) => structured::pretty(&r),
                    (None, None) => String::new(),
                };
                (merged, 0.8, false)
            }
            JsonPreferStructure => {
                let size = |side: &Option<Value>| side.as_ref().map_or(0, structured::complexity);
                let (l, r) = (parse_side(local)?, parse_side(remote)?);
                let chosen = if size(&l) >= size(&r) { local } else { remote };
                (chosen.to_string(), 0.7, false)
            }
            PreserveBoth => (format!("{}\n\n# Alternative structure:\n{}", local, remote), 0.6, true),
            PrioritizeLonger => {
                let chosen = if local.chars().count() >= remote.chars().count() { local } else { remote };
                (chosen.to_string(), 0.7, false)
            }
            Manual => (local.to_string(), 0.0, true),
        };
        Some((outcome.0, Confidence::new(outcome.1), outcome.2))
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = MigratusError;

    fn from_str(s: &str) -> Result<Self> {
        ResolutionStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| MigratusError::UnsupportedStrategy {
                strategy: s.to_string(),
                conflict_type: "any".to_string(),
            })
    }
}

/// `Some(None)` for an empty side, `None` if the side is not valid JSON
fn parse_side(content: &str) -> Option<Option<Value>> {
    if content.trim().is_empty() {
        return Some(None);
    }
    serde_json::from_str(content).ok().map(Some)
}

/// Merge two texts line by line
///
/// Common lines are kept once, lines unique to one side are kept in order,
/// and regions where both sides changed are emitted as `# LOCAL:` /
/// `# REMOTE:` pairs. Returns the text and whether markers were emitted.
fn interleave(local: &str, remote: &str) -> (String, bool) {
    let local_lines: Vec<&str> = local.lines().collect();
    let remote_lines: Vec<&str> = remote.lines().collect();
    let mut merged: Vec<String> = Vec::with_capacity(local_lines.len().max(remote_lines.len()));
    let mut marked = false;

    let mut pending_local: Vec<&str> = Vec::new();
    let mut pending_remote: Vec<&str> = Vec::new();

    for edit in edit_script(&local_lines, &remote_lines, false) {
        match edit {
            LineEdit::Keep { old, .. } => {
                marked |= flush_pending(&mut merged, &mut pending_local, &mut pending_remote);
                merged.push(local_lines[old].to_string());
            }
            LineEdit::Delete { old } => pending_local.push(local_lines[old]),
            LineEdit::Insert { new } => pending_remote.push(remote_lines[new]),
        }
    }
    marked |= flush_pending(&mut merged, &mut pending_local, &mut pending_remote);

    (merged.join("\n"), marked)
}

/// Emit one changed region; returns whether markers were needed
fn flush_pending<'a>(merged: &mut Vec<String>, local: &mut Vec<&'a str>, remote: &mut Vec<&'a str>) -> bool {
    let both = !local.is_empty() && !remote.is_empty();
    if both {
        merged.extend(local.iter().map(|line| format!("# LOCAL: {}", line)));
        merged.extend(remote.iter().map(|line| format!("# REMOTE: {}", line)));
    } else {
        merged.extend(local.iter().chain(remote.iter()).map(|line| line.to_string()));
    }
    local.clear();
    remote.clear();
    both
}

/// A proposed resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// The conflict being resolved
    pub conflict: ConflictInfo,
    /// Strategy that produced it
    pub strategy: ResolutionStrategy,
    /// Content to write at the conflict location
    pub resolved_content: String,
    /// Self-assessed quality
    pub confidence: Confidence,
    /// Whether a person must look at it
    pub manual_review_required: bool,
}

impl ConflictResolution {
    /// Manual fallback: keep local, confidence 0
    pub fn manual(conflict: &ConflictInfo) -> Self {
        Self {
            conflict: conflict.clone(),
            strategy: ResolutionStrategy::Manual,
            resolved_content: conflict.local_content.clone(),
            confidence: Confidence::ZERO,
            manual_review_required: true,
        }
    }

    /// Whether `resolve_all` may write this resolution unattended
    pub fn is_auto_applicable(&self) -> bool {
        !self.manual_review_required && self.confidence.allows_auto_apply()
    }
}

/// Outcome of [`ConflictResolver::resolve_all`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Conflicts processed
    pub total_conflicts: usize,
    /// Resolutions written to disk
    pub auto_resolved: usize,
    /// Conflicts left for review
    pub manual_required: usize,
    /// Conflicts whose resolution or write failed
    pub failed_resolutions: usize,
    /// Every proposed resolution, in input order
    pub resolutions: Vec<ConflictResolution>,
    /// Files written
    pub files_modified: BTreeSet<PathBuf>,
    /// Failure messages
    pub errors: Vec<String>,
}

/// Detects and resolves conflicts for one configuration layout
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    config: TreeConfig,
    keep_backups: bool,
}

impl ConflictResolver {
    /// Create a resolver using the diff globs of `config`
    pub fn new(config: TreeConfig) -> Self {
        Self {
            config,
            keep_backups: true,
        }
    }

    /// Whether to keep a `.conflict_backup` sibling before the first write
    pub fn with_backups(mut self, keep_backups: bool) -> Self {
        self.keep_backups = keep_backups;
        self
    }

    /// Tree configuration
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Find conflicts between every file present in both trees
    ///
    /// # Errors
    ///
    /// - [`MigratusError::InvalidPattern`] if a diff glob is invalid
    /// - [`MigratusError::Io`] if a selected file cannot be read
    #[instrument(skip(self))]
    pub fn detect_conflicts(&self, local_root: &Path, remote_root: &Path) -> Result<Vec<ConflictInfo>> {
        let local = self.scan(local_root)?;
        let remote = self.scan(remote_root)?;

        let pairs: Vec<(&TrackedFile, &TrackedFile)> = local
            .iter()
            .filter_map(|(rel, l)| remote.get(rel).map(|r| (l, r)))
            .collect();

        let conflicts: Vec<ConflictInfo> = pairs
            .par_iter()
            .map(|(l, r)| self.detect_file_conflicts(&l.path, &r.path))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        info!(
            files = pairs.len(),
            conflicts = conflicts.len(),
            "Detected conflicts"
        );
        Ok(conflicts)
    }

    fn scan(&self, root: &Path) -> Result<BTreeMap<String, TrackedFile>> {
        let files = FileTracker::for_diff(&self.config.rebased(root)).scan()?;
        Ok(files.into_iter().map(|f| (f.rel_path.clone(), f)).collect())
    }

    /// Find conflicts between one local file and its remote counterpart
    ///
    /// The document kind is taken from the local path. Conflicts refer to
    /// `local_file`.
    pub fn detect_file_conflicts(&self, local_file: &Path, remote_file: &Path) -> Result<Vec<ConflictInfo>> {
        let local = String::from_utf8_lossy(&fs::read(local_file)?).into_owned();
        let remote = String::from_utf8_lossy(&fs::read(remote_file)?).into_owned();
        if local == remote {
            return Ok(Vec::new());
        }

        let conflicts = match DocumentKind::from_path(local_file) {
            DocumentKind::Structured => self.structured_conflicts(local_file, &local, &remote),
            DocumentKind::Sectioned => section_conflicts(local_file, &local, &remote),
            DocumentKind::Text => vec![content_conflict(local_file, &local, &remote)],
        };
        debug!("{} conflicts in {:?}", conflicts.len(), local_file);
        Ok(conflicts)
    }

    fn structured_conflicts(&self, file: &Path, local: &str, remote: &str) -> Vec<ConflictInfo> {
        let parsed = (
            serde_json::from_str::<Value>(local),
            serde_json::from_str::<Value>(remote),
        );
        match parsed {
            (Ok(l), Ok(r)) => json_conflicts(file, &l, &r),
            (Err(e), Err(_)) => {
                warn!("Neither side of {:?} parses ({}), comparing as text", file, e);
                vec![content_conflict(file, local, remote)]
            }
            (local_parse, _) => {
                let broken = if local_parse.is_err() { "local" } else { "remote" };
                vec![ConflictInfo::new(ConflictType::Structure, file, ConflictLocation::File, local, remote)
                    .with_description(format!("The {} version is not valid JSON", broken))]
            }
        }
    }

    /// Propose a resolution
    ///
    /// With `strategy` set only that strategy runs; it must be registered for
    /// the conflict type (or be [`ResolutionStrategy::Manual`]). A strategy
    /// that cannot handle the input falls back to manual resolution.
    ///
    /// # Errors
    ///
    /// - [`MigratusError::UnsupportedStrategy`] if the named strategy is not
    ///   registered for the conflict type
    pub fn resolve(&self, conflict: &ConflictInfo, strategy: Option<ResolutionStrategy>) -> Result<ConflictResolution> {
        let registered = conflict.conflict_type.strategies();

        if let Some(strategy) = strategy {
            if strategy == ResolutionStrategy::Manual {
                return Ok(ConflictResolution::manual(conflict));
            }
            if !registered.contains(&strategy) {
                return Err(MigratusError::UnsupportedStrategy {
                    strategy: strategy.to_string(),
                    conflict_type: conflict.conflict_type.to_string(),
                });
            }
            return Ok(run_strategy(strategy, conflict).unwrap_or_else(|| {
                debug!("Strategy {} failed for {:?}, falling back to manual", strategy, conflict.file_path);
                ConflictResolution::manual(conflict)
            }));
        }

        let mut best: Option<ConflictResolution> = None;
        for &candidate in registered {
            let Some(resolution) = run_strategy(candidate, conflict) else {
                continue;
            };
            let better = match &best {
                Some(current) => resolution.confidence > current.confidence,
                None => resolution.confidence > Confidence::ZERO,
            };
            if better {
                best = Some(resolution);
            }
        }
        Ok(best.unwrap_or_else(|| ConflictResolution::manual(conflict)))
    }

    /// Resolve a batch of conflicts
    ///
    /// With `auto_resolve`, resolutions that need no review and reach
    /// [`AUTO_APPLY_THRESHOLD`] are written; everything else is counted as
    /// requiring manual review.
    #[instrument(skip(self, conflicts), fields(count = conflicts.len()))]
    pub fn resolve_all(&self, conflicts: &[ConflictInfo], auto_resolve: bool) -> ResolutionReport {
        let mut report = ResolutionReport {
            total_conflicts: conflicts.len(),
            ..Default::default()
        };

        for conflict in conflicts {
            let resolution = match self.resolve(conflict, None) {
                Ok(resolution) => resolution,
                Err(e) => {
                    report.failed_resolutions += 1;
                    report.errors.push(format!("{:?}: {}", conflict.file_path, e));
                    continue;
                }
            };

            if auto_resolve && resolution.is_auto_applicable() {
                match self.apply_resolution(&resolution) {
                    Ok(()) => {
                        report.auto_resolved += 1;
                        report.files_modified.insert(conflict.file_path.clone());
                    }
                    Err(e) => {
                        warn!("Failed to apply resolution to {:?}: {}", conflict.file_path, e);
                        report.failed_resolutions += 1;
                        report.errors.push(format!("{:?}: {}", conflict.file_path, e));
                    }
                }
            } else {
                report.manual_required += 1;
            }
            report.resolutions.push(resolution);
        }

        info!(
            auto_resolved = report.auto_resolved,
            manual = report.manual_required,
            failed = report.failed_resolutions,
            "Resolved conflicts"
        );
        report
    }

    /// Write a resolution to the conflict's file
    ///
    /// Only the located region changes. The first write to a file keeps a
    /// `<file>.conflict_backup` copy of the original.
    ///
    /// # Errors
    ///
    /// - [`MigratusError::StructuredParse`] if a JSON resolution cannot be
    ///   placed (current file or resolved value is not valid JSON)
    /// - [`MigratusError::Io`] on write failure
    pub fn apply_resolution(&self, resolution: &ConflictResolution) -> Result<()> {
        let conflict = &resolution.conflict;
        let path = &conflict.file_path;
        let current = match fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let updated = match &conflict.location {
            ConflictLocation::File => resolution.resolved_content.clone(),
            ConflictLocation::Section(key) => {
                let mut doc = SectionedDocument::parse(&current);
                doc.replace_body(key, &resolution.resolved_content);
                doc.render()
            }
            ConflictLocation::JsonPath(json_path) => {
                place_json(path, &current, json_path, &resolution.resolved_content)?
            }
        };

        if self.keep_backups && path.exists() {
            let backup = conflict_backup_path(path);
            if !backup.exists() {
                fs::copy(path, &backup)?;
                debug!("Kept original of {:?} at {:?}", path, backup);
            }
        }

        utils::atomic_write(path, updated.as_bytes())?;
        debug!(
            strategy = %resolution.strategy,
            location = %conflict.location,
            "Applied resolution to {:?}",
            path
        );
        Ok(())
    }
}

impl Migrator for ConflictResolver {
    fn migrate(&mut self, source: &Version, target: &Version) -> MigrationResult {
        unsupported_migration("ConflictResolver", source, target)
    }

    fn can_migrate(&self, _source: &Version, _target: &Version) -> bool {
        false
    }
}

fn run_strategy(strategy: ResolutionStrategy, conflict: &ConflictInfo) -> Option<ConflictResolution> {
    let (resolved_content, confidence, manual_review_required) =
        strategy.apply(&conflict.local_content, &conflict.remote_content)?;
    Some(ConflictResolution {
        conflict: conflict.clone(),
        strategy,
        resolved_content,
        confidence,
        manual_review_required,
    })
}

/// `<file>.<ext>.conflict_backup` next to `path`
pub fn conflict_backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(CONFLICT_BACKUP_SUFFIX);
    path.with_file_name(name)
}

fn place_json(file: &Path, current: &str, json_path: &[String], resolved: &str) -> Result<String> {
    let parse_error = |reason: String| MigratusError::StructuredParse {
        path: file.to_path_buf(),
        reason,
    };

    let mut document: Value = if current.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(current).map_err(|e| parse_error(e.to_string()))?
    };

    if resolved.trim().is_empty() {
        structured::remove_at_path(&mut document, json_path);
    } else {
        let value: Value = serde_json::from_str(resolved)
            .map_err(|e| parse_error(format!("resolved value is not JSON: {}", e)))?;
        structured::set_at_path(&mut document, json_path, value)?;
    }
    Ok(format!("{}\n", structured::pretty(&document)))
}

fn json_conflicts(file: &Path, local: &Value, remote: &Value) -> Vec<ConflictInfo> {
    structured::differences(local, remote)
        .into_iter()
        .map(|diff| {
            let at = structured::format_path(&diff.path);
            let local_content = diff.old.as_ref().map(structured::pretty).unwrap_or_default();
            let remote_content = diff.new.as_ref().map(structured::pretty).unwrap_or_default();
            let conflict = ConflictInfo::new(
                ConflictType::JsonMerge,
                file,
                ConflictLocation::JsonPath(diff.path.clone()),
                local_content,
                remote_content,
            );

            match (diff.kind, &diff.old, &diff.new) {
                (JsonDiffKind::Removed, ..) => conflict
                    .with_description(format!("Key '{}' exists only in the local version", at))
                    .resolvable(true, Some(ResolutionStrategy::JsonDeepMerge)),
                (JsonDiffKind::Added, ..) => conflict
                    .with_description(format!("Key '{}' exists only in the remote version", at))
                    .resolvable(true, Some(ResolutionStrategy::JsonDeepMerge)),
                (JsonDiffKind::Modified { type_changed: true }, Some(l), Some(r)) => conflict
                    .with_description(format!(
                        "Type mismatch at '{}': {} vs {}",
                        at,
                        structured::type_name(l),
                        structured::type_name(r)
                    ))
                    .resolvable(false, Some(ResolutionStrategy::JsonPreferStructure)),
                (_, Some(Value::Array(l)), Some(Value::Array(r))) => {
                    let subset = structured::is_subset(l, r) || structured::is_subset(r, l);
                    conflict
                        .with_description(format!("Array differs at '{}'", at))
                        .resolvable(subset, Some(ResolutionStrategy::JsonDeepMerge))
                }
                _ => conflict.with_description(format!("Value differs at '{}'", at)),
            }
        })
        .collect()
}

fn section_conflicts(file: &Path, local: &str, remote: &str) -> Vec<ConflictInfo> {
    let local_doc = SectionedDocument::parse(local);
    let remote_doc = SectionedDocument::parse(remote);

    let mut keys: Vec<&str> = local_doc.sections().iter().map(|s| s.key.as_str()).collect();
    keys.extend(
        remote_doc
            .sections()
            .iter()
            .map(|s| s.key.as_str())
            .filter(|k| local_doc.get(k).is_none()),
    );

    keys.into_iter()
        .filter_map(|key| {
            let local_body = local_doc.get(key).map(|s| s.body()).unwrap_or_default();
            let remote_body = remote_doc.get(key).map(|s| s.body()).unwrap_or_default();
            if local_body == remote_body {
                return None;
            }

            let one_empty = local_body.trim().is_empty() || remote_body.trim().is_empty();
            let similar = word_similarity(&local_body.to_lowercase(), &remote_body.to_lowercase())
                > SIMILARITY_THRESHOLD;
            let auto = one_empty || similar;
            Some(
                ConflictInfo::new(
                    ConflictType::Section,
                    file,
                    ConflictLocation::Section(key.to_string()),
                    local_body,
                    remote_body,
                )
                .with_description(format!("Section '{}' differs between versions", key))
                .resolvable(auto, auto.then_some(ResolutionStrategy::SectionMerge)),
            )
        })
        .collect()
}

fn content_conflict(file: &Path, local: &str, remote: &str) -> ConflictInfo {
    let short = local.lines().count() < SHORT_CONTENT_LINES || remote.lines().count() < SHORT_CONTENT_LINES;
    let auto = short || line_similarity(local, remote) > SIMILARITY_THRESHOLD;
    ConflictInfo::new(ConflictType::Content, file, ConflictLocation::File, local, remote)
        .with_description("File content differs between versions")
        .resolvable(auto, auto.then_some(ResolutionStrategy::ContentMerge))
}
