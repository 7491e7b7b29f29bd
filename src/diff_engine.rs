//! Typed change sets between two configuration trees
//!
//! [`DiffEngine::compare`] takes the union of the files selected by the
//! tree's diff globs on both sides and reports every difference as a
//! [`ConfigChange`] with an impact level and an auto-merge verdict.
//!
//! ## Comparison by document kind
//!
//! - **Structured** (`.json`): key-wise recursion, one change per differing
//!   key with a dotted locator. Unparseable JSON falls back to text.
//! - **Sectioned** (`.md`): sections present on one side become whole-section
//!   changes; shared sections with different bodies are line-diffed.
//! - **Text**: LCS line diff, each line annotated with its nearest locator.
//!
//! ## Impact
//!
//! | Locator / content                                 | Impact     |
//! |---------------------------------------------------|------------|
//! | server registry key, critical section             | `critical` |
//! | version / environment / security (JSON paths)     | `high`     |
//! | security, auth, credentials, secret, key (lines)  | `high`     |
//! | settings / config / options (JSON paths)          | `medium`   |
//! | config, setting, server, database (lines)         | `medium`   |
//! | anything else                                     | `low`      |
//!
//! ## Example
//!
//! ```rust,no_run
//! use migratus::{DiffEngine, ImpactLevel, TreeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DiffEngine::new(TreeConfig::new("./project"));
//! let changes = engine.compare("./project".as_ref(), "./template".as_ref())?;
//!
//! let summary = changes.summary();
//! println!("{} changes, {} need review", summary.total_changes, summary.requires_review);
//! for change in changes.by_impact(ImpactLevel::Critical) {
//!     println!("{}: {}", change.file_path.display(), change.description);
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::TreeConfig;
use crate::diff::{edit_script, is_binary_content, LineEdit};
use crate::document::{enclosing_locator, DocumentKind, SectionedDocument};
use crate::error::Result;
use crate::file_tracking::{FileTracker, TrackedFile};
use crate::structured::{self, JsonDiffKind};
use crate::types::{ChangeSummary, ChangeType, ConfigChange, DiffOptions, ImpactLevel};
use crate::utils;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

const HIGH_IMPACT_PATHS: &[&str] = &["version", "environment", "security"];
const MEDIUM_IMPACT_PATHS: &[&str] = &["settings", "config", "options"];
const SAFE_ADDITION_KEYS: &[&str] = &["description", "author", "tags", "metadata"];

const HIGH_IMPACT_WORDS: &[&str] = &["security", "auth", "credentials", "secret", "key"];
const MEDIUM_IMPACT_WORDS: &[&str] = &["config", "setting", "server", "database"];
const SAFE_LINE_MARKERS: &[&str] = &["#", "//", "<!--", "description", "example", "note"];

const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst"];

/// Ordered list of changes produced by one comparison
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: Vec<ConfigChange>,
}

impl ChangeSet {
    /// Wrap changes, sorting them by file while keeping in-file order
    pub fn new(mut changes: Vec<ConfigChange>) -> Self {
        changes.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Self { changes }
    }

    /// Counts by type, impact and mergeability
    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary::from_changes(&self.changes)
    }

    /// Changes at exactly `level`
    pub fn by_impact(&self, level: ImpactLevel) -> Vec<&ConfigChange> {
        self.changes.iter().filter(|c| c.impact_level == level).collect()
    }

    /// Changes that can be merged without review
    pub fn auto_mergeable(&self) -> Vec<&ConfigChange> {
        self.changes.iter().filter(|c| c.auto_mergeable).collect()
    }

    /// Changes that need review
    pub fn requires_review(&self) -> Vec<&ConfigChange> {
        self.changes.iter().filter(|c| !c.auto_mergeable).collect()
    }

    /// Changes of type [`ChangeType::Conflict`]
    pub fn conflicts(&self) -> Vec<&ConfigChange> {
        self.changes
            .iter()
            .filter(|c| c.change_type == ChangeType::Conflict)
            .collect()
    }

    /// Changes touching one file
    pub fn for_file(&self, path: &Path) -> Vec<&ConfigChange> {
        self.changes.iter().filter(|c| c.file_path == path).collect()
    }

    /// Number of changes
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether the trees were equivalent
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Iterate in order
    pub fn iter(&self) -> std::slice::Iter<'_, ConfigChange> {
        self.changes.iter()
    }

    /// All changes as a slice
    pub fn changes(&self) -> &[ConfigChange] {
        &self.changes
    }

    /// Take the changes out
    pub fn into_changes(self) -> Vec<ConfigChange> {
        self.changes
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a ConfigChange;
    type IntoIter = std::slice::Iter<'a, ConfigChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

impl IntoIterator for ChangeSet {
    type Item = ConfigChange;
    type IntoIter = std::vec::IntoIter<ConfigChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Computes change sets between configuration trees
#[derive(Debug, Clone)]
pub struct DiffEngine {
    config: TreeConfig,
    options: DiffOptions,
}

impl DiffEngine {
    /// Create an engine using the diff globs and limits of `config`
    pub fn new(config: TreeConfig) -> Self {
        Self {
            config,
            options: DiffOptions::default(),
        }
    }

    /// Set line diff options
    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    /// Tree configuration
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Compare two trees
    ///
    /// Both roots are scanned with the same diff globs. A missing root counts
    /// as an empty tree.
    ///
    /// # Arguments
    ///
    /// * `old_root` - Tree before the change (e.g. the local configuration)
    /// * `new_root` - Tree after the change (e.g. the template)
    ///
    /// # Errors
    ///
    /// - [`MigratusError::InvalidPattern`](crate::error::MigratusError::InvalidPattern)
    ///   if a diff glob is invalid
    /// - [`MigratusError::Io`](crate::error::MigratusError::Io) if a selected
    ///   file cannot be read
    #[instrument(skip(self))]
    pub fn compare(&self, old_root: &Path, new_root: &Path) -> Result<ChangeSet> {
        let start = Instant::now();
        let old_files = self.scan(old_root)?;
        let new_files = self.scan(new_root)?;

        let mut common = Vec::new();
        let mut removed = Vec::new();
        let mut added = Vec::new();
        for (rel, old) in &old_files {
            match new_files.get(rel) {
                Some(new) => common.push((old, new)),
                None => removed.push(old),
            }
        }
        for (rel, new) in &new_files {
            if !old_files.contains_key(rel) {
                added.push(new);
            }
        }

        let mut changes: Vec<ConfigChange> = common
            .par_iter()
            .map(|(old, new)| -> Result<Vec<ConfigChange>> {
                let old_bytes = fs::read(&old.path)?;
                let new_bytes = fs::read(&new.path)?;
                Ok(self.compare_contents(Path::new(&old.rel_path), &old_bytes, &new_bytes))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        changes.extend(self.file_level_changes(&removed, &added)?);

        let change_set = ChangeSet::new(changes);
        info!(
            changes = change_set.len(),
            files = old_files.len().max(new_files.len()),
            "Compared trees in {:?}",
            start.elapsed()
        );
        Ok(change_set)
    }

    fn scan(&self, root: &Path) -> Result<BTreeMap<String, TrackedFile>> {
        let files = FileTracker::for_diff(&self.config.rebased(root)).scan()?;
        Ok(files.into_iter().map(|f| (f.rel_path.clone(), f)).collect())
    }

    /// Added, removed and moved files
    fn file_level_changes(&self, removed: &[&TrackedFile], added: &[&TrackedFile]) -> Result<Vec<ConfigChange>> {
        let mut added_hashes: Vec<Option<String>> = added
            .iter()
            .map(|f| utils::hash_file_content(&f.path).map(Some))
            .collect::<Result<_>>()?;

        let mut changes = Vec::new();
        for old in removed {
            let hash = utils::hash_file_content(&old.path)?;
            let moved_to = added_hashes
                .iter()
                .position(|h| h.as_deref() == Some(hash.as_str()));

            match moved_to {
                Some(idx) => {
                    added_hashes[idx] = None;
                    let new = added[idx];
                    debug!("Detected move {} -> {}", old.rel_path, new.rel_path);
                    changes.push(
                        ConfigChange::new(
                            ChangeType::Moved,
                            &new.rel_path,
                            format!("File moved: {} -> {}", old.rel_path, new.rel_path),
                            ImpactLevel::Low,
                        )
                        .with_content(Some(old.rel_path.clone()), Some(new.rel_path.clone()))
                        .mergeable(true),
                    );
                }
                None => changes.push(ConfigChange::new(
                    ChangeType::Removed,
                    &old.rel_path,
                    format!("File removed: {}", file_name(&old.rel_path)),
                    ImpactLevel::High,
                )),
            }
        }

        for (new, hash) in added.iter().zip(&added_hashes) {
            if hash.is_none() {
                continue;
            }
            changes.push(
                ConfigChange::new(
                    ChangeType::Added,
                    &new.rel_path,
                    format!("File added: {}", file_name(&new.rel_path)),
                    ImpactLevel::Medium,
                )
                .mergeable(self.is_file_auto_mergeable(&new.rel_path)),
            );
        }
        Ok(changes)
    }

    fn is_file_auto_mergeable(&self, rel_path: &str) -> bool {
        let path = Path::new(rel_path);
        let is_doc = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| DOC_EXTENSIONS.contains(&ext.as_str()));
        if !is_doc {
            return false;
        }

        let name = file_name(rel_path).to_ascii_lowercase();
        let instructions = self
            .config
            .instructions_file
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase());
        name != "readme.md" && Some(name) != instructions
    }

    /// Compare the contents of one file present in both trees
    ///
    /// Identical bytes yield no changes. Binary files and files over the
    /// configured size limit yield a single file-level change.
    pub fn compare_contents(&self, rel_path: &Path, old: &[u8], new: &[u8]) -> Vec<ConfigChange> {
        if old == new {
            return Vec::new();
        }

        let limit = self.config.max_diff_file_size;
        let too_large = limit > 0 && (old.len() as u64 > limit || new.len() as u64 > limit);
        if too_large || is_binary_content(old) || is_binary_content(new) {
            let reason = if too_large { "too large for line diff" } else { "binary" };
            return vec![ConfigChange::new(
                ChangeType::Modified,
                rel_path,
                format!("File changed ({})", reason),
                ImpactLevel::Medium,
            )];
        }

        let old_text = String::from_utf8_lossy(old);
        let new_text = String::from_utf8_lossy(new);

        match DocumentKind::from_path(rel_path) {
            DocumentKind::Structured => {
                match (serde_json::from_str::<Value>(&old_text), serde_json::from_str::<Value>(&new_text)) {
                    (Ok(old_value), Ok(new_value)) => self.compare_json(rel_path, &old_value, &new_value),
                    _ => {
                        warn!("Invalid JSON in {:?}, comparing as text", rel_path);
                        self.compare_text(rel_path, &old_text, &new_text)
                    }
                }
            }
            DocumentKind::Sectioned => self.compare_sections(rel_path, &old_text, &new_text),
            DocumentKind::Text => self.compare_text(rel_path, &old_text, &new_text),
        }
    }

    fn compare_json(&self, rel_path: &Path, old: &Value, new: &Value) -> Vec<ConfigChange> {
        structured::differences(old, new)
            .into_iter()
            .map(|diff| {
                let locator = structured::format_path(&diff.path);
                let change_type = match diff.kind {
                    JsonDiffKind::Added => ChangeType::Added,
                    JsonDiffKind::Removed => ChangeType::Removed,
                    JsonDiffKind::Modified { .. } => ChangeType::Modified,
                };
                let description = match diff.kind {
                    JsonDiffKind::Added => format!("Added key '{}'", locator),
                    JsonDiffKind::Removed => format!("Removed key '{}'", locator),
                    JsonDiffKind::Modified { type_changed: true } => format!(
                        "Changed type of '{}' from {} to {}",
                        locator,
                        diff.old.as_ref().map_or("null", structured::type_name),
                        diff.new.as_ref().map_or("null", structured::type_name)
                    ),
                    JsonDiffKind::Modified { type_changed: false } => format!("Modified '{}'", locator),
                };

                ConfigChange::new(change_type, rel_path, description, self.json_impact(&locator))
                    .with_content(
                        diff.old.as_ref().map(structured::pretty),
                        diff.new.as_ref().map(structured::pretty),
                    )
                    .with_section(Some(locator.clone()))
                    .mergeable(self.is_json_auto_mergeable(&locator, change_type))
            })
            .collect()
    }

    fn json_impact(&self, locator: &str) -> ImpactLevel {
        if locator.contains(self.config.server_registry_key.as_str()) {
            return ImpactLevel::Critical;
        }
        let lower = locator.to_lowercase();
        if HIGH_IMPACT_PATHS.iter().any(|p| lower.contains(p)) {
            ImpactLevel::High
        } else if MEDIUM_IMPACT_PATHS.iter().any(|p| lower.contains(p)) {
            ImpactLevel::Medium
        } else {
            ImpactLevel::Low
        }
    }

    fn is_json_auto_mergeable(&self, locator: &str, change_type: ChangeType) -> bool {
        if locator.contains(self.config.server_registry_key.as_str()) || change_type != ChangeType::Added {
            return false;
        }
        let lower = locator.to_lowercase();
        SAFE_ADDITION_KEYS.iter().any(|k| lower.contains(k))
    }

    fn compare_sections(&self, rel_path: &Path, old: &str, new: &str) -> Vec<ConfigChange> {
        let old_doc = SectionedDocument::parse(old);
        let new_doc = SectionedDocument::parse(new);
        let old_offsets = old_doc.body_offsets();
        let new_offsets = new_doc.body_offsets();
        let mut changes = Vec::new();

        for section in old_doc.sections() {
            let title = section.title();
            match new_doc.get(&section.key) {
                None => {
                    let body = section.body();
                    changes.push(
                        ConfigChange::new(
                            ChangeType::Removed,
                            rel_path,
                            format!("Section removed: {}", title),
                            self.text_impact(&body, Some(&title)),
                        )
                        .with_content(Some(body), None)
                        .with_section(Some(title)),
                    );
                }
                Some(other) if other.lines != section.lines => {
                    let old_lines: Vec<&str> = section.lines.iter().map(String::as_str).collect();
                    let new_lines: Vec<&str> = other.lines.iter().map(String::as_str).collect();
                    let offsets = (old_offsets[section.key.as_str()], new_offsets[other.key.as_str()]);
                    changes.extend(self.line_changes(rel_path, &old_lines, &new_lines, offsets, Some(&title)));
                }
                Some(_) => {}
            }
        }

        for section in new_doc.sections() {
            if old_doc.get(&section.key).is_some() {
                continue;
            }
            let title = section.title();
            let body = section.body();
            let text = match &section.header {
                Some(header) => format!("{}\n{}", header, body),
                None => body.clone(),
            };
            changes.push(
                ConfigChange::new(
                    ChangeType::Added,
                    rel_path,
                    format!("Section added: {}", title),
                    self.text_impact(&body, Some(&title)),
                )
                .with_content(None, Some(body))
                .with_section(Some(title.clone()))
                .mergeable(self.is_line_auto_mergeable(&text, Some(&title))),
            );
        }

        changes
    }

    fn compare_text(&self, rel_path: &Path, old: &str, new: &str) -> Vec<ConfigChange> {
        let old_lines: Vec<&str> = old.lines().collect();
        let new_lines: Vec<&str> = new.lines().collect();
        self.line_changes(rel_path, &old_lines, &new_lines, (0, 0), None)
    }

    /// One change per removed or added line
    ///
    /// `offsets` shift the slice indices to document line numbers; `fallback`
    /// is the locator used when no line above names one.
    fn line_changes(
        &self,
        rel_path: &Path,
        old_lines: &[&str],
        new_lines: &[&str],
        offsets: (usize, usize),
        fallback: Option<&str>,
    ) -> Vec<ConfigChange> {
        edit_script(old_lines, new_lines, self.options.ignore_whitespace)
            .into_iter()
            .filter_map(|edit| {
                let (change_type, lines, idx, offset) = match edit {
                    LineEdit::Keep { .. } => return None,
                    LineEdit::Delete { old } => (ChangeType::Removed, old_lines, old, offsets.0),
                    LineEdit::Insert { new } => (ChangeType::Added, new_lines, new, offsets.1),
                };
                let content = lines[idx];
                let locator = enclosing_locator(lines, idx).or_else(|| fallback.map(str::to_string));
                let line_number = offset + idx + 1;
                let is_added = change_type == ChangeType::Added;

                let (old_content, new_content) = if is_added {
                    (None, Some(content.to_string()))
                } else {
                    (Some(content.to_string()), None)
                };
                Some(
                    ConfigChange::new(
                        change_type,
                        rel_path,
                        format!("Line {} {}", line_number, if is_added { "added" } else { "removed" }),
                        self.text_impact(content, locator.as_deref()),
                    )
                    .with_content(old_content, new_content)
                    .with_line(line_number)
                    .mergeable(is_added && self.is_line_auto_mergeable(content, locator.as_deref()))
                    .with_section(locator),
                )
            })
            .collect()
    }

    fn is_critical_locator(&self, locator: Option<&str>) -> bool {
        locator.is_some_and(|loc| {
            self.config
                .critical_sections
                .iter()
                .any(|critical| loc.contains(critical.as_str()))
        })
    }

    fn text_impact(&self, content: &str, locator: Option<&str>) -> ImpactLevel {
        if self.is_critical_locator(locator) {
            return ImpactLevel::Critical;
        }
        let lower = content.to_lowercase();
        if HIGH_IMPACT_WORDS.iter().any(|w| lower.contains(w)) {
            ImpactLevel::High
        } else if MEDIUM_IMPACT_WORDS.iter().any(|w| lower.contains(w)) {
            ImpactLevel::Medium
        } else {
            ImpactLevel::Low
        }
    }

    fn is_line_auto_mergeable(&self, content: &str, locator: Option<&str>) -> bool {
        if self.is_critical_locator(locator) {
            return false;
        }
        let lower = content.to_lowercase();
        SAFE_LINE_MARKERS.iter().any(|m| lower.contains(m))
    }
}

fn file_name(rel_path: &str) -> String {
    PathBuf::from(rel_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| rel_path.to_string())
}
