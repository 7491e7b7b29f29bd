//! Upgrade workflow: detect → backup → plan → apply → rollback on failure
//!
//! [`UpgradeAssistant`] moves a configuration tree to a target version from a
//! [`VersionCatalog`]. A run builds an ordered list of [`UpgradeStep`]s,
//! executes them one by one and either persists the new version or puts the
//! tree back the way it was.
//!
//! ## Outcomes
//!
//! | Situation                                   | Status              |
//! |---------------------------------------------|---------------------|
//! | every step succeeded                        | `Success`           |
//! | a step failed, backup restored              | `Failed`            |
//! | a step failed before anything was written   | `Failed`            |
//! | a step failed and the restore failed        | `RollbackRequired`  |
//! | a step failed after writes, no backup taken | `RollbackRequired`  |
//!
//! ## Steps
//!
//! Every upgrade writes the version marker and refreshes the metadata record.
//! [`FeatureStep`]s are added when the target reaches their threshold; the
//! defaults touch the instructions document at 1.1.0 and the settings file
//! at 1.2.0.
//!
//! ## Example
//!
//! ```rust,no_run
//! use migratus::{TreeConfig, UpgradeAssistant};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut assistant = UpgradeAssistant::new(TreeConfig::new("./project"))?;
//!
//! if let Some(next) = assistant.check_for_upgrades() {
//!     let result = assistant.perform_upgrade(&next, true);
//!     if result.needs_rollback() {
//!         eprintln!("Manual recovery needed: {:?}", result.errors);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::backup::{BackupInfo, BackupManager};
use crate::config::TreeConfig;
use crate::error::{MigratusError, Result};
use crate::types::{MigrationResult, MigrationStatus, Migrator};
use crate::utils;
use crate::version::{Version, VersionCatalog};
use crate::version_manager::VersionManager;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

/// What a step does to its target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum StepAction {
    /// Write `content`, creating parent directories
    Create {
        /// New file content
        content: String,
    },
    /// Rewrite the file in place; skipped if missing
    Modify,
    /// Copy `source` (relative to the root unless absolute) over the target
    Copy {
        /// File to copy
        source: PathBuf,
    },
    /// Remove the target if present
    Delete,
    /// Stamp the metadata record with the target version and refresh its checksum
    RefreshMetadata,
}

/// One unit of work in an upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeStep {
    /// Human readable description, used in failure messages
    pub description: String,
    /// What to do
    pub action: StepAction,
    /// Affected file, relative to the tree root
    pub target_path: PathBuf,
}

impl UpgradeStep {
    /// Create a step
    pub fn new(description: impl Into<String>, action: StepAction, target_path: impl Into<PathBuf>) -> Self {
        Self {
            description: description.into(),
            action,
            target_path: target_path.into(),
        }
    }
}

/// A step added only when the target version reaches `threshold`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureStep {
    /// Lowest target version that includes the step
    pub threshold: Version,
    /// The step
    pub step: UpgradeStep,
}

impl FeatureStep {
    /// Whether an upgrade to `target` includes this step
    pub fn applies_to(&self, target: &Version) -> bool {
        *target >= self.threshold
    }
}

/// Feature steps shipped with the default catalog
pub fn default_feature_steps(config: &TreeConfig) -> Vec<FeatureStep> {
    vec![
        FeatureStep {
            threshold: Version::new(1, 1, 0),
            step: UpgradeStep::new(
                "Add persona support to configuration",
                StepAction::Modify,
                &config.instructions_file,
            ),
        },
        FeatureStep {
            threshold: Version::new(1, 2, 0),
            step: UpgradeStep::new("Enhance security settings", StepAction::Modify, &config.settings_file),
        },
    ]
}

/// Hook trait for upgrade steps
///
/// Called around every step. Returning an error from either method fails
/// the step, which triggers the normal rollback path.
///
/// # Examples
///
/// ```rust
/// use migratus::upgrade::{UpgradeHook, UpgradeStep};
/// use migratus::Result;
/// use std::path::Path;
///
/// struct AuditHook;
///
/// impl UpgradeHook for AuditHook {
///     fn before_step(&self, index: usize, step: &UpgradeStep) -> Result<()> {
///         println!("step {}: {}", index + 1, step.description);
///         Ok(())
///     }
///
///     fn after_step(&self, _index: usize, _step: &UpgradeStep, affected: Option<&Path>) -> Result<()> {
///         if let Some(path) = affected {
///             println!("  wrote {}", path.display());
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait UpgradeHook: Send + Sync {
    /// Called before a step runs
    ///
    /// # Arguments
    ///
    /// * `index` - 0-based position of the step
    /// * `step` - The step about to run
    fn before_step(&self, index: usize, step: &UpgradeStep) -> Result<()>;

    /// Called after a step ran
    ///
    /// # Arguments
    ///
    /// * `index` - 0-based position of the step
    /// * `step` - The step that ran
    /// * `affected` - File the step touched, relative to the root
    fn after_step(&self, index: usize, step: &UpgradeStep, affected: Option<&Path>) -> Result<()>;
}

/// Default implementation of UpgradeHook that does nothing
#[derive(Debug)]
pub struct NoOpHook;

impl UpgradeHook for NoOpHook {
    fn before_step(&self, _index: usize, _step: &UpgradeStep) -> Result<()> {
        Ok(())
    }

    fn after_step(&self, _index: usize, _step: &UpgradeStep, _affected: Option<&Path>) -> Result<()> {
        Ok(())
    }
}

/// Status guard for one upgrade run
///
/// Only `Pending → InProgress → {Success | Failed | RollbackRequired}` (and
/// `Pending → Failed` for runs that never start) are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeRun {
    status: MigrationStatus,
}

impl UpgradeRun {
    /// A run that has not started
    pub fn new() -> Self {
        Self {
            status: MigrationStatus::Pending,
        }
    }

    /// Current status
    pub fn status(&self) -> MigrationStatus {
        self.status
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// - [`MigratusError::Internal`] on an illegal transition
    pub fn transition(&mut self, next: MigrationStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MigratusError::internal(format!(
                "illegal upgrade transition {} -> {}",
                self.status, next
            )));
        }
        debug!("Upgrade run {} -> {}", self.status, next);
        self.status = next;
        Ok(())
    }
}

impl Default for UpgradeRun {
    fn default() -> Self {
        Self::new()
    }
}

/// What an upgrade to a target would do
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradePreview {
    /// Detected version, if any
    pub current_version: Option<Version>,
    /// Requested version
    pub target_version: Version,
    /// Whether the target is newer than the current version
    pub upgrade_available: bool,
    /// Step descriptions in execution order
    pub steps: Vec<String>,
    /// Files the steps touch, relative to the root
    pub files: Vec<PathBuf>,
    /// Things worth a second look
    pub risks: Vec<String>,
    /// Whether a backup should be taken first
    pub backup_recommended: bool,
}

/// Orchestrates upgrades of one configuration tree
pub struct UpgradeAssistant {
    config: TreeConfig,
    version_manager: VersionManager,
    backup_manager: BackupManager,
    catalog: VersionCatalog,
    feature_steps: Vec<FeatureStep>,
    hook: Box<dyn UpgradeHook>,
    history: Vec<MigrationResult>,
}

impl fmt::Debug for UpgradeAssistant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeAssistant")
            .field("root", &self.config.root_path)
            .field("catalog", &self.catalog)
            .field("feature_steps", &self.feature_steps.len())
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl UpgradeAssistant {
    /// Create an assistant with the default catalog and feature steps
    ///
    /// # Errors
    ///
    /// - [`MigratusError::InvalidConfiguration`] if the configuration is invalid
    /// - [`MigratusError::Regex`] if version detection patterns cannot be built
    pub fn new(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let version_manager = VersionManager::new(config.clone())?;
        let backup_manager = BackupManager::new(config.clone())?;
        let feature_steps = default_feature_steps(&config);
        Ok(Self {
            config,
            version_manager,
            backup_manager,
            catalog: VersionCatalog::default(),
            feature_steps,
            hook: Box::new(NoOpHook),
            history: Vec::new(),
        })
    }

    /// Use a different version catalog
    pub fn with_catalog(mut self, catalog: VersionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Add a feature step
    pub fn with_feature_step(mut self, step: FeatureStep) -> Self {
        self.feature_steps.push(step);
        self
    }

    /// Replace all feature steps
    pub fn with_feature_steps(mut self, steps: Vec<FeatureStep>) -> Self {
        self.feature_steps = steps;
        self
    }

    /// Install a step hook
    pub fn with_hook(mut self, hook: impl UpgradeHook + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    /// Tree configuration
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Version catalog
    pub fn catalog(&self) -> &VersionCatalog {
        &self.catalog
    }

    /// Backup manager used for pre-upgrade backups and rollbacks
    pub fn backup_manager(&self) -> &BackupManager {
        &self.backup_manager
    }

    /// Version manager used for detection and metadata
    pub fn version_manager(&self) -> &VersionManager {
        &self.version_manager
    }

    /// Results of upgrades performed by this assistant, oldest first
    pub fn history(&self) -> &[MigrationResult] {
        &self.history
    }

    /// Next catalog version after the detected one
    ///
    /// Without a detectable version the latest catalog entry is offered.
    /// `None` when the tree is already at or past the newest entry.
    pub fn check_for_upgrades(&self) -> Option<Version> {
        let next = match self.version_manager.detect_current_version() {
            Some(current) => self.catalog.next_after(&current),
            None => self.catalog.latest(),
        };
        next.map(|entry| entry.version.clone())
    }

    /// Steps an upgrade to `target` would run, in order
    pub fn upgrade_steps(&self, target: &Version) -> Vec<UpgradeStep> {
        let mut steps = vec![
            UpgradeStep::new(
                "Update version metadata",
                StepAction::Create {
                    content: format!("{}\n", target),
                },
                &self.config.version_file,
            ),
            UpgradeStep::new(
                "Update configuration metadata",
                StepAction::RefreshMetadata,
                &self.config.metadata_file,
            ),
        ];
        steps.extend(
            self.feature_steps
                .iter()
                .filter(|feature| feature.applies_to(target))
                .map(|feature| feature.step.clone()),
        );
        steps
    }

    /// Describe an upgrade without touching the tree
    pub fn get_upgrade_preview(&self, target: &Version) -> UpgradePreview {
        let current = self.version_manager.detect_current_version();
        let steps = self.upgrade_steps(target);

        let mut files: Vec<PathBuf> = Vec::new();
        for step in &steps {
            if !files.contains(&step.target_path) {
                files.push(step.target_path.clone());
            }
        }

        let mut risks = Vec::new();
        if let Some(current) = &current {
            if current.major() != target.major() {
                risks.push(format!(
                    "Major version upgrade ({} -> {}) - may require manual review",
                    current, target
                ));
            }
            if target <= current {
                risks.push("Target is not newer than current version".to_string());
            }
        }
        if self.catalog.get(target).is_none() {
            risks.push(format!("Version {} is not in the catalog", target));
        }

        UpgradePreview {
            upgrade_available: current.as_ref().map_or(true, |c| target > c),
            current_version: current,
            target_version: target.clone(),
            steps: steps.into_iter().map(|s| s.description).collect(),
            files,
            risks,
            backup_recommended: true,
        }
    }

    /// Upgrade the tree to `target`
    ///
    /// With `create_backup` a pre-upgrade backup is taken first and restored
    /// if any step fails. The returned result lists every file touched and,
    /// when a backup was taken, its path. The result is also appended to
    /// [`history`](Self::history).
    #[instrument(skip(self, target), fields(root = ?self.config.root_path, to = %target))]
    pub fn perform_upgrade(&mut self, target: &Version, create_backup: bool) -> MigrationResult {
        let result = self.run_upgrade(target, create_backup);
        match result.status {
            MigrationStatus::Success => info!(files = result.files_affected.len(), "{}", result.message),
            MigrationStatus::RollbackRequired => error!(errors = ?result.errors, "{}", result.message),
            _ => warn!(errors = ?result.errors, "{}", result.message),
        }
        self.history.push(result.clone());
        result
    }

    fn run_upgrade(&self, target: &Version, create_backup: bool) -> MigrationResult {
        let mut run = UpgradeRun::new();
        let current = self.version_manager.detect_current_version();
        let versions = (current.as_ref().map(Version::to_string), Some(target.to_string()));

        let mut warnings = Vec::new();
        if let Some(current) = &current {
            if target <= current {
                warnings.push(format!(
                    "Target version {} is not newer than current version {}",
                    target, current
                ));
            }
        }

        let backup = if create_backup {
            let from = current.as_ref().map_or_else(|| "unknown".to_string(), Version::to_string);
            match self
                .backup_manager
                .create_backup(&format!("Pre-upgrade backup from {} to {}", from, target))
            {
                Ok(info) => Some(info),
                Err(e) => {
                    let _ = run.transition(MigrationStatus::Failed);
                    return finish(
                        MigrationResult::failed("Upgrade aborted: pre-upgrade backup failed", e),
                        versions,
                        warnings,
                    );
                }
            }
        } else {
            None
        };
        let backup_path = backup.as_ref().map(|b| b.path.clone());

        if let Err(e) = run.transition(MigrationStatus::InProgress) {
            return finish(MigrationResult::failed("Upgrade could not start", e), versions, warnings);
        }

        let steps = self.upgrade_steps(target);
        let mut affected: Vec<PathBuf> = Vec::new();
        let mut created: Vec<PathBuf> = Vec::new();
        for (index, step) in steps.iter().enumerate() {
            debug!("Step {}/{}: {}", index + 1, steps.len(), step.description);
            self.note_new_path(&step.target_path, &mut created);
            if let Err(e) = self.run_step(index, step, target, &mut affected) {
                let failure = self.fail(&mut run, &step.description, e, backup.as_ref(), &affected, &created);
                return finish(failure.with_backup(backup_path), versions, warnings);
            }
        }

        self.note_new_path(&self.config.version_file, &mut created);
        self.note_new_path(&self.config.metadata_file, &mut created);
        if let Err(e) = self.persist(target, &mut affected) {
            let failure = self.fail(&mut run, "Persist version", e, backup.as_ref(), &affected, &created);
            return finish(failure.with_backup(backup_path), versions, warnings);
        }

        if let Err(e) = run.transition(MigrationStatus::Success) {
            return finish(MigrationResult::failed("Upgrade state error", e), versions, warnings);
        }
        let from = versions.0.clone().unwrap_or_else(|| "unknown".to_string());
        let mut result = MigrationResult::success(format!("Successfully upgraded from {} to {}", from, target))
            .with_backup(backup_path);
        result.files_affected = affected;
        finish(result, versions, warnings)
    }

    /// Remember `rel_path` if nothing exists there before the upgrade writes it
    fn note_new_path(&self, rel_path: &Path, created: &mut Vec<PathBuf>) {
        let path = self.config.root_path.join(rel_path);
        if !path.exists() && !created.iter().any(|p| p == rel_path) {
            created.push(rel_path.to_path_buf());
        }
    }

    /// Delete files the failed upgrade created that the backup does not cover
    fn remove_created(&self, created: &[PathBuf]) -> Result<usize> {
        let root = &self.config.root_path;
        let mut removed = 0;
        for rel_path in created {
            let path = root.join(rel_path);
            if !path.is_file() {
                continue;
            }
            fs::remove_file(&path)?;
            if let Some(parent) = path.parent() {
                utils::prune_empty_dirs(parent, root)?;
            }
            debug!("Removed {:?} created by the failed upgrade", rel_path);
            removed += 1;
        }
        Ok(removed)
    }

    fn run_step(
        &self,
        index: usize,
        step: &UpgradeStep,
        target: &Version,
        affected: &mut Vec<PathBuf>,
    ) -> Result<()> {
        self.hook
            .before_step(index, step)
            .map_err(|e| hook_failed(&step.description, e))?;

        let touched = self
            .execute_step(step, target)
            .map_err(|e| MigratusError::step_failed(&step.description, e))?;
        if let Some(path) = &touched {
            if !affected.contains(path) {
                affected.push(path.clone());
            }
        }

        self.hook
            .after_step(index, step, touched.as_deref())
            .map_err(|e| hook_failed(&step.description, e))
    }

    /// Apply one step; returns the relative path it touched, if any
    fn execute_step(&self, step: &UpgradeStep, target: &Version) -> Result<Option<PathBuf>> {
        let root = &self.config.root_path;
        let path = root.join(&step.target_path);

        let touched = match &step.action {
            StepAction::Create { content } => {
                utils::atomic_write(&path, content.as_bytes())?;
                true
            }
            StepAction::Modify => {
                if path.is_file() {
                    let content = fs::read(&path)?;
                    utils::atomic_write(&path, &content)?;
                    true
                } else {
                    debug!("Skipping modify of missing {:?}", step.target_path);
                    false
                }
            }
            StepAction::Copy { source } => {
                let content = fs::read(root.join(source))?;
                utils::atomic_write(&path, &content)?;
                true
            }
            StepAction::Delete => {
                if path.is_file() {
                    fs::remove_file(&path)?;
                    true
                } else {
                    false
                }
            }
            StepAction::RefreshMetadata => match self.version_manager.load_metadata() {
                Some(mut metadata) => {
                    metadata.version = target.clone();
                    self.version_manager.update_metadata(metadata)?;
                    true
                }
                None => false,
            },
        };
        Ok(touched.then(|| step.target_path.clone()))
    }

    /// Write the final version marker and metadata record
    fn persist(&self, target: &Version, affected: &mut Vec<PathBuf>) -> Result<()> {
        self.version_manager.save_version(target)?;
        match self.version_manager.load_metadata() {
            Some(mut metadata) => {
                metadata.version = target.clone();
                self.version_manager.update_metadata(metadata)?;
            }
            None => {
                self.version_manager.create_metadata(
                    target.clone(),
                    "default",
                    None,
                    Some(format!("Created by upgrade to {}", target)),
                )?;
            }
        }

        for path in [&self.config.version_file, &self.config.metadata_file] {
            if !affected.contains(path) {
                affected.push(path.clone());
            }
        }
        Ok(())
    }

    /// Roll back after a failed step and build the failure result
    fn fail(
        &self,
        run: &mut UpgradeRun,
        step: &str,
        cause: MigratusError,
        backup: Option<&BackupInfo>,
        affected: &[PathBuf],
        created: &[PathBuf],
    ) -> MigrationResult {
        let message = format!("Upgrade failed at step: {}", step);

        let restored = backup.map(|backup| {
            self.backup_manager
                .try_restore(&backup.name, true)
                .and_then(|report| self.remove_created(created).map(|_| report))
        });
        let (status, mut result) = match (backup, restored) {
            (Some(backup), Some(restored)) => match restored {
                Ok(report) => {
                    info!(backup = %backup.name, restored = report.files_restored.len(), "Rolled back upgrade");
                    let result = MigrationResult::failed(message, &cause)
                        .with_warning(format!("Configuration restored from backup '{}'", backup.name));
                    (MigrationStatus::Failed, result)
                }
                Err(restore_error) => {
                    let rollback = MigratusError::RollbackFailed {
                        backup: backup.name.clone(),
                        reason: restore_error.to_string(),
                    };
                    let mut result = MigrationResult::failed(message, &cause);
                    result.errors.push(rollback.to_string());
                    (MigrationStatus::RollbackRequired, result)
                }
            },
            _ if affected.is_empty() => (MigrationStatus::Failed, MigrationResult::failed(message, &cause)),
            _ => {
                let result = MigrationResult::failed(message, &cause).with_warning(format!(
                    "No backup was taken; {} file(s) were modified before the failure",
                    affected.len()
                ));
                (MigrationStatus::RollbackRequired, result)
            }
        };

        if let Err(e) = run.transition(status) {
            result.errors.push(e.to_string());
        }
        result.status = run.status();
        if status == MigrationStatus::RollbackRequired {
            result.files_affected = affected.to_vec();
        }
        result
    }

    /// Restore a backup without asking for confirmation
    pub fn rollback_upgrade(&self, backup_name: &str) -> MigrationResult {
        info!(backup = backup_name, "Rolling back upgrade");
        self.backup_manager.restore_backup(backup_name, true)
    }

    /// Backups taken by upgrades, newest first
    pub fn get_upgrade_history(&self) -> Result<Vec<BackupInfo>> {
        Ok(self
            .backup_manager
            .list_backups()?
            .into_iter()
            .filter(|backup| backup.description.to_lowercase().contains("upgrade"))
            .collect())
    }
}

fn hook_failed(step: &str, cause: MigratusError) -> MigratusError {
    MigratusError::step_failed(step, MigratusError::HookExecution(cause.to_string()))
}

fn finish(
    mut result: MigrationResult,
    versions: (Option<String>, Option<String>),
    warnings: Vec<String>,
) -> MigrationResult {
    result.source_version = versions.0;
    result.target_version = versions.1;
    let mut all = warnings;
    all.append(&mut result.warnings);
    result.warnings = all;
    result
}

impl Migrator for UpgradeAssistant {
    fn migrate(&mut self, source: &Version, target: &Version) -> MigrationResult {
        let detected = self.version_manager.detect_current_version();
        let mut result = self.perform_upgrade(target, true);
        if detected.as_ref() != Some(source) {
            result.warnings.push(format!(
                "Requested source version {} does not match detected version {}",
                source,
                detected.map_or_else(|| "none".to_string(), |v| v.to_string())
            ));
        }
        result
    }

    fn can_migrate(&self, source: &Version, target: &Version) -> bool {
        target >= source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn setup() -> (TempDir, UpgradeAssistant) {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "CLAUDE.md", "# Project\nrules\n");
        write(temp.path(), ".claude/settings.json", r#"{"permissions": {}}"#);
        write(temp.path(), ".version", "1.0.0\n");
        let assistant = UpgradeAssistant::new(TreeConfig::new(temp.path())).unwrap();
        (temp, assistant)
    }

    /// Fails the step at `fail_at`, before or after it runs
    struct FailAt {
        fail_at: usize,
        before: bool,
        calls: Arc<AtomicUsize>,
    }

    impl UpgradeHook for FailAt {
        fn before_step(&self, index: usize, _step: &UpgradeStep) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.before && index == self.fail_at {
                return Err(MigratusError::custom("injected failure"));
            }
            Ok(())
        }

        fn after_step(&self, index: usize, _step: &UpgradeStep, _affected: Option<&Path>) -> Result<()> {
            if !self.before && index == self.fail_at {
                return Err(MigratusError::custom("injected failure"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_check_for_upgrades() {
        let (temp, assistant) = setup();
        assert_eq!(assistant.check_for_upgrades(), Some(Version::new(1, 1, 0)));

        write(temp.path(), ".version", "2.0.1\n");
        assert_eq!(assistant.check_for_upgrades(), None);

        fs::remove_file(temp.path().join(".version")).unwrap();
        fs::write(temp.path().join("CLAUDE.md"), "no version here").unwrap();
        assert_eq!(assistant.check_for_upgrades(), Some(Version::new(2, 0, 1)));
    }

    #[test]
    fn test_steps_gated_by_threshold() {
        let (_temp, assistant) = setup();
        let describe = |v: Version| -> Vec<String> {
            assistant.upgrade_steps(&v).into_iter().map(|s| s.description).collect()
        };
        assert_eq!(describe(Version::new(1, 0, 1)).len(), 2);
        assert_eq!(
            describe(Version::new(1, 1, 0)),
            vec![
                "Update version metadata",
                "Update configuration metadata",
                "Add persona support to configuration"
            ]
        );
        assert_eq!(describe(Version::new(2, 0, 0)).len(), 4);
    }

    #[test]
    fn test_successful_upgrade() {
        let (temp, mut assistant) = setup();
        let result = assistant.perform_upgrade(&Version::new(1, 2, 0), true);

        assert!(result.is_success(), "{:?}", result);
        assert_eq!(result.source_version.as_deref(), Some("1.0.0"));
        assert_eq!(result.target_version.as_deref(), Some("1.2.0"));
        assert!(result.backup_path.as_ref().unwrap().exists());
        for file in [".version", ".metadata.json", "CLAUDE.md", ".claude/settings.json"] {
            assert!(result.files_affected.contains(&PathBuf::from(file)), "missing {}", file);
        }

        assert_eq!(fs::read_to_string(temp.path().join(".version")).unwrap().trim(), "1.2.0");
        let metadata = assistant.version_manager().load_metadata().unwrap();
        assert_eq!(metadata.version, Version::new(1, 2, 0));
        assert!(!assistant.version_manager().is_migration_needed().unwrap());
        assert_eq!(assistant.history().len(), 1);
        assert_eq!(assistant.get_upgrade_history().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_step_restores_backup() {
        let (temp, assistant) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut assistant = assistant.with_hook(FailAt {
            fail_at: 1,
            before: false,
            calls: Arc::clone(&calls),
        });
        // Existing metadata so step 2 really writes
        assistant
            .version_manager()
            .create_metadata(Version::new(1, 0, 0), "default", None, None)
            .unwrap();
        let metadata_before = fs::read(temp.path().join(".metadata.json")).unwrap();

        let result = assistant.perform_upgrade(&Version::new(1, 1, 0), true);

        assert_eq!(result.status, MigrationStatus::Failed);
        assert_eq!(result.message, "Upgrade failed at step: Update configuration metadata");
        assert!(result.backup_path.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fs::read_to_string(temp.path().join(".version")).unwrap(), "1.0.0\n");
        assert_eq!(fs::read(temp.path().join(".metadata.json")).unwrap(), metadata_before);
    }

    #[test]
    fn test_failure_without_backup() {
        // Marker already written when step 1 fails
        let (temp, assistant) = setup();
        let mut assistant = assistant.with_hook(FailAt {
            fail_at: 0,
            before: false,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let result = assistant.perform_upgrade(&Version::new(1, 1, 0), false);
        assert_eq!(result.status, MigrationStatus::RollbackRequired);
        assert!(result.needs_rollback());
        assert_eq!(result.files_affected, vec![PathBuf::from(".version")]);
        assert_eq!(fs::read_to_string(temp.path().join(".version")).unwrap(), "1.1.0\n");

        // Nothing written yet
        let (temp, assistant) = setup();
        let mut assistant = assistant.with_hook(FailAt {
            fail_at: 0,
            before: true,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let result = assistant.perform_upgrade(&Version::new(1, 1, 0), false);
        assert_eq!(result.status, MigrationStatus::Failed);
        assert!(result.backup_path.is_none());
        assert_eq!(fs::read_to_string(temp.path().join(".version")).unwrap(), "1.0.0\n");
    }

    #[test]
    fn test_failing_copy_step() {
        let (temp, assistant) = setup();
        let copy = FeatureStep {
            threshold: Version::new(1, 1, 0),
            step: UpgradeStep::new(
                "Install template",
                StepAction::Copy {
                    source: PathBuf::from("templates/missing.md"),
                },
                ".claude/commands/new.md",
            ),
        };
        let mut assistant = assistant.with_feature_steps(vec![copy]);
        let result = assistant.perform_upgrade(&Version::new(1, 1, 0), true);

        assert_eq!(result.status, MigrationStatus::Failed);
        assert_eq!(result.message, "Upgrade failed at step: Install template");
        assert!(!temp.path().join(".claude/commands/new.md").exists());
        assert_eq!(fs::read_to_string(temp.path().join(".version")).unwrap(), "1.0.0\n");
    }

    #[test]
    fn test_rollback_removes_files_outside_backup() {
        let (temp, assistant) = setup();
        write(temp.path(), "docs/keep.txt", "untracked");
        let notes = FeatureStep {
            threshold: Version::new(1, 1, 0),
            step: UpgradeStep::new(
                "Write release notes",
                StepAction::Create {
                    content: "notes\n".to_string(),
                },
                "docs/new/notes.txt",
            ),
        };
        let mut assistant = assistant.with_feature_steps(vec![notes]).with_hook(FailAt {
            fail_at: 2,
            before: false,
            calls: Arc::new(AtomicUsize::new(0)),
        });

        let result = assistant.perform_upgrade(&Version::new(1, 1, 0), true);
        assert_eq!(result.status, MigrationStatus::Failed);
        assert_eq!(result.message, "Upgrade failed at step: Write release notes");
        assert!(result.errors[0].contains("Hook execution error"), "{:?}", result.errors);
        assert!(!temp.path().join("docs/new/notes.txt").exists());
        assert!(!temp.path().join("docs/new").exists());
        assert_eq!(fs::read_to_string(temp.path().join("docs/keep.txt")).unwrap(), "untracked");
        assert!(!temp.path().join(".metadata.json").exists());
        assert_eq!(fs::read_to_string(temp.path().join(".version")).unwrap(), "1.0.0\n");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp = TempDir::new().unwrap();
        let mut config = TreeConfig::new(temp.path());
        config.include_patterns.clear();
        assert!(matches!(
            UpgradeAssistant::new(config),
            Err(MigratusError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_downgrade_warns() {
        let (_temp, mut assistant) = setup();
        let result = assistant.perform_upgrade(&Version::new(1, 0, 0), false);
        assert!(result.is_success());
        assert!(result.warnings.iter().any(|w| w.contains("not newer")));
    }

    #[test]
    fn test_preview() {
        let (_temp, assistant) = setup();
        let preview = assistant.get_upgrade_preview(&Version::new(2, 0, 0));
        assert!(preview.upgrade_available);
        assert_eq!(preview.current_version, Some(Version::new(1, 0, 0)));
        assert_eq!(preview.steps.len(), 4);
        assert!(preview.files.contains(&PathBuf::from("CLAUDE.md")));
        assert!(preview.risks.iter().any(|r| r.starts_with("Major version upgrade")));

        let preview = assistant.get_upgrade_preview(&Version::new(0, 9, 0));
        assert!(!preview.upgrade_available);
        assert!(preview.risks.iter().any(|r| r == "Target is not newer than current version"));
        assert!(preview.risks.iter().any(|r| r.contains("not in the catalog")));
    }

    #[test]
    fn test_rollback_upgrade() {
        let (temp, mut assistant) = setup();
        let result = assistant.perform_upgrade(&Version::new(1, 1, 0), true);
        let backup = assistant.get_upgrade_history().unwrap().remove(0);
        assert_eq!(result.backup_path.as_ref(), Some(&backup.path));

        let rollback = assistant.rollback_upgrade(&backup.name);
        assert!(rollback.is_success());
        assert_eq!(fs::read_to_string(temp.path().join(".version")).unwrap(), "1.0.0\n");
        assert!(!temp.path().join(".metadata.json").exists());
    }

    #[test]
    fn test_run_guard() {
        let mut run = UpgradeRun::new();
        assert!(run.transition(MigrationStatus::Success).is_err());
        run.transition(MigrationStatus::InProgress).unwrap();
        run.transition(MigrationStatus::RollbackRequired).unwrap();
        assert!(run.transition(MigrationStatus::Success).is_err());
        assert_eq!(run.status(), MigrationStatus::RollbackRequired);
    }

    #[test]
    fn test_migrator() {
        let (_temp, mut assistant) = setup();
        assert!(assistant.can_migrate(&Version::new(1, 0, 0), &Version::new(1, 1, 0)));
        assert!(!assistant.can_migrate(&Version::new(1, 1, 0), &Version::new(1, 0, 0)));
        let result = assistant.migrate(&Version::new(0, 5, 0), &Version::new(1, 1, 0));
        assert!(result.is_success());
        assert!(result.warnings.iter().any(|w| w.contains("does not match")));
    }
}
