//! End-to-end workflows for Migratus
//!
//! Seeds realistic configuration trees and drives the components the way a
//! user would: walk the upgrade catalog, merge a template, move backups
//! between machines.

use ::migratus::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::info;

/// A temporary configuration tree
pub struct MigratusTestHarness {
    pub temp_dir: TempDir,
    pub config: TreeConfig,
}

impl MigratusTestHarness {
    /// Create an empty tree
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = TreeConfig::new(temp_dir.path());
        Self { temp_dir, config }
    }

    /// Create a tree populated like a freshly installed template
    pub fn with_template(version: &str) -> Self {
        let harness = Self::new();
        harness.write(
            "CLAUDE.md",
            &format!(
                "# SuperClaude v{}\n\n## Commands\nUse /build and /test.\n\n## Personas\narchitect\n",
                version
            ),
        );
        harness.write(
            ".claude/settings.json",
            "{\n  \"permissions\": {\n    \"allow\": [\"Read\"]\n  }\n}\n",
        );
        harness.write(".claude/commands/build.md", "# Build\nCompile the project.\n");
        harness.write(".claude/commands/test.md", "# Test\nRun the suite.\n");
        harness.write(".claude/personas/architect.md", "# Architect\nThinks in systems.\n");
        harness.write(".mcp.json", "{\n  \"mcpServers\": {}\n}\n");
        harness.write(".version", &format!("{}\n", version));
        harness
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).unwrap()
    }

    /// Contents of every file the backup globs select
    pub fn tracked_files(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let store = self.config.backups_path();
        walkdir::WalkDir::new(self.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && !e.path().starts_with(&store))
            .map(|e| {
                let rel = e.path().strip_prefix(self.root()).unwrap().to_path_buf();
                (rel, fs::read(e.path()).unwrap())
            })
            .collect()
    }
}

impl Default for MigratusTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Hook that records every step it sees
#[derive(Clone, Default)]
pub struct RecordingHook {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl UpgradeHook for RecordingHook {
    fn before_step(&self, index: usize, step: &UpgradeStep) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("before {} {}", index, step.description));
        Ok(())
    }

    fn after_step(&self, index: usize, _step: &UpgradeStep, affected: Option<&Path>) -> Result<()> {
        let affected = affected.map(|p| p.display().to_string()).unwrap_or_default();
        self.events
            .lock()
            .unwrap()
            .push(format!("after {} {}", index, affected));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_walk_the_catalog() {
        let harness = MigratusTestHarness::with_template("1.0.0");
        VersionManager::new(harness.config.clone())
            .unwrap()
            .create_metadata(Version::new(1, 0, 0), "default", Some("tests".into()), None)
            .unwrap();

        let mut assistant = UpgradeAssistant::new(harness.config.clone()).unwrap();
        let mut visited = Vec::new();
        while let Some(next) = assistant.check_for_upgrades() {
            info!("Upgrading to {}", next);
            let result = assistant.perform_upgrade(&next, true);
            assert!(result.is_success(), "{:?}", result);
            assert!(result.backup_path.as_ref().is_some_and(|p| p.is_file()));
            visited.push(next.to_string());
        }

        assert_eq!(visited, vec!["1.1.0", "1.2.0", "2.0.0", "2.0.1"]);
        assert_eq!(harness.read(".version"), "2.0.1\n");
        assert_eq!(assistant.history().len(), 4);

        let metadata = assistant.version_manager().load_metadata().unwrap();
        assert_eq!(metadata.version, Version::new(2, 0, 1));
        assert_eq!(metadata.author.as_deref(), Some("tests"));
        assert!(metadata.updated_at >= metadata.created_at);

        let history = assistant.get_upgrade_history().unwrap();
        assert_eq!(history.len(), 4);
        // Newest first
        assert_eq!(history[0].version.as_deref(), Some("2.0.0"));
        assert_eq!(history[3].version.as_deref(), Some("1.0.0"));

        assert!(logs_contain("Upgrading to 1.1.0"));
        assert!(logs_contain("Upgrading to 2.0.1"));
    }

    #[test]
    fn test_hook_sees_every_step() {
        let harness = MigratusTestHarness::with_template("1.0.0");
        let hook = RecordingHook::default();
        let mut assistant = UpgradeAssistant::new(harness.config.clone())
            .unwrap()
            .with_hook(hook.clone());

        let target = Version::new(1, 1, 0);
        let preview = assistant.get_upgrade_preview(&target);
        assert_eq!(preview.steps.len(), 3);

        let result = assistant.perform_upgrade(&target, false);
        assert!(result.is_success(), "{:?}", result);
        assert_eq!(result.backup_path, None);

        let events = hook.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "before 0 Update version metadata".to_string(),
                "after 0 .version".to_string(),
                "before 1 Update configuration metadata".to_string(),
                // No metadata record yet, nothing refreshed
                "after 1 ".to_string(),
                "before 2 Add persona support to configuration".to_string(),
                "after 2 CLAUDE.md".to_string(),
            ]
        );
        // The final persist writes the record the refresh step skipped
        assert!(harness.root().join(".metadata.json").is_file());
    }

    #[test]
    fn test_merge_template_settings() {
        let local = MigratusTestHarness::with_template("1.2.0");
        let template = MigratusTestHarness::with_template("1.2.0");
        local.write(
            ".claude/settings.json",
            r#"{"permissions": {"allow": ["Read"]}, "user_key": true}"#,
        );
        template.write(
            ".claude/settings.json",
            r#"{"permissions": {"allow": ["Read"]}, "hooks": {"enabled": true}}"#,
        );

        let resolver = ConflictResolver::new(local.config.clone());
        let conflicts = resolver.detect_conflicts(local.root(), template.root()).unwrap();
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts.iter().all(|c| c.conflict_type == ConflictType::JsonMerge));
        assert!(conflicts.iter().all(|c| c.auto_resolvable));

        let report = resolver.resolve_all(&conflicts, true);
        assert_eq!(report.auto_resolved, 2);
        assert_eq!(report.failed_resolutions, 0);

        let merged: serde_json::Value = serde_json::from_str(&local.read(".claude/settings.json")).unwrap();
        assert_eq!(merged["user_key"], serde_json::json!(true));
        assert_eq!(merged["hooks"]["enabled"], serde_json::json!(true));
        assert_eq!(merged["permissions"]["allow"], serde_json::json!(["Read"]));
        assert!(local.root().join(".claude/settings.json.conflict_backup").is_file());

        // Only the local-only key is left as a difference
        let changes = DiffEngine::new(local.config.clone())
            .compare(local.root(), template.root())
            .unwrap();
        let settings: Vec<_> = changes.for_file(Path::new(".claude/settings.json"));
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].change_type, ChangeType::Removed);
        assert_eq!(settings[0].section.as_deref(), Some("user_key"));
    }

    #[test]
    fn test_move_backup_between_trees() {
        let source = MigratusTestHarness::with_template("1.1.0");
        let destination = MigratusTestHarness::new();
        let outbox = TempDir::new().unwrap();

        let source_backups = BackupManager::new(source.config.clone()).unwrap();
        let backup = source_backups.create_backup("Portable").unwrap();
        let exported = source_backups.export_backup(&backup.name, outbox.path()).unwrap();
        assert_eq!(exported, outbox.path().join(format!("{}.zip", backup.name)));

        let destination_backups = BackupManager::new(destination.config.clone()).unwrap();
        let imported = destination_backups.import_backup(&exported, Some("from_source")).unwrap();
        assert_eq!(imported.name, "from_source");
        assert_eq!(imported.files_count, backup.files_count);
        assert_eq!(imported.checksum, backup.checksum);
        assert!(destination_backups.verify_backup("from_source").unwrap().is_valid());

        // Same name twice is refused
        assert!(matches!(
            destination_backups.import_backup(&exported, Some("from_source")),
            Err(MigratusError::BackupCreationFailed { .. })
        ));

        let result = destination_backups.restore_backup("from_source", true);
        assert!(result.is_success(), "{:?}", result);
        assert_eq!(destination.tracked_files(), source.tracked_files());
        assert_eq!(
            VersionManager::new(destination.config.clone()).unwrap().detect_current_version(),
            Some(Version::new(1, 1, 0))
        );
    }

    #[test]
    fn test_template_drift_report() {
        let local = MigratusTestHarness::with_template("1.1.0");
        let template = MigratusTestHarness::with_template("1.1.0");
        fs::rename(
            template.root().join(".claude/commands/test.md"),
            template.root().join(".claude/commands/check.md"),
        )
        .unwrap();
        template.write(".claude/commands/deploy.md", "# Deploy\nShip it.\n");
        template.write(
            ".mcp.json",
            "{\n  \"mcpServers\": {\n    \"docs\": {\"command\": \"docs-server\"}\n  }\n}\n",
        );

        let changes = DiffEngine::new(local.config.clone())
            .compare(local.root(), template.root())
            .unwrap();
        let summary = changes.summary();
        assert_eq!(summary.by_type.moved, 1);
        assert_eq!(summary.by_type.added, 2);
        assert_eq!(summary.by_impact.critical, 1);

        let moved = changes.iter().find(|c| c.change_type == ChangeType::Moved).unwrap();
        assert_eq!(moved.file_path, Path::new(".claude/commands/check.md"));
        assert_eq!(moved.old_content.as_deref(), Some(".claude/commands/test.md"));

        let deploy = changes
            .for_file(Path::new(".claude/commands/deploy.md"))
            .into_iter()
            .next()
            .unwrap();
        assert!(deploy.auto_mergeable);

        let critical = changes.by_impact(ImpactLevel::Critical);
        assert_eq!(critical[0].section.as_deref(), Some("mcpServers.docs"));
        assert!(!critical[0].auto_mergeable);
    }
}
