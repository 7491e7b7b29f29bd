//! Main test module for Migratus
//!
//! This module includes all test suites:
//! - Integration tests for complete workflows
//! - Chaos tests for damaged archives and trees
//! - Property-based tests for invariants

pub mod integration;
pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::migratus::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_empty_tree() {
        let temp_dir = TempDir::new().unwrap();
        let backups = BackupManager::new(TreeConfig::new(temp_dir.path())).unwrap();

        // Snapshot of a tree with no tracked files
        let backup = backups.create_backup("Empty").unwrap();
        assert_eq!(backup.files_count, 0);
        assert_eq!(backup.version, None);

        // Tracked files created later are removed by the restore
        write(temp_dir.path(), "CLAUDE.md", "# Added later\n");
        write(temp_dir.path(), ".claude/commands/new.md", "# New\n");
        let report = backups.try_restore(&backup.name, true).unwrap();
        assert!(report.files_restored.is_empty());
        assert_eq!(report.files_removed.len(), 2);
        assert!(!temp_dir.path().join("CLAUDE.md").exists());
        assert!(!temp_dir.path().join(".claude/commands").exists());
        // The store itself survives pruning
        assert!(backups.backups_path().is_dir());
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let names = [
            "file with spaces.md",
            "file-with-dashes.md",
            "file.multiple.dots.md",
            "файл.md",
            "文件.md",
            "émoji-🚀.md",
        ];
        for name in &names {
            write(temp_dir.path(), &format!(".claude/commands/{}", name), name);
        }

        let backups = BackupManager::new(TreeConfig::new(temp_dir.path())).unwrap();
        let backup = backups.create_backup("Special names").unwrap();
        assert_eq!(backup.files_count, names.len());

        for name in &names {
            fs::remove_file(temp_dir.path().join(".claude/commands").join(name)).unwrap();
        }
        backups.try_restore(&backup.name, true).unwrap();

        for name in &names {
            let content = fs::read_to_string(temp_dir.path().join(".claude/commands").join(name)).unwrap();
            assert_eq!(content, *name);
        }
        assert!(backups.verify_backup(&backup.name).unwrap().is_valid());
    }

    #[test]
    fn test_backup_names_cannot_escape_store() {
        let temp_dir = TempDir::new().unwrap();
        let backups = BackupManager::new(TreeConfig::new(temp_dir.path())).unwrap();

        for name in ["", ".", "../outside", "a/b", "a\\b"] {
            assert!(
                matches!(backups.try_restore(name, true), Err(MigratusError::InvalidBackupName(_))),
                "name {:?} accepted",
                name
            );
            assert!(backups.delete_backup(name).is_err());
        }
        assert!(matches!(
            backups.try_restore("backup_missing", true),
            Err(MigratusError::BackupNotFound(_))
        ));
        assert!(!backups.delete_backup("backup_missing").unwrap());
    }

    #[test]
    fn test_version_sources_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let versions = VersionManager::new(TreeConfig::new(temp_dir.path())).unwrap();
        assert_eq!(versions.detect_current_version(), None);

        write(temp_dir.path(), ".claude/settings.json", r#"{"version": "1.1.0"}"#);
        assert_eq!(
            versions.detect_current_version_with_source(),
            Some((Version::new(1, 1, 0), VersionSource::Settings))
        );

        // Documentation examples are not declarations
        write(
            temp_dir.path(),
            "CLAUDE.md",
            "# Guide\nUse semantic versioning, for example version: 9.9.9\n",
        );
        assert_eq!(
            versions.detect_current_version_with_source().map(|(_, s)| s),
            Some(VersionSource::Settings)
        );

        write(temp_dir.path(), "CLAUDE.md", "# SuperClaude v1.2.0\n\nRules follow.\n");
        assert_eq!(
            versions.detect_current_version_with_source(),
            Some((Version::new(1, 2, 0), VersionSource::Instructions))
        );

        // An unparsable marker is skipped, a valid one wins
        write(temp_dir.path(), ".version", "not a version\n");
        assert_eq!(versions.detect_current_version(), Some(Version::new(1, 2, 0)));
        write(temp_dir.path(), ".version", "2.0.0\n");
        assert_eq!(
            versions.detect_current_version_with_source(),
            Some((Version::new(2, 0, 0), VersionSource::Marker))
        );
    }

    #[test]
    fn test_checksum_ignores_untracked_files() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "CLAUDE.md", "# Project\n");
        let versions = VersionManager::new(TreeConfig::new(temp_dir.path())).unwrap();
        let checksum = versions.calculate_checksum().unwrap();

        write(temp_dir.path(), "notes.txt", "scratch\n");
        write(temp_dir.path(), ".claude/personas/arch.md", "# Architect\n");
        assert_eq!(versions.calculate_checksum().unwrap(), checksum);

        write(temp_dir.path(), "CLAUDE.md", "# Project v2\n");
        assert_ne!(versions.calculate_checksum().unwrap(), checksum);
    }

    #[test]
    fn test_diff_of_missing_trees() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "new/CLAUDE.md", "# Project\n");

        let engine = DiffEngine::new(TreeConfig::default());
        let changes = engine
            .compare(&temp_dir.path().join("absent"), &temp_dir.path().join("new"))
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.changes()[0].change_type, ChangeType::Added);
        // The instructions document is never merged without review
        assert!(!changes.changes()[0].auto_mergeable);

        let none = engine
            .compare(&temp_dir.path().join("absent"), &temp_dir.path().join("also_absent"))
            .unwrap();
        assert!(none.is_empty());
    }
}
