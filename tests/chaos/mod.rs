//! Chaos tests for Migratus
//!
//! Damages archives, the backup store and the tree itself in deterministic
//! ways and checks that every component fails closed: bad archives are
//! skipped or rejected, and a rejected restore leaves the tree untouched.

use ::migratus::*;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Kinds of damage applied to a valid archive
#[derive(Debug, Clone, Copy)]
pub enum ArchiveDamage {
    /// Keep only the first half of the bytes
    Truncate,
    /// Flip every byte in the middle third
    FlipMiddle,
    /// Replace the whole file with text
    Overwrite,
}

impl ArchiveDamage {
    pub const ALL: [ArchiveDamage; 3] = [ArchiveDamage::Truncate, ArchiveDamage::FlipMiddle, ArchiveDamage::Overwrite];

    pub fn apply(self, path: &Path) {
        let mut bytes = fs::read(path).unwrap();
        match self {
            ArchiveDamage::Truncate => bytes.truncate(bytes.len() / 2),
            ArchiveDamage::FlipMiddle => {
                let third = bytes.len() / 3;
                for b in &mut bytes[third..2 * third] {
                    *b = !*b;
                }
            }
            ArchiveDamage::Overwrite => bytes = b"definitely not a zip archive".to_vec(),
        }
        fs::write(path, bytes).unwrap();
    }
}

/// A seeded tree with one good backup
pub struct ChaosFixture {
    pub temp_dir: TempDir,
    pub backups: BackupManager,
    pub good: BackupInfo,
}

impl ChaosFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join(".claude/commands")).unwrap();
        fs::write(root.join("CLAUDE.md"), "# Project\n\n## Rules\nbe careful\n").unwrap();
        fs::write(root.join(".claude/settings.json"), r#"{"permissions": {}}"#).unwrap();
        fs::write(root.join(".claude/commands/build.md"), "# Build\n").unwrap();
        fs::write(root.join(".version"), "1.0.0\n").unwrap();

        let backups = BackupManager::new(TreeConfig::new(root)).unwrap();
        let good = backups.create_backup("Known good").unwrap();
        Self { temp_dir, backups, good }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Copy the good archive into the store under `name` and damage it
    pub fn damaged_copy(&self, name: &str, damage: ArchiveDamage) -> PathBuf {
        let path = self.backups.archive_path(name);
        fs::copy(&self.good.path, &path).unwrap();
        damage.apply(&path);
        path
    }

    /// Write a hand-built archive into the store
    pub fn crafted(&self, name: &str, members: &[(&str, &[u8])]) -> PathBuf {
        let path = self.backups.archive_path(name);
        write_archive(&path, members);
        path
    }

    /// Every file outside the store
    pub fn tree(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let store = self.backups.backups_path();
        walkdir::WalkDir::new(self.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && !e.path().starts_with(&store))
            .map(|e| (e.path().to_path_buf(), fs::read(e.path()).unwrap()))
            .collect()
    }
}

impl Default for ChaosFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn write_archive(path: &Path, members: &[(&str, &[u8])]) {
    let mut zip = ZipWriter::new(fs::File::create(path).unwrap());
    for (name, bytes) in members {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

pub fn manifest_json(checksums: &[(&str, &str)]) -> Vec<u8> {
    let manifest = BackupManifest {
        timestamp: chrono::Utc::now(),
        description: "Crafted".to_string(),
        files_count: checksums.len(),
        total_size: 0,
        version: None,
        backup_patterns: Vec::new(),
        exclude_patterns: Vec::new(),
        checksums: checksums
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    };
    serde_json::to_vec(&manifest).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damaged_archives_are_skipped() {
        let fixture = ChaosFixture::new();
        for (i, damage) in ArchiveDamage::ALL.iter().enumerate() {
            fixture.damaged_copy(&format!("damaged_{}", i), *damage);
        }
        // Files without the archive extension are never considered
        fs::write(fixture.backups.backups_path().join("notes.txt"), "ignore me").unwrap();

        let listed = fixture.backups.list_backups().unwrap();
        let names: Vec<&str> = listed.iter().map(|b| b.name.as_str()).collect();
        // Flipping bytes inside compressed data can leave the manifest readable
        assert!(names.contains(&fixture.good.name.as_str()));
        assert!(!names.contains(&"damaged_0"));
        assert!(!names.contains(&"damaged_2"));
        assert!(matches!(
            fixture.backups.get_backup("damaged_2"),
            Err(MigratusError::InvalidBackup { .. })
        ));

        // Cleanup only ever sees readable archives
        let deleted = fixture.backups.cleanup_old_backups(0).unwrap();
        assert_eq!(deleted, listed.len());
        assert!(fixture.backups.archive_path("damaged_2").exists());
    }

    #[test]
    fn test_damaged_restore_leaves_tree_untouched() {
        let fixture = ChaosFixture::new();
        fs::write(fixture.root().join("CLAUDE.md"), "# Edited after backup\n").unwrap();
        let before = fixture.tree();

        for (i, damage) in [ArchiveDamage::Truncate, ArchiveDamage::Overwrite].iter().enumerate() {
            let name = format!("damaged_{}", i);
            fixture.damaged_copy(&name, *damage);

            let result = fixture.backups.restore_backup(&name, true);
            assert_eq!(result.status, MigrationStatus::Failed, "{:?}", damage);
            assert!(!result.errors.is_empty());
            assert_eq!(fixture.tree(), before);
        }
        // No safety backup was taken for the rejected restores
        assert_eq!(fixture.backups.list_backups().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_manifest_is_rejected() {
        let fixture = ChaosFixture::new();
        let outside = TempDir::new().unwrap();

        let no_manifest = outside.path().join("no_manifest.zip");
        write_archive(&no_manifest, &[("CLAUDE.md", &b"# Hi\n"[..])]);
        let bad_manifest = outside.path().join("bad_manifest.zip");
        write_archive(
            &bad_manifest,
            &[("CLAUDE.md", &b"# Hi\n"[..]), ("backup_metadata.json", &b"{not json"[..])],
        );
        let not_zip = outside.path().join("not_zip.zip");
        fs::write(&not_zip, "plain text").unwrap();

        for source in [&no_manifest, &bad_manifest, &not_zip] {
            assert!(
                matches!(
                    fixture.backups.import_backup(source, None),
                    Err(MigratusError::InvalidBackup { .. })
                ),
                "{:?} was imported",
                source
            );
        }
        assert!(matches!(
            fixture.backups.import_backup(&outside.path().join("absent.zip"), None),
            Err(MigratusError::InvalidBackup { .. })
        ));
        assert_eq!(fixture.backups.list_backups().unwrap().len(), 1);
    }

    #[test]
    fn test_escaping_members_are_refused() {
        let fixture = ChaosFixture::new();
        let manifest = manifest_json(&[]);
        fixture.crafted(
            "escape",
            &[
                ("CLAUDE.md", &b"# overwritten\n"[..]),
                ("../escaped.md", &b"outside"[..]),
                ("backup_metadata.json", manifest.as_slice()),
            ],
        );
        let before = fixture.tree();

        let result = fixture.backups.restore_backup("escape", true);
        assert_eq!(result.status, MigrationStatus::Failed);
        assert_eq!(fixture.tree(), before);
        assert!(!fixture.root().parent().unwrap().join("escaped.md").exists());

        let verification = fixture.backups.verify_backup("escape").unwrap();
        assert_eq!(verification.unexpected, vec!["../escaped.md".to_string()]);
        assert!(!verification.is_valid());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let fixture = ChaosFixture::new();
        assert!(fixture.backups.verify_backup(&fixture.good.name).unwrap().is_valid());

        let manifest = manifest_json(&[("CLAUDE.md", "0000"), ("gone.md", "1111")]);
        fixture.crafted(
            "tampered",
            &[
                ("CLAUDE.md", &b"# tampered\n"[..]),
                ("extra.md", &b"# extra\n"[..]),
                ("backup_metadata.json", manifest.as_slice()),
            ],
        );

        let verification = fixture.backups.verify_backup("tampered").unwrap();
        assert_eq!(verification.files_checked, 2);
        assert_eq!(verification.mismatched, vec!["CLAUDE.md".to_string()]);
        assert_eq!(verification.missing, vec!["gone.md".to_string()]);
        assert_eq!(verification.unexpected, vec!["extra.md".to_string()]);

        // Restore refuses the tampered member before writing anything
        let before = fixture.tree();
        assert!(matches!(
            fixture.backups.try_restore("tampered", true),
            Err(MigratusError::ChecksumMismatch { ref path, .. }) if path == "CLAUDE.md"
        ));
        assert_eq!(fixture.tree(), before);
        assert_eq!(fixture.backups.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_damaged_version_records() {
        let fixture = ChaosFixture::new();
        let config = TreeConfig::new(fixture.root());
        let versions = VersionManager::new(config.clone()).unwrap();
        versions.create_metadata(Version::new(1, 0, 0), "default", None, None).unwrap();

        fs::write(fixture.root().join(".metadata.json"), "{\"version\": ").unwrap();
        assert_eq!(versions.load_metadata(), None);
        assert!(versions.is_migration_needed().unwrap());

        // With no readable version anywhere the latest catalog entry is offered
        fs::write(fixture.root().join(".version"), "garbage\n").unwrap();
        let mut assistant = UpgradeAssistant::new(config).unwrap();
        let latest = assistant.check_for_upgrades().unwrap();
        assert_eq!(latest, Version::new(2, 0, 1));

        let result = assistant.perform_upgrade(&latest, true);
        assert!(result.is_success(), "{:?}", result);
        assert_eq!(result.source_version, None);
        assert_eq!(versions.load_metadata().unwrap().version, latest);
        assert!(!versions.is_migration_needed().unwrap());
    }

    #[test]
    fn test_broken_json_side_is_not_merged() {
        let fixture = ChaosFixture::new();
        let remote = TempDir::new().unwrap();
        fs::create_dir_all(remote.path().join(".claude")).unwrap();
        fs::write(remote.path().join(".claude/settings.json"), "{\"permissions\": ").unwrap();

        let resolver = ConflictResolver::new(TreeConfig::new(fixture.root()));
        let conflicts = resolver.detect_conflicts(fixture.root(), remote.path()).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::Structure);

        let before = fixture.tree();
        let report = resolver.resolve_all(&conflicts, true);
        assert_eq!(report.manual_required, 1);
        assert_eq!(report.auto_resolved, 0);
        assert_eq!(fixture.tree(), before);
    }
}
