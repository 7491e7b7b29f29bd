//! Property-based testing for Migratus
//!
//! Uses proptest to verify invariants across randomly generated versions,
//! documents and trees.

use ::migratus::diff::{edit_script, LineEdit};
use ::migratus::document::SectionedDocument;
use ::migratus::*;
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Generate a version, sometimes with a pre-release tag
fn version_strategy() -> impl Strategy<Value = Version> {
    (0u64..20, 0u64..20, 0u64..20, proptest::option::of("[a-z]{1,5}(\\.[0-9]{1,2})?"))
        .prop_map(|(major, minor, patch, pre)| {
            let version = Version::new(major, minor, patch);
            match pre {
                Some(tag) => version.with_pre_release(tag),
                None => version,
            }
        })
}

/// Generate command templates keyed by file name
fn commands_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z]{1,8}\\.md", "[ -~]{0,64}", 1..8)
}

/// Generate a flat JSON object
fn settings_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-f]", 0i64..4, 0..6).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()
    })
}

/// Generate a markdown-ish document with a trailing newline
fn document_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            "#{1,3} [A-Za-z]{1,8}".prop_map(|s| s),
            "[a-z ]{0,20}".prop_map(|s| s),
            Just("```".to_string()),
        ],
        0..20,
    )
    .prop_map(|lines| lines.into_iter().map(|l| l + "\n").collect())
}

fn write_commands(root: &Path, commands: &BTreeMap<String, String>, reverse: bool) {
    let dir = root.join(".claude").join("commands");
    fs::create_dir_all(&dir).unwrap();
    let mut entries: Vec<_> = commands.iter().collect();
    if reverse {
        entries.reverse();
    }
    for (name, content) in entries {
        fs::write(dir.join(name), content).unwrap();
    }
}

fn tracked(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let dir = root.join(".claude").join("commands");
    fs::read_dir(&dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| (e.file_name().to_string_lossy().into_owned(), fs::read(e.path()).unwrap()))
                .collect()
        })
        .unwrap_or_default()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Test that a version survives formatting and parsing
    #[test]
    fn version_display_round_trip(version in version_strategy()) {
        let parsed = Version::parse(&version.to_string()).unwrap();
        prop_assert_eq!(parsed, version);
    }

    /// Test that release ordering follows the numeric triple
    #[test]
    fn version_ordering_matches_triple(
        a in (0u64..5, 0u64..5, 0u64..5),
        b in (0u64..5, 0u64..5, 0u64..5),
    ) {
        let va = Version::new(a.0, a.1, a.2);
        let vb = Version::new(b.0, b.1, b.2);
        prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        prop_assert_eq!(va == vb, a == b);
    }

    /// Test that a pre-release sorts below its release
    #[test]
    fn pre_release_below_release(version in version_strategy(), tag in "[a-z]{1,5}") {
        let release = Version::new(version.major(), version.minor(), version.patch());
        prop_assert!(release.with_pre_release(tag) < release);
    }

    /// Test that confidence is always a probability
    #[test]
    fn confidence_is_bounded(raw in prop::num::f64::ANY) {
        let value = Confidence::new(raw).value();
        prop_assert!((0.0..=1.0).contains(&value));
    }

    /// Test that an edit script replays both sides exactly
    #[test]
    fn edit_script_replays_both_sides(
        old in prop::collection::vec("[abc]", 0..12),
        new in prop::collection::vec("[abc]", 0..12),
    ) {
        let old: Vec<&str> = old.iter().map(String::as_str).collect();
        let new: Vec<&str> = new.iter().map(String::as_str).collect();
        let script = edit_script(&old, &new, false);

        let mut replay_old = Vec::new();
        let mut replay_new = Vec::new();
        for edit in &script {
            match *edit {
                LineEdit::Keep { old: o, new: n } => {
                    prop_assert_eq!(old[o], new[n]);
                    replay_old.push(old[o]);
                    replay_new.push(new[n]);
                }
                LineEdit::Delete { old: o } => replay_old.push(old[o]),
                LineEdit::Insert { new: n } => replay_new.push(new[n]),
            }
        }
        prop_assert_eq!(replay_old, old);
        prop_assert_eq!(replay_new, new);
    }

    /// Test that parsing and rendering a document is lossless
    #[test]
    fn document_render_round_trip(content in document_strategy()) {
        prop_assert_eq!(SectionedDocument::parse(&content).render(), content);
    }

    /// Test that swapping the sides of a JSON diff swaps added and removed
    #[test]
    fn json_compare_is_mirrored(a in settings_strategy(), b in settings_strategy()) {
        let engine = DiffEngine::new(TreeConfig::default());
        let path = Path::new(".claude/settings.json");
        let a = serde_json::to_vec(&Value::Object(a)).unwrap();
        let b = serde_json::to_vec(&Value::Object(b)).unwrap();

        let forward = ChangeSummary::from_changes(&engine.compare_contents(path, &a, &b));
        let backward = ChangeSummary::from_changes(&engine.compare_contents(path, &b, &a));
        prop_assert_eq!(forward.by_type.added, backward.by_type.removed);
        prop_assert_eq!(forward.by_type.removed, backward.by_type.added);
        prop_assert_eq!(forward.by_type.modified, backward.by_type.modified);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Test that the checksum depends on content only
    #[test]
    fn checksum_is_deterministic(commands in commands_strategy()) {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_commands(first.path(), &commands, false);
        write_commands(second.path(), &commands, true);

        let checksum = |root: &Path| {
            VersionManager::new(TreeConfig::new(root)).unwrap().calculate_checksum().unwrap()
        };
        let expected = checksum(first.path());
        prop_assert_eq!(&checksum(second.path()), &expected);

        let (name, content) = commands.iter().next().unwrap();
        fs::write(first.path().join(".claude/commands").join(name), format!("{}!", content)).unwrap();
        prop_assert_ne!(checksum(first.path()), expected);
    }

    /// Test that restoring a backup reproduces the backed up tree
    #[test]
    fn backup_restore_identity(
        original in commands_strategy(),
        replacement in commands_strategy(),
    ) {
        let temp = TempDir::new().unwrap();
        write_commands(temp.path(), &original, false);
        let expected = tracked(temp.path());

        let backups = BackupManager::new(TreeConfig::new(temp.path())).unwrap();
        let backup = backups.create_backup("Property").unwrap();
        prop_assert_eq!(backup.files_count, original.len());

        fs::remove_dir_all(temp.path().join(".claude/commands")).unwrap();
        write_commands(temp.path(), &replacement, false);

        backups.try_restore(&backup.name, true).unwrap();
        prop_assert_eq!(tracked(temp.path()), expected);
    }
}
