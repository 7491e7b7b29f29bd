//! Performance benchmarks for Migratus
//!
//! Tracks line diffing, tree comparison, checksum and backup times on
//! generated configuration trees.

#![cfg_attr(feature = "quick-bench", allow(dead_code))]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use migratus::diff::edit_script;
use migratus::{BackupManager, DiffEngine, TreeConfig, VersionManager};
use std::fs;
use std::hint::black_box;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Instructions document with `sections` sections of ten lines each
fn instructions(sections: usize, variant: usize) -> String {
    let mut doc = String::from("# Project\n\n");
    for s in 0..sections {
        doc.push_str(&format!("## Section {}\n", s));
        for l in 0..10 {
            // Every seventh line differs between variants
            if (s * 10 + l) % 7 == 0 {
                doc.push_str(&format!("line {} of section {} (variant {})\n", l, s, variant));
            } else {
                doc.push_str(&format!("line {} of section {}\n", l, s));
            }
        }
    }
    doc
}

/// Write a tree with `commands` command templates
fn populate(root: &Path, commands: usize, variant: usize) {
    let dir = root.join(".claude").join("commands");
    fs::create_dir_all(&dir).unwrap();
    fs::write(root.join("CLAUDE.md"), instructions(20, variant)).unwrap();
    fs::write(
        root.join(".claude").join("settings.json"),
        format!(
            "{{\"permissions\": {{\"allow\": [\"Read\"]}}, \"variant\": {}, \"mcpServers\": {{}}}}",
            variant
        ),
    )
    .unwrap();
    for i in 0..commands {
        let body = if i % 5 == 0 {
            format!("# Command {}\nvariant {}\n", i, variant)
        } else {
            format!("# Command {}\nunchanged\n", i)
        };
        fs::write(dir.join(format!("cmd_{}.md", i)), body).unwrap();
    }
}

/// Benchmark edit scripts of growing documents
fn bench_line_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_diff");
    group.measurement_time(Duration::from_secs(2));
    group.sample_size(20);

    for sections in [10, 50, 200].iter() {
        let old = instructions(*sections, 0);
        let new = instructions(*sections, 1);
        let old_lines: Vec<&str> = old.lines().collect();
        let new_lines: Vec<&str> = new.lines().collect();
        group.bench_with_input(BenchmarkId::from_parameter(sections), sections, |b, _| {
            b.iter(|| black_box(edit_script(&old_lines, &new_lines, false)))
        });
    }
    group.finish();
}

/// Benchmark full tree comparison
fn bench_compare_trees(c: &mut Criterion) {
    let mut group = c.benchmark_group("compare_trees");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(10);

    for commands in [10, 100, 500].iter() {
        let old = TempDir::new().unwrap();
        let new = TempDir::new().unwrap();
        populate(old.path(), *commands, 0);
        populate(new.path(), *commands, 1);
        let engine = DiffEngine::new(TreeConfig::default());

        group.bench_with_input(BenchmarkId::from_parameter(commands), commands, |b, _| {
            b.iter(|| black_box(engine.compare(old.path(), new.path()).unwrap()))
        });
    }
    group.finish();
}

/// Benchmark the tree checksum
fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    group.measurement_time(Duration::from_secs(2));
    group.sample_size(20);

    for commands in [10, 100, 500].iter() {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path(), *commands, 0);
        let versions = VersionManager::new(TreeConfig::new(temp_dir.path())).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(commands), commands, |b, _| {
            b.iter(|| black_box(versions.calculate_checksum().unwrap()))
        });
    }
    group.finish();
}

/// Benchmark archive creation
fn bench_create_backup(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_backup");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(10);

    for commands in [10, 100].iter() {
        let temp_dir = TempDir::new().unwrap();
        populate(temp_dir.path(), *commands, 0);
        let backups = BackupManager::new(TreeConfig::new(temp_dir.path())).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(commands), commands, |b, _| {
            b.iter(|| {
                let info = backups.create_backup("bench").unwrap();
                fs::remove_file(&info.path).unwrap();
                black_box(info)
            })
        });
    }
    group.finish();
}

// Quick benchmarks for development
#[cfg(feature = "quick-bench")]
criterion_group!(benches, bench_line_diff, bench_checksum);

#[cfg(not(feature = "quick-bench"))]
criterion_group!(
    benches,
    bench_line_diff,
    bench_compare_trees,
    bench_checksum,
    bench_create_backup
);

criterion_main!(benches);
