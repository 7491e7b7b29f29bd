//! # Migratus CLI - Keep configuration trees upgradeable
//!
//! Command-line front end for the migratus library. The library never
//! prints; everything here renders the records it returns.
//!
//! ## Usage
//! ```bash
//! # What version is this project, and has it drifted?
//! migratus status
//!
//! # Preview and perform the next upgrade
//! migratus check
//! migratus preview 1.2.0
//! migratus upgrade
//!
//! # Manage backups
//! migratus backup create -m "Before cleanup"
//! migratus backup list
//! migratus backup restore backup_20240501_100000 --yes
//!
//! # Compare with a template and reconcile
//! migratus diff . ../template --summary
//! migratus conflicts . ../template --apply
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use migratus::{
    BackupInfo, BackupManager, ChangeSet, ConflictResolver, DiffEngine, ImpactLevel, MigrationResult,
    MigrationStatus, ResolutionReport, TreeConfig, UpgradeAssistant, Version, VersionManager,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Migratus CLI - Version, back up, diff and upgrade configuration trees
#[derive(Parser)]
#[command(name = "migratus")]
#[command(version)]
#[command(about = "Lifecycle management for project configuration trees")]
#[command(long_about = None)]
struct Cli {
    /// Configuration root (defaults to current directory)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Tree configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version, checksum and drift
    Status,

    /// Show the next available upgrade
    Check,

    /// Describe an upgrade without applying it
    Preview {
        /// Target version
        target: String,
    },

    /// Upgrade the tree
    Upgrade {
        /// Target version (defaults to the next available)
        target: Option<String>,

        /// Skip the pre-upgrade backup
        #[arg(long)]
        no_backup: bool,
    },

    /// Restore a pre-upgrade backup
    Rollback {
        /// Backup name
        backup: String,
    },

    /// Manage backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Compare two trees
    Diff {
        /// Old tree
        old: PathBuf,

        /// New tree
        new: PathBuf,

        /// Show only the summary
        #[arg(long)]
        summary: bool,
    },

    /// Detect and resolve conflicts between a local and a remote tree
    Conflicts {
        /// Local tree
        local: PathBuf,

        /// Remote (template) tree
        remote: PathBuf,

        /// Write high-confidence resolutions
        #[arg(long)]
        apply: bool,
    },

    /// Write the default tree configuration
    InitConfig {
        /// Output file
        #[arg(short, long, default_value = "migratus.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum BackupCommand {
    /// Create a backup
    Create {
        /// Description
        #[arg(short, long, default_value = "Manual backup")]
        message: String,
    },

    /// List backups, newest first
    #[command(alias = "ls")]
    List,

    /// Restore a backup
    Restore {
        /// Backup name
        name: String,

        /// Confirm the restore
        #[arg(long)]
        yes: bool,
    },

    /// Delete a backup
    Delete {
        /// Backup name
        name: String,
    },

    /// Delete all but the most recent backups
    Cleanup {
        /// Number of backups to keep
        #[arg(long, default_value = "5")]
        keep: usize,
    },

    /// Copy a backup out of the store
    Export {
        /// Backup name
        name: String,

        /// Destination file or directory
        dest: PathBuf,
    },

    /// Copy an archive into the store
    Import {
        /// Archive to import
        file: PathBuf,

        /// Name in the store
        #[arg(long)]
        name: Option<String>,
    },

    /// Check an archive against its manifest
    Verify {
        /// Backup name
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("migratus=debug"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Run a command; `Ok(false)` means it completed but reported failure
fn run(cli: Cli) -> Result<bool> {
    let config = load_config(cli.path.as_deref(), cli.config.as_deref())?;
    let out = Output { json: cli.json };

    match cli.command {
        Commands::Status => cmd_status(config, out),
        Commands::Check => cmd_check(config, out),
        Commands::Preview { target } => cmd_preview(config, out, &target),
        Commands::Upgrade { target, no_backup } => cmd_upgrade(config, out, target.as_deref(), !no_backup),
        Commands::Rollback { backup } => {
            let assistant = UpgradeAssistant::new(config)?;
            Ok(out.result(&assistant.rollback_upgrade(&backup)))
        }
        Commands::Backup(command) => cmd_backup(config, out, command),
        Commands::Diff { old, new, summary } => cmd_diff(config, out, &old, &new, summary),
        Commands::Conflicts { local, remote, apply } => cmd_conflicts(config, out, &local, &remote, apply),
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                bail!("{} already exists. Use --force to overwrite.", output.display());
            }
            TreeConfig::default().save(&output)?;
            println!("{} Wrote default configuration to {}", "✓".green().bold(), output.display().to_string().cyan());
            Ok(true)
        }
    }
}

fn load_config(path: Option<&Path>, config_file: Option<&Path>) -> Result<TreeConfig> {
    let config = match config_file {
        Some(file) => {
            let config = TreeConfig::from_file(file)
                .with_context(|| format!("Failed to load configuration from {}", file.display()))?;
            match path {
                Some(root) => config.rebased(root),
                None => config,
            }
        }
        None => TreeConfig::new(path.unwrap_or(Path::new("."))),
    };
    config.validate()?;
    Ok(config)
}

fn parse_version(text: &str) -> Result<Version> {
    Version::parse(text).with_context(|| format!("'{}' is not a version", text))
}

/// Renders either colored text or JSON
#[derive(Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    /// Print `value` as JSON when requested; returns whether it did
    fn emit_json<T: Serialize>(&self, value: &T) -> Result<bool> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Ok(self.json)
    }

    /// Print a result record; returns whether it succeeded
    fn result(&self, result: &MigrationResult) -> bool {
        if self.json {
            match serde_json::to_string_pretty(result) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("{}: {}", "Error".red().bold(), e),
            }
            return result.is_success();
        }

        let status = match result.status {
            MigrationStatus::Success => "✓".green().bold(),
            MigrationStatus::RollbackRequired => "!!".red().bold(),
            _ => "✗".red().bold(),
        };
        println!("{} {}", status, result.message);
        if let (Some(from), Some(to)) = (&result.source_version, &result.target_version) {
            println!("  Versions: {} → {}", from.cyan(), to.cyan());
        }
        if let Some(backup) = &result.backup_path {
            println!("  Backup: {}", backup.display().to_string().cyan());
        }
        if !result.files_affected.is_empty() {
            println!("  Files affected:");
            for file in &result.files_affected {
                println!("    {}", file.display());
            }
        }
        for warning in &result.warnings {
            println!("  {} {}", "warning:".yellow().bold(), warning);
        }
        for error in &result.errors {
            println!("  {} {}", "error:".red().bold(), error);
        }
        if result.needs_rollback() {
            println!(
                "\n{}",
                "The configuration could not be restored automatically and needs manual recovery."
                    .red()
                    .bold()
            );
        }
        result.is_success()
    }
}

fn cmd_status(config: TreeConfig, out: Output) -> Result<bool> {
    let manager = VersionManager::new(config)?;
    let detected = manager.detect_current_version_with_source();
    let checksum = manager.calculate_checksum()?;
    let migration_needed = manager.is_migration_needed()?;
    let metadata = manager.load_metadata();

    let report = serde_json::json!({
        "root": manager.config().root_path,
        "version": detected.as_ref().map(|(v, _)| v.to_string()),
        "source": detected.as_ref().map(|(_, s)| s),
        "checksum": checksum,
        "migration_needed": migration_needed,
        "metadata": metadata,
    });
    if out.emit_json(&report)? {
        return Ok(true);
    }

    println!("{}", "Configuration Status".bold().underline());
    println!("  Root: {}", manager.config().root_path.display().to_string().cyan());
    match &detected {
        Some((version, source)) => println!("  Version: {} (from {:?})", version.to_string().green().bold(), source),
        None => println!("  Version: {}", "not detected".yellow()),
    }
    println!("  Checksum: {}", checksum[..16].dimmed());
    match &metadata {
        Some(metadata) => println!("  Metadata updated: {}", metadata.updated_at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("  Metadata: {}", "none".yellow()),
    }
    if migration_needed {
        println!("  {}", "Migration needed".yellow().bold());
    } else {
        println!("  {}", "Up to date".green());
    }
    Ok(true)
}

fn cmd_check(config: TreeConfig, out: Output) -> Result<bool> {
    let assistant = UpgradeAssistant::new(config)?;
    let next = assistant.check_for_upgrades();
    let entry = next.as_ref().and_then(|v| assistant.catalog().get(v));

    if out.emit_json(&serde_json::json!({ "next": next, "description": entry.map(|e| &e.description) }))? {
        return Ok(true);
    }
    match (next, entry) {
        (Some(version), Some(entry)) => println!(
            "{} Upgrade available: {} - {}",
            "→".blue().bold(),
            version.to_string().green().bold(),
            entry.description
        ),
        (Some(version), None) => println!("{} Upgrade available: {}", "→".blue().bold(), version.to_string().green().bold()),
        (None, _) => println!("{} Configuration is up to date", "✓".green().bold()),
    }
    Ok(true)
}

fn cmd_preview(config: TreeConfig, out: Output, target: &str) -> Result<bool> {
    let assistant = UpgradeAssistant::new(config)?;
    let preview = assistant.get_upgrade_preview(&parse_version(target)?);
    if out.emit_json(&preview)? {
        return Ok(true);
    }

    let current = preview
        .current_version
        .as_ref()
        .map_or_else(|| "unknown".to_string(), |v| v.to_string());
    println!(
        "{} {} → {}",
        "Upgrade preview".bold(),
        current.cyan(),
        preview.target_version.to_string().cyan()
    );
    if !preview.upgrade_available {
        println!("  {}", "No upgrade available to this version".yellow());
    }
    println!("  Steps:");
    for (i, step) in preview.steps.iter().enumerate() {
        println!("    {}. {}", i + 1, step);
    }
    println!("  Files:");
    for file in &preview.files {
        println!("    {}", file.display());
    }
    for risk in &preview.risks {
        println!("  {} {}", "risk:".yellow().bold(), risk);
    }
    Ok(true)
}

fn cmd_upgrade(config: TreeConfig, out: Output, target: Option<&str>, backup: bool) -> Result<bool> {
    let mut assistant = UpgradeAssistant::new(config)?;
    let target = match target {
        Some(text) => parse_version(text)?,
        None => match assistant.check_for_upgrades() {
            Some(next) => next,
            None => {
                if !out.json {
                    println!("{} Configuration is up to date", "✓".green().bold());
                }
                return Ok(true);
            }
        },
    };

    if !out.json {
        println!("{} {}", "Upgrading to".blue().bold(), target.to_string().yellow());
    }
    let result = assistant.perform_upgrade(&target, backup);
    Ok(out.result(&result))
}

fn cmd_backup(config: TreeConfig, out: Output, command: BackupCommand) -> Result<bool> {
    let manager = BackupManager::new(config)?;

    match command {
        BackupCommand::Create { message } => {
            let info = manager.create_backup(&message)?;
            if !out.emit_json(&info)? {
                println!("{} Created backup {}", "✓".green().bold(), info.name.yellow().bold());
                print_backup_details(&info);
            }
            Ok(true)
        }
        BackupCommand::List => {
            let backups = manager.list_backups()?;
            if out.emit_json(&backups)? {
                return Ok(true);
            }
            if backups.is_empty() {
                println!("No backups found");
                return Ok(true);
            }
            println!("{}", format!("Backups ({})", backups.len()).bold());
            for info in &backups {
                println!(
                    "  {} {} {} {}",
                    info.name.yellow(),
                    info.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    format_bytes(info.size_bytes).cyan(),
                    info.description
                );
            }
            println!("  Total: {}", format_bytes(manager.total_size()?).cyan());
            Ok(true)
        }
        BackupCommand::Restore { name, yes } => Ok(out.result(&manager.restore_backup(&name, yes))),
        BackupCommand::Delete { name } => {
            let deleted = manager.delete_backup(&name)?;
            if !out.emit_json(&serde_json::json!({ "name": name, "deleted": deleted }))? {
                if deleted {
                    println!("{} Deleted backup {}", "✓".green().bold(), name.yellow());
                } else {
                    println!("{} Backup {} not found", "✗".red().bold(), name.yellow());
                }
            }
            Ok(deleted)
        }
        BackupCommand::Cleanup { keep } => {
            let deleted = manager.cleanup_old_backups(keep)?;
            if !out.emit_json(&serde_json::json!({ "deleted": deleted, "kept": keep }))? {
                println!("{} Deleted {} old backup(s)", "✓".green().bold(), deleted.to_string().cyan());
            }
            Ok(true)
        }
        BackupCommand::Export { name, dest } => {
            let path = manager.export_backup(&name, &dest)?;
            if !out.emit_json(&serde_json::json!({ "name": name, "path": path }))? {
                println!("{} Exported {} to {}", "✓".green().bold(), name.yellow(), path.display().to_string().cyan());
            }
            Ok(true)
        }
        BackupCommand::Import { file, name } => {
            let info = manager.import_backup(&file, name.as_deref())?;
            if !out.emit_json(&info)? {
                println!("{} Imported backup {}", "✓".green().bold(), info.name.yellow().bold());
                print_backup_details(&info);
            }
            Ok(true)
        }
        BackupCommand::Verify { name } => {
            let report = manager.verify_backup(&name)?;
            let valid = report.is_valid();
            if !out.emit_json(&report)? {
                if valid {
                    println!(
                        "{} Backup {} is valid ({} files checked)",
                        "✓".green().bold(),
                        name.yellow(),
                        report.files_checked
                    );
                } else {
                    println!("{} Backup {} failed verification", "✗".red().bold(), name.yellow());
                    for path in &report.mismatched {
                        println!("  {} {}", "mismatch:".red(), path);
                    }
                    for path in &report.missing {
                        println!("  {} {}", "missing:".red(), path);
                    }
                    for path in &report.unexpected {
                        println!("  {} {}", "unexpected:".yellow(), path);
                    }
                }
            }
            Ok(valid)
        }
    }
}

fn print_backup_details(info: &BackupInfo) {
    println!("  Description: {}", info.description.cyan());
    println!("  Files: {}", info.files_count.to_string().cyan());
    println!("  Size: {}", format_bytes(info.size_bytes).cyan());
    if let Some(version) = &info.version {
        println!("  Version: {}", version.cyan());
    }
    println!("  Path: {}", info.path.display());
}

fn cmd_diff(config: TreeConfig, out: Output, old: &Path, new: &Path, summary_only: bool) -> Result<bool> {
    let changes = DiffEngine::new(config).compare(old, new)?;
    let summary = changes.summary();

    if out.json {
        if summary_only {
            out.emit_json(&summary)?;
        } else {
            out.emit_json(&serde_json::json!({ "summary": summary, "changes": changes }))?;
        }
        return Ok(true);
    }

    if !summary_only {
        print_changes(&changes);
    }
    println!("{}", "Summary".bold().underline());
    println!(
        "  {} changes: {} added, {} removed, {} modified, {} moved",
        summary.total_changes,
        summary.by_type.added.to_string().green(),
        summary.by_type.removed.to_string().red(),
        summary.by_type.modified.to_string().yellow(),
        summary.by_type.moved
    );
    println!(
        "  Impact: {} critical, {} high, {} medium, {} low",
        summary.by_impact.critical.to_string().red().bold(),
        summary.by_impact.high.to_string().red(),
        summary.by_impact.medium.to_string().yellow(),
        summary.by_impact.low
    );
    println!(
        "  {} auto-mergeable, {} require review",
        summary.auto_mergeable.to_string().green(),
        summary.requires_review.to_string().yellow()
    );
    Ok(true)
}

fn print_changes(changes: &ChangeSet) {
    for change in changes {
        let impact = match change.impact_level {
            ImpactLevel::Critical => change.impact_level.to_string().red().bold(),
            ImpactLevel::High => change.impact_level.to_string().red(),
            ImpactLevel::Medium => change.impact_level.to_string().yellow(),
            ImpactLevel::Low => change.impact_level.to_string().normal(),
        };
        let location = match (&change.section, change.line_number) {
            (Some(section), Some(line)) => format!(" [{}:{}]", section, line),
            (Some(section), None) => format!(" [{}]", section),
            (None, Some(line)) => format!(" [line {}]", line),
            (None, None) => String::new(),
        };
        println!(
            "  {:<8} {:<8} {}{} - {}",
            change.change_type.to_string(),
            impact,
            change.file_path.display(),
            location.dimmed(),
            change.description
        );
    }
}

fn cmd_conflicts(config: TreeConfig, out: Output, local: &Path, remote: &Path, apply: bool) -> Result<bool> {
    let resolver = ConflictResolver::new(config);
    let conflicts = resolver.detect_conflicts(local, remote)?;
    let report = resolver.resolve_all(&conflicts, apply);

    if out.emit_json(&report)? {
        return Ok(report.failed_resolutions == 0);
    }
    if conflicts.is_empty() {
        println!("{} No conflicts", "✓".green().bold());
        return Ok(true);
    }
    print_resolutions(&report, apply);
    Ok(report.failed_resolutions == 0)
}

fn print_resolutions(report: &ResolutionReport, applied: bool) {
    println!("{}", format!("Conflicts ({})", report.total_conflicts).bold());
    for resolution in &report.resolutions {
        let conflict = &resolution.conflict;
        let marker = if resolution.manual_review_required {
            "review".yellow()
        } else {
            "auto".green()
        };
        println!(
            "  {:<6} {} [{}] {} via {} ({})",
            marker,
            conflict.file_path.display(),
            conflict.location,
            conflict.description,
            resolution.strategy.to_string().cyan(),
            resolution.confidence
        );
    }
    if applied {
        println!(
            "  {} resolved automatically, {} need review, {} failed",
            report.auto_resolved.to_string().green(),
            report.manual_required.to_string().yellow(),
            report.failed_resolutions.to_string().red()
        );
        for file in &report.files_modified {
            println!("  modified {}", file.display());
        }
    } else {
        println!("  Run with {} to write high-confidence resolutions", "--apply".yellow());
    }
    for error in &report.errors {
        println!("  {} {}", "error:".red().bold(), error);
    }
}

/// Format bytes as human-readable string
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
