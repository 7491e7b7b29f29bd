//! # Migratus - Lifecycle management for configuration trees
//!
//! A library for keeping a project's on-disk configuration tree safe across
//! template upgrades: detect which version it is, snapshot it, compare it to
//! another tree, and reconcile conflicting edits without ever leaving it
//! half-modified.
//!
//! ## Overview
//!
//! Migratus is built from five components, leaves first:
//!
//! - **[`VersionManager`]**: parses and orders versions, detects the tree's
//!   current version from several sources, computes a content checksum and
//!   persists version and metadata records
//! - **[`BackupManager`]**: snapshots the tree into a self-describing zip
//!   archive; restores, lists, prunes, verifies, imports and exports archives
//! - **[`DiffEngine`]**: computes a typed, impact-classified change set between
//!   two trees
//! - **[`ConflictResolver`]**: finds conflicts between a local and a remote
//!   tree and resolves them with scored strategies
//! - **[`UpgradeAssistant`]**: backup → steps → rollback on failure → persist
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use migratus::{BackupManager, TreeConfig, UpgradeAssistant, VersionManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TreeConfig::new("./my_project");
//!
//! // Which version is this tree?
//! let versions = VersionManager::new(config.clone())?;
//! println!("Current version: {:?}", versions.detect_current_version());
//!
//! // Snapshot it
//! let backups = BackupManager::new(config.clone())?;
//! let backup = backups.create_backup("Before experimenting")?;
//! println!("Created backup {} ({} files)", backup.name, backup.files_count);
//!
//! // Upgrade to the next catalog version, rolling back on failure
//! let mut assistant = UpgradeAssistant::new(config)?;
//! if let Some(next) = assistant.check_for_upgrades() {
//!     let result = assistant.perform_upgrade(&next, true);
//!     println!("{}: {}", result.status, result.message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Comparing and Reconciling Trees
//!
//! ```rust,no_run
//! use migratus::{ConflictResolver, DiffEngine, TreeConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TreeConfig::new("./my_project");
//! let (local, template) = (Path::new("./my_project"), Path::new("./template"));
//!
//! let changes = DiffEngine::new(config.clone()).compare(local, template)?;
//! let summary = changes.summary();
//! println!("{} changes, {} need review", summary.total_changes, summary.requires_review);
//!
//! let resolver = ConflictResolver::new(config);
//! let conflicts = resolver.detect_conflicts(local, template)?;
//! let report = resolver.resolve_all(&conflicts, true);
//! println!("{} conflicts resolved automatically", report.auto_resolved);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Configuration tree
//!
//! The set of files selected by the include/exclude globs of a [`TreeConfig`]:
//! instructions document, structured settings, command and persona templates,
//! the version marker and the metadata record.
//!
//! ### Checksum
//!
//! SHA-256 over the sorted tracked paths and their bytes. It changes iff a
//! tracked file changes, so it detects drift since the metadata was written.
//!
//! ### Confidence
//!
//! A score in `[0, 1]` a resolution strategy assigns to its own result. Only
//! results scoring at least 0.8 are ever written without review.
//!
//! ## Error Handling
//!
//! Fallible operations return `Result<T, MigratusError>`. Operations that
//! report an outcome to a caller (restore, upgrade, rollback, migrate) return
//! a [`MigrationResult`] instead, whose status is one of `Success`, `Failed`
//! or `RollbackRequired`; the last one means the tree needs manual recovery.
//!
//! ## Module Organization
//!
//! - [`version`] and [`version_manager`]: versions, catalog, detection, metadata
//! - [`backup`]: archive creation, restore and store management
//! - [`diff_engine`], [`diff`] and [`document`]: change sets and line diffs
//! - [`conflict`]: conflict detection and resolution strategies
//! - [`upgrade`]: the upgrade workflow
//! - [`config`]: tree layout and file selection
//! - [`types`]: result records and the change vocabulary
//! - [`error`]: error types and handling

// Public API modules
pub mod backup;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod diff_engine;
pub mod document;
pub mod error;
pub mod structured;
pub mod types;
pub mod upgrade;
pub mod version;
pub mod version_manager;

// Internal modules (not part of public API)
mod file_tracking;
mod utils;

// Re-export main types for convenience
pub use backup::{BackupInfo, BackupManager, BackupManifest, BackupVerification, RestoreReport};
pub use config::{TreeConfig, TreeConfigBuilder};
pub use conflict::{
    Confidence, ConflictInfo, ConflictLocation, ConflictResolution, ConflictResolver, ConflictType,
    ResolutionReport, ResolutionStrategy,
};
pub use diff_engine::{ChangeSet, DiffEngine};
pub use error::{MigratusError, Result};
pub use types::*;
pub use upgrade::{FeatureStep, StepAction, UpgradeAssistant, UpgradeHook, UpgradePreview, UpgradeStep};
pub use version::{CatalogEntry, Version, VersionCatalog};
pub use version_manager::{ConfigMetadata, VersionManager, VersionSource};
