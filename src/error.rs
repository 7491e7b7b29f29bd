//! Error types for the migratus library
//!
//! Every fallible operation in the crate returns [`Result<T>`], whose error
//! side is [`MigratusError`]. The variants follow the lifecycle of a
//! configuration tree: version parsing, backup creation and restoration,
//! structured parsing, upgrade step execution and rollback.
//!
//! Operations that report a [`MigrationResult`](crate::types::MigrationResult)
//! (restore, upgrade, rollback) convert these errors into result records
//! instead of returning them.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the migratus library
pub type Result<T> = std::result::Result<T, MigratusError>;

/// Main error type for all migratus operations
#[derive(Debug, Error)]
pub enum MigratusError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors reading or writing backup archives
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Regex compilation error
    #[error("Regex error: {0}")]
    Regex(#[from] regex_lite::Error),

    /// Version string does not match `major.minor.patch[-pre][+build]`
    #[error("Invalid version format: '{0}'")]
    InvalidVersionFormat(String),

    /// Named backup archive does not exist in the backup store
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// Backup archive could not be written (no partial archive is left behind)
    #[error("Backup creation failed for {name}: {reason}")]
    BackupCreationFailed {
        /// Name of the archive that was being written
        name: String,
        /// Underlying cause
        reason: String,
    },

    /// Restore was requested without explicit confirmation
    #[error("Restore requires explicit confirmation")]
    RestoreConfirmationRequired,

    /// Archive is not a valid backup (unreadable, missing manifest, unsafe entries)
    #[error("Invalid backup {path:?}: {reason}")]
    InvalidBackup {
        /// Path of the offending archive
        path: PathBuf,
        /// Why the archive was rejected
        reason: String,
    },

    /// Backup name contains path separators or traversal components
    #[error("Invalid backup name: '{0}'")]
    InvalidBackupName(String),

    /// A file inside a backup does not match the digest recorded in its manifest
    #[error("Checksum mismatch for {path} - expected: {expected}, actual: {actual}")]
    ChecksumMismatch {
        /// Archive member path
        path: String,
        /// Digest recorded in the manifest
        expected: String,
        /// Digest of the stored bytes
        actual: String,
    },

    /// A structured (key/value) document could not be parsed
    #[error("Failed to parse structured file {path:?}: {reason}")]
    StructuredParse {
        /// File that failed to parse
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// An upgrade step failed to execute
    #[error("Step '{step}' failed: {reason}")]
    StepExecutionFailed {
        /// Description of the failing step
        step: String,
        /// Underlying cause
        reason: String,
    },

    /// Restoring the pre-upgrade backup failed; the tree needs manual recovery
    #[error("Rollback from backup '{backup}' failed: {reason}")]
    RollbackFailed {
        /// Backup that could not be restored
        backup: String,
        /// Underlying cause
        reason: String,
    },

    /// Named resolution strategy is not registered for the conflict type
    #[error("Strategy '{strategy}' is not available for {conflict_type} conflicts")]
    UnsupportedStrategy {
        /// Requested strategy name
        strategy: String,
        /// Conflict type it was requested for
        conflict_type: String,
    },

    /// Operation is not supported by this component
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Glob pattern parsing error
    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An upgrade hook rejected a step
    #[error("Hook execution error: {0}")]
    HookExecution(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),

    /// Custom error type for extensions
    #[error("{0}")]
    Custom(String),
}

impl From<globset::Error> for MigratusError {
    fn from(err: globset::Error) -> Self {
        MigratusError::InvalidPattern(err.to_string())
    }
}

impl MigratusError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        MigratusError::Internal(msg.into())
    }

    /// Create a custom error with a custom message
    pub fn custom(msg: impl Into<String>) -> Self {
        MigratusError::Custom(msg.into())
    }

    /// Create a step failure from any displayable cause
    pub fn step_failed(step: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        MigratusError::StepExecutionFailed {
            step: step.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error is recoverable by retrying or adjusting input
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MigratusError::RestoreConfirmationRequired
                | MigratusError::InvalidVersionFormat(_)
                | MigratusError::StructuredParse { .. }
                | MigratusError::UnsupportedStrategy { .. }
        )
    }

    /// Check if this error leaves the tree in a state that needs manual recovery
    pub fn requires_manual_recovery(&self) -> bool {
        matches!(self, MigratusError::RollbackFailed { .. })
    }

    /// Check if this error indicates a damaged backup
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            MigratusError::InvalidBackup { .. }
                | MigratusError::ChecksumMismatch { .. }
                | MigratusError::Zip(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            MigratusError::BackupNotFound(name) => {
                format!("Backup '{}' not found. Use 'migratus backup list' to see available backups.", name)
            }
            MigratusError::RestoreConfirmationRequired => {
                "Restoring overwrites the current configuration. Re-run with confirmation (--yes) to proceed.".to_string()
            }
            MigratusError::InvalidVersionFormat(raw) => {
                format!("'{}' is not a valid version. Expected MAJOR.MINOR.PATCH with optional -prerelease and +build.", raw)
            }
            MigratusError::RollbackFailed { backup, .. } => {
                format!(
                    "Automatic rollback failed. The configuration may be partially upgraded. \
                     Restore manually with 'migratus rollback {}' or from the archive directly.",
                    backup
                )
            }
            _ => self.to_string(),
        }
    }
}
