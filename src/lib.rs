//! # statevault
//!
//! Scheduled, integrity-verified snapshots of application state with
//! selective, verifiable restoration.
//!
//! ## Overview
//!
//! A [`BackupConfig`] describes what to capture (a scope of the application's
//! key/value state), when to capture it, how many artifacts to keep, and how
//! artifacts are stored. Each execution runs the backup pipeline
//! (collect → serialize → checksum → compress → encrypt → store) and leaves
//! exactly one [`BackupRecord`] in the catalog. A restore loads an artifact,
//! verifies it against the recorded checksum and only then writes the
//! selected keys to a destination.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use statevault::collector::StaticCollector;
//! use statevault::restore::MemoryTarget;
//! use statevault::storage::MemoryStorage;
//! use statevault::{BackupConfig, BackupScope, BackupServiceBuilder, BackupType, RestoreOptions};
//!
//! # async fn example() -> statevault::Result<()> {
//! let service = BackupServiceBuilder::new(
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(StaticCollector::new()),
//!     Arc::new(MemoryTarget::new()),
//! )
//! .build();
//!
//! let config = service
//!     .create_config(BackupConfig::new("nightly", BackupType::Full, BackupScope::All))
//!     .await?;
//!
//! let backup_id = service.execute_backup(&config.id, Default::default()).await?;
//! let record = service.wait_for_backup(&backup_id).await?;
//!
//! let restore_id = service.execute_restore(RestoreOptions::new(&record.id)).await?;
//! let restore = service.wait_for_restore(&restore_id).await?;
//! println!("restored {} of {}", restore.restored_items, restore.total_items);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: backup configurations and their validation
//! - [`backup`]: records, payload model and the backup pipeline
//! - [`restore`]: restore records, selective filters and the restore engine
//! - [`catalog`]: concurrent ledger of configs, backups and restores
//! - [`retention`]: count/age based artifact cleanup
//! - [`scheduler`]: per-configuration timers and the run-set
//! - [`manager`]: the [`BackupService`] facade tying it all together

#![warn(rustdoc::missing_crate_level_docs)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for backup and restore operations
pub type Result<T> = std::result::Result<T, BackupError>;

/// Main error type for backup and restore operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackupError {
    /// Configuration rejected at create/update time, nothing persisted
    #[error("Invalid backup configuration: {}", .0.join("; "))]
    ConfigValidation(Vec<String>),

    #[error("Backup configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Restore not found: {0}")]
    RestoreNotFound(String),

    #[error("Restore target not found: {0}")]
    TargetNotFound(String),

    /// A run for the configuration is already in progress
    #[error("Backup already running for configuration {0}")]
    BackupAlreadyRunning(String),

    /// The backup is running or being read by a running restore
    #[error("Backup {0} is in use and cannot be deleted")]
    BackupInUse(String),

    #[error("Backup {backup_id} is not restorable: {reason}")]
    NotRestorable { backup_id: String, reason: String },

    #[error("Configuration {0} has a backup in progress")]
    ConfigBusy(String),

    #[error("Snapshot collection failed: {0}")]
    Collection(String),

    #[error("Backup pipeline error: {0}")]
    Pipeline(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Integrity check failed: expected checksum {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    /// A running execution outlived the staleness threshold
    #[error("Execution abandoned: {0}")]
    Stale(String),
}

/// Stable, serializable error codes stored on records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ConfigValidationError,
    ConfigNotFound,
    BackupNotFound,
    RestoreNotFound,
    TargetNotFound,
    BackupAlreadyRunning,
    BackupInUse,
    NotRestorable,
    ConfigBusy,
    CollectionError,
    PipelineError,
    StorageError,
    DecryptionError,
    CorruptArchive,
    IntegrityCheckFailed,
    SerializationError,
    IoError,
    StaleExecution,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigValidationError => "ConfigValidationError",
            ErrorCode::ConfigNotFound => "ConfigNotFound",
            ErrorCode::BackupNotFound => "BackupNotFound",
            ErrorCode::RestoreNotFound => "RestoreNotFound",
            ErrorCode::TargetNotFound => "TargetNotFound",
            ErrorCode::BackupAlreadyRunning => "BackupAlreadyRunning",
            ErrorCode::BackupInUse => "BackupInUse",
            ErrorCode::NotRestorable => "NotRestorable",
            ErrorCode::ConfigBusy => "ConfigBusy",
            ErrorCode::CollectionError => "CollectionError",
            ErrorCode::PipelineError => "PipelineError",
            ErrorCode::StorageError => "StorageError",
            ErrorCode::DecryptionError => "DecryptionError",
            ErrorCode::CorruptArchive => "CorruptArchive",
            ErrorCode::IntegrityCheckFailed => "IntegrityCheckFailed",
            ErrorCode::SerializationError => "SerializationError",
            ErrorCode::IoError => "IoError",
            ErrorCode::StaleExecution => "StaleExecution",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error captured into a backup or restore record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl BackupError {
    /// The stable code recorded for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            BackupError::ConfigValidation(_) => ErrorCode::ConfigValidationError,
            BackupError::ConfigNotFound(_) => ErrorCode::ConfigNotFound,
            BackupError::BackupNotFound(_) => ErrorCode::BackupNotFound,
            BackupError::RestoreNotFound(_) => ErrorCode::RestoreNotFound,
            BackupError::TargetNotFound(_) => ErrorCode::TargetNotFound,
            BackupError::BackupAlreadyRunning(_) => ErrorCode::BackupAlreadyRunning,
            BackupError::BackupInUse(_) => ErrorCode::BackupInUse,
            BackupError::NotRestorable { .. } => ErrorCode::NotRestorable,
            BackupError::ConfigBusy(_) => ErrorCode::ConfigBusy,
            BackupError::Collection(_) => ErrorCode::CollectionError,
            BackupError::Pipeline(_) => ErrorCode::PipelineError,
            BackupError::Storage(_) => ErrorCode::StorageError,
            BackupError::Decryption(_) => ErrorCode::DecryptionError,
            BackupError::CorruptArchive(_) => ErrorCode::CorruptArchive,
            BackupError::IntegrityCheckFailed { .. } => ErrorCode::IntegrityCheckFailed,
            BackupError::Serialization(_) => ErrorCode::SerializationError,
            BackupError::Io(_) => ErrorCode::IoError,
            BackupError::Stale(_) => ErrorCode::StaleExecution,
        }
    }

    /// Convert into the `{code, message}` form stored on records
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        BackupError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        BackupError::Io(err.to_string())
    }
}

/// Backup configurations and validation
pub mod config;

/// Backup records, payload model and the backup pipeline
pub mod backup;

/// Restore records, destinations and the restore engine
pub mod restore;

/// Concurrent ledger of configs, backups and restores
pub mod catalog;

/// Retention policy enforcement
pub mod retention;

/// Per-configuration timers and the run-set
pub mod scheduler;

/// Artifact storage backends
pub mod storage;

/// Snapshot collection
pub mod collector;

/// Success/failure notifications
pub mod notify;

/// The service facade
pub mod manager;

/// Engine-wide settings
pub mod settings;

/// Prometheus metrics
pub mod metrics;

/// Tracing subscriber setup
pub mod telemetry;

pub use backup::{BackupData, BackupRecord, BackupStatus, ExecuteOptions};
pub use config::{BackupConfig, BackupScope, BackupType, KeyFilter, RetentionPolicy};
pub use manager::{BackupService, BackupServiceBuilder};
pub use restore::{RestoreOptions, RestoreRecord, RestoreStatus};
pub use settings::EngineSettings;
