// Restore requests and records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::KeyFilter;
use crate::ErrorInfo;

/// Name of the destination used when a restore names none
pub const DEFAULT_TARGET: &str = "default";

/// What to restore and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOptions {
    pub backup_id: String,
    /// Registered destination name; the default destination when absent
    #[serde(default)]
    pub target_location: Option<String>,
    /// When false, keys already present at the destination are left untouched
    #[serde(default)]
    pub overwrite_existing: bool,
    #[serde(default)]
    pub selective_restore: KeyFilter,
    #[serde(default)]
    pub dry_run: bool,
    /// Refuse the restore if the backup was taken after this instant
    #[serde(default)]
    pub restore_point: Option<DateTime<Utc>>,
}

impl RestoreOptions {
    pub fn new(backup_id: impl Into<String>) -> Self {
        Self {
            backup_id: backup_id.into(),
            target_location: None,
            overwrite_existing: false,
            selective_restore: KeyFilter::default(),
            dry_run: false,
            restore_point: None,
        }
    }

    pub fn target(mut self, name: impl Into<String>) -> Self {
        self.target_location = Some(name.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite_existing = overwrite;
        self
    }

    pub fn selective(mut self, filter: KeyFilter) -> Self {
        self.selective_restore = filter;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn restore_point(mut self, point: DateTime<Utc>) -> Self {
        self.restore_point = Some(point);
        self
    }

    pub fn target_name(&self) -> &str {
        self.target_location.as_deref().unwrap_or(DEFAULT_TARGET)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RestoreStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RestoreStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreStatus::Running => "running",
            RestoreStatus::Completed => "completed",
            RestoreStatus::Failed => "failed",
            RestoreStatus::Cancelled => "cancelled",
        }
    }
}

/// Post-restore checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreVerification {
    /// Every critical key that was restored exists at the destination
    pub data_integrity: bool,
    /// At least one restored value is structured data
    pub functional_test: bool,
    pub verified_at: DateTime<Utc>,
}

/// One restore execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRecord {
    pub id: String,
    pub backup_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub status: RestoreStatus,
    /// Keys written (dry run: keys that would be written)
    pub restored_items: usize,
    /// Keys selected by the filter
    pub total_items: usize,
    /// Selected keys left alone because they already existed
    #[serde(default)]
    pub skipped_items: usize,
    pub target_location: String,
    pub options: RestoreOptions,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub verification: Option<RestoreVerification>,
}

impl RestoreRecord {
    pub fn new(id: impl Into<String>, options: RestoreOptions) -> Self {
        Self {
            id: id.into(),
            backup_id: options.backup_id.clone(),
            start_time: Utc::now(),
            end_time: None,
            status: RestoreStatus::Running,
            restored_items: 0,
            total_items: 0,
            skipped_items: 0,
            target_location: options.target_name().to_string(),
            options,
            error: None,
            verification: None,
        }
    }
}
