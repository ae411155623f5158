//! Backup configuration model
//!
//! A [`BackupConfig`] is operator-managed. [`BackupConfig::validate`] enforces
//! the schedule, retention and storage invariants before anything is
//! persisted.

mod filter;

pub use filter::KeyFilter;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BackupError, Result};

lazy_static! {
    static ref TIME_OF_DAY: Regex = Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Full,
    Incremental,
    Differential,
}

/// Which logical data domain(s) a backup captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupScope {
    All,
    UserData,
    SystemConfig,
    Analytics,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// When a configuration fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub frequency: Frequency,
    /// `HH:MM`, UTC. Required for daily, weekly and monthly schedules;
    /// for hourly schedules only the minute is used.
    #[serde(default)]
    pub time: Option<String>,
    /// 0 = Sunday .. 6 = Saturday
    #[serde(default)]
    pub day_of_week: Option<u32>,
    /// 1..=31, clamped to the last day of shorter months
    #[serde(default)]
    pub day_of_month: Option<u32>,
}

impl ScheduleConfig {
    /// A schedule that never fires; backups run only when triggered manually
    pub fn manual() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::Daily,
            time: None,
            day_of_week: None,
            day_of_month: None,
        }
    }

    pub fn hourly() -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Hourly,
            time: None,
            day_of_week: None,
            day_of_month: None,
        }
    }

    pub fn daily(time: impl Into<String>) -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Daily,
            time: Some(time.into()),
            day_of_week: None,
            day_of_month: None,
        }
    }

    pub fn weekly(day_of_week: u32, time: impl Into<String>) -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Weekly,
            time: Some(time.into()),
            day_of_week: Some(day_of_week),
            day_of_month: None,
        }
    }

    pub fn monthly(day_of_month: u32, time: impl Into<String>) -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Monthly,
            time: Some(time.into()),
            day_of_week: None,
            day_of_month: Some(day_of_month),
        }
    }

    /// Parsed `(hour, minute)` if `time` is present and well-formed
    pub fn time_of_day(&self) -> Option<(u32, u32)> {
        let time = self.time.as_deref()?;
        let caps = TIME_OF_DAY.captures(time)?;
        let hour = caps.get(1)?.as_str().parse().ok()?;
        let minute = caps.get(2)?.as_str().parse().ok()?;
        Some((hour, minute))
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        if let Some(time) = &self.time {
            if !TIME_OF_DAY.is_match(time) {
                problems.push(format!("schedule.time '{}' is not a valid HH:MM time", time));
            }
        } else if self.enabled && self.frequency != Frequency::Hourly {
            problems.push(format!(
                "schedule.time is required for {:?} schedules",
                self.frequency
            ));
        }

        // Disabled schedules only need well-formed fields.
        match self.frequency {
            Frequency::Weekly => match self.day_of_week {
                Some(day) if day <= 6 => {}
                Some(day) => problems.push(format!("schedule.dayOfWeek {} is outside 0..=6", day)),
                None if !self.enabled => {}
                None => problems.push("schedule.dayOfWeek is required for weekly schedules".to_string()),
            },
            Frequency::Monthly => match self.day_of_month {
                Some(day) if (1..=31).contains(&day) => {}
                Some(day) => problems.push(format!("schedule.dayOfMonth {} is outside 1..=31", day)),
                None if !self.enabled => {}
                None => problems.push("schedule.dayOfMonth is required for monthly schedules".to_string()),
            },
            Frequency::Hourly | Frequency::Daily => {}
        }
    }
}

/// Count- and age-based rules governing automatic artifact deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    pub max_backups: usize,
    pub max_age_days: u32,
    pub compression_enabled: bool,
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self {
            max_backups: 10,
            max_age_days: 30,
            compression_enabled: true,
        }
    }

    pub fn max_backups(mut self, count: usize) -> Self {
        self.max_backups = count;
        self
    }

    pub fn max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = days;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression_enabled = enabled;
        self
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    Local,
    Cloud,
}

/// Where and how artifacts are written
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub location: StorageLocation,
    /// Key prefix under which artifacts are stored
    pub path: String,
    pub encryption: bool,
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl StorageConfig {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            location: StorageLocation::Local,
            path: path.into(),
            encryption: false,
            encryption_key: None,
        }
    }

    pub fn encrypted(mut self, key: impl Into<String>) -> Self {
        self.encryption = true;
        self.encryption_key = Some(key.into());
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::local("backups")
    }
}

// Keep the passphrase out of logs.
impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("location", &self.location)
            .field("path", &self.path)
            .field("encryption", &self.encryption)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Webhook,
    Slack,
    Sms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub kind: ChannelKind,
    /// Address, URL or phone number, depending on `kind`
    pub target: String,
}

impl NotificationChannel {
    pub fn new(kind: ChannelKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    pub on_success: bool,
    pub on_failure: bool,
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
}

/// A configured backup job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub scope: BackupScope,
    pub schedule: ScheduleConfig,
    pub retention: RetentionPolicy,
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub custom_filters: Option<KeyFilter>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupConfig {
    /// A manually-triggered, unencrypted configuration with default retention
    pub fn new(name: impl Into<String>, backup_type: BackupType, scope: BackupScope) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            backup_type,
            scope,
            schedule: ScheduleConfig::manual(),
            retention: RetentionPolicy::default(),
            storage: StorageConfig::default(),
            notifications: NotificationConfig::default(),
            custom_filters: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_notifications(mut self, notifications: NotificationConfig) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_custom_filters(mut self, filters: KeyFilter) -> Self {
        self.custom_filters = Some(filters);
        self
    }

    /// Check every invariant and report all violations at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }

        self.schedule.collect_problems(&mut problems);

        if self.retention.max_backups == 0 {
            problems.push("retention.maxBackups must be at least 1".to_string());
        }
        if self.retention.max_age_days == 0 {
            problems.push("retention.maxAgeDays must be at least 1".to_string());
        }

        let has_key = self
            .storage
            .encryption_key
            .as_deref()
            .map(|key| !key.is_empty())
            .unwrap_or(false);
        match (self.storage.encryption, has_key) {
            (true, false) => {
                problems.push("storage.encryptionKey is required when encryption is enabled".to_string())
            }
            (false, true) => problems
                .push("storage.encryptionKey must not be set when encryption is disabled".to_string()),
            _ => {}
        }

        if self.storage.path.trim().is_empty() {
            problems.push("storage.path must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BackupError::ConfigValidation(problems))
        }
    }
}
