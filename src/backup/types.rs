// Backup records and the snapshot payload model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::{BackupScope, BackupType, KeyFilter};
use crate::ErrorInfo;

/// Payload format written into every snapshot
pub const DATA_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Running,
    Completed,
    Failed,
    Corrupted,
    Expired,
}

impl BackupStatus {
    /// Every status but `Running` is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackupStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Running => "running",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
            BackupStatus::Corrupted => "corrupted",
            BackupStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Failed,
}

/// Environment and pipeline facts captured with each record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub version: String,
    pub environment: String,
    pub client_info: String,
    pub data_version: u32,
    /// Canonical plaintext length before compression/encryption
    #[serde(default)]
    pub original_size: u64,
    #[serde(default = "default_ratio")]
    pub compression_ratio: f64,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub encrypted: bool,
}

fn default_ratio() -> f64 {
    1.0
}

/// One backup execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    pub config_id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub scope: BackupScope,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub status: BackupStatus,
    /// Stored artifact length in bytes, after compression and encryption
    pub size: u64,
    /// Leaf keys across the four sections
    pub file_count: usize,
    pub storage_location: String,
    /// SHA-256 of the canonical plaintext
    pub checksum: String,
    pub metadata: BackupMetadata,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub verification_status: Option<VerificationStatus>,
}

/// Options for a single backup execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Run even when another execution of the same configuration holds the run slot
    pub force: bool,
    pub type_override: Option<BackupType>,
}

impl ExecuteOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            type_override: None,
        }
    }
}

/// Sub-section name → key → value
pub type Section = BTreeMap<String, BTreeMap<String, Value>>;

/// The four top-level sections of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    UserData,
    SystemConfig,
    AnalyticsData,
    CustomData,
}

impl SectionKind {
    pub const ALL: [SectionKind; 4] = [
        SectionKind::UserData,
        SectionKind::SystemConfig,
        SectionKind::AnalyticsData,
        SectionKind::CustomData,
    ];

    /// Name used in serialized payloads and leaf paths
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::UserData => "userData",
            SectionKind::SystemConfig => "systemConfig",
            SectionKind::AnalyticsData => "analyticsData",
            SectionKind::CustomData => "customData",
        }
    }

    /// Whether a backup of `scope` captures this section
    pub fn in_scope(&self, scope: BackupScope) -> bool {
        match scope {
            BackupScope::All | BackupScope::Custom => true,
            BackupScope::UserData => *self == SectionKind::UserData,
            BackupScope::SystemConfig => *self == SectionKind::SystemConfig,
            BackupScope::Analytics => *self == SectionKind::AnalyticsData,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub scope: BackupScope,
    pub data_version: u32,
}

impl SnapshotMetadata {
    pub fn new(scope: BackupScope) -> Self {
        Self {
            created_at: Utc::now(),
            scope,
            data_version: DATA_FORMAT_VERSION,
        }
    }
}

/// Snapshot payload produced by a collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupData {
    pub metadata: SnapshotMetadata,
    #[serde(default)]
    pub user_data: Section,
    #[serde(default)]
    pub system_config: Section,
    #[serde(default)]
    pub analytics_data: Section,
    #[serde(default)]
    pub custom_data: Section,
}

/// A single key inside a snapshot, with its location
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf<'a> {
    pub section: SectionKind,
    pub sub_section: &'a str,
    pub key: &'a str,
    pub value: &'a Value,
}

impl Leaf<'_> {
    /// `section/sub_section/key`
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.section.as_str(), self.sub_section, self.key)
    }
}

impl BackupData {
    pub fn new(scope: BackupScope) -> Self {
        Self {
            metadata: SnapshotMetadata::new(scope),
            user_data: Section::new(),
            system_config: Section::new(),
            analytics_data: Section::new(),
            custom_data: Section::new(),
        }
    }

    pub fn section(&self, kind: SectionKind) -> &Section {
        match kind {
            SectionKind::UserData => &self.user_data,
            SectionKind::SystemConfig => &self.system_config,
            SectionKind::AnalyticsData => &self.analytics_data,
            SectionKind::CustomData => &self.custom_data,
        }
    }

    pub fn section_mut(&mut self, kind: SectionKind) -> &mut Section {
        match kind {
            SectionKind::UserData => &mut self.user_data,
            SectionKind::SystemConfig => &mut self.system_config,
            SectionKind::AnalyticsData => &mut self.analytics_data,
            SectionKind::CustomData => &mut self.custom_data,
        }
    }

    /// Insert or replace one leaf
    pub fn insert(
        &mut self,
        section: SectionKind,
        sub_section: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) {
        self.section_mut(section)
            .entry(sub_section.into())
            .or_default()
            .insert(key.into(), value);
    }

    /// All leaves in canonical order
    pub fn leaves(&self) -> impl Iterator<Item = Leaf<'_>> {
        SectionKind::ALL.into_iter().flat_map(move |section| {
            self.section(section).iter().flat_map(move |(sub_section, entries)| {
                entries.iter().map(move |(key, value)| Leaf {
                    section,
                    sub_section: sub_section.as_str(),
                    key: key.as_str(),
                    value,
                })
            })
        })
    }

    pub fn leaf_count(&self) -> usize {
        SectionKind::ALL
            .iter()
            .map(|kind| self.section(*kind).values().map(|entries| entries.len()).sum::<usize>())
            .sum()
    }

    /// Copy restricted to `scope` and, when given, to keys passing `filter`
    pub fn restricted(&self, scope: BackupScope, filter: Option<&KeyFilter>) -> BackupData {
        let mut out = BackupData::new(scope);
        for leaf in self.leaves() {
            if !leaf.section.in_scope(scope) {
                continue;
            }
            if let Some(filter) = filter {
                if !filter.allows(&leaf.path(), leaf.key) {
                    continue;
                }
            }
            out.insert(leaf.section, leaf.sub_section, leaf.key, leaf.value.clone());
        }
        out
    }
}

/// Criteria for listing backup records
#[derive(Debug, Clone, Default)]
pub struct BackupFilter {
    pub config_id: Option<String>,
    pub status: Option<BackupStatus>,
    pub backup_type: Option<BackupType>,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl BackupFilter {
    pub fn for_config(config_id: impl Into<String>) -> Self {
        Self {
            config_id: Some(config_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: BackupStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &BackupRecord) -> bool {
        if let Some(ref config_id) = self.config_id {
            if &record.config_id != config_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(backup_type) = self.backup_type {
            if record.backup_type != backup_type {
                return false;
            }
        }
        if let Some((start, end)) = self.date_range {
            if record.start_time < start || record.start_time > end {
                return false;
            }
        }
        true
    }
}

/// Outcome of re-reading and checksumming a stored artifact
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub is_valid: bool,
    pub checksum_match: bool,
    pub expected_checksum: String,
    pub actual_checksum: Option<String>,
    pub corruption_errors: Vec<String>,
}

/// Aggregate view over the catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_config: BTreeMap<String, usize>,
    /// Sum of `size` over completed records
    pub stored_bytes: u64,
    pub last_success: Option<DateTime<Utc>>,
}
