//! Backup records, the snapshot payload model and the backup pipeline

pub mod artifact;
pub mod codec;
pub mod crypto;
pub mod pipeline;
mod types;

pub use pipeline::{artifact_key, Pipeline};
pub use types::{
    BackupData, BackupFilter, BackupMetadata, BackupRecord, BackupStats, BackupStatus,
    ExecuteOptions, Leaf, Section, SectionKind, SnapshotMetadata, VerificationResult,
    VerificationStatus, DATA_FORMAT_VERSION,
};
