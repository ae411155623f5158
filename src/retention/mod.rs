//! Retention policy enforcement
//!
//! Applied after every successful backup. Only completed records count
//! towards `max_backups`; failed records are left for operators to inspect.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backup::{BackupFilter, BackupRecord, BackupStatus};
use crate::catalog::{BackupLeases, Catalog};
use crate::config::RetentionPolicy;
use crate::metrics;
use crate::storage::StorageBackend;
use crate::{BackupError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupResult {
    pub deleted_backups: Vec<String>,
    pub retained_backups: usize,
    /// Expired records kept because a running restore reads them
    pub skipped_in_use: Vec<String>,
}

#[derive(Clone)]
pub struct RetentionManager {
    catalog: Arc<Catalog>,
    storage: Arc<dyn StorageBackend>,
    leases: Arc<BackupLeases>,
}

impl RetentionManager {
    pub fn new(
        catalog: Arc<Catalog>,
        storage: Arc<dyn StorageBackend>,
        leases: Arc<BackupLeases>,
    ) -> Self {
        Self {
            catalog,
            storage,
            leases,
        }
    }

    /// Enforce the configuration's retention policy now
    pub async fn cleanup(&self, config_id: &str) -> Result<CleanupResult> {
        let config = self.catalog.config(config_id)?;
        self.cleanup_at(config_id, &config.retention, Utc::now()).await
    }

    /// Enforce `policy` over the completed records of `config_id` as of `now`
    pub async fn cleanup_at(
        &self,
        config_id: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<CleanupResult> {
        let completed = self
            .catalog
            .backups(&BackupFilter::for_config(config_id).with_status(BackupStatus::Completed));
        let cutoff = now - Duration::days(i64::from(policy.max_age_days));

        let mut result = CleanupResult::default();
        for (rank, record) in completed.iter().enumerate() {
            let over_count = rank >= policy.max_backups;
            let too_old = record.start_time < cutoff;
            if !over_count && !too_old {
                result.retained_backups += 1;
                continue;
            }

            debug!(
                backup_id = %record.id,
                rank = rank,
                over_count = over_count,
                too_old = too_old,
                "Backup expired by retention policy"
            );

            match self.delete(&record.id).await {
                Ok(_) => result.deleted_backups.push(record.id.clone()),
                Err(BackupError::BackupInUse(id)) => {
                    warn!(backup_id = %id, "Skipping expired backup held by a running restore");
                    result.retained_backups += 1;
                    result.skipped_in_use.push(id);
                }
                Err(e) => {
                    warn!(backup_id = %record.id, error = %e, "Failed to delete expired backup");
                    result.retained_backups += 1;
                }
            }
        }

        if !result.deleted_backups.is_empty() {
            metrics::record_retention_deletions(result.deleted_backups.len());
            info!(
                config_id = %config_id,
                deleted = result.deleted_backups.len(),
                retained = result.retained_backups,
                "Retention cleanup finished"
            );
        }

        Ok(result)
    }

    /// Delete one backup's artifact and catalog entry.
    ///
    /// Fails with `BackupInUse` while the backup is running or read by a
    /// running restore.
    pub async fn delete(&self, backup_id: &str) -> Result<BackupRecord> {
        let record = self.catalog.backup(backup_id)?;
        if record.status == BackupStatus::Running {
            return Err(BackupError::BackupInUse(backup_id.to_string()));
        }

        let _lease = self.leases.acquire_delete(backup_id)?;
        if !record.storage_location.is_empty() {
            self.storage.delete(&record.storage_location).await?;
        }
        self.catalog.remove_backup(backup_id);

        Ok(record)
    }
}
