//! Backup execution
//!
//! `start` claims the configuration's run slot, records a running
//! [`BackupRecord`] and spawns the steps:
//!
//! ```text
//! collect → serialize → checksum → compress → encrypt → store → finalize
//! ```
//!
//! Every step gates the next. A failing step finalizes the record as failed
//! with its error code. A successful run applies the retention policy and
//! then notifies.

use chrono::Utc;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::types::{
    BackupMetadata, BackupRecord, BackupStatus, ExecuteOptions, VerificationResult,
    VerificationStatus, DATA_FORMAT_VERSION,
};
use super::{artifact, codec, crypto};
use crate::catalog::{BackupLeases, Catalog};
use crate::collector::SnapshotCollector;
use crate::config::{BackupConfig, BackupScope};
use crate::metrics;
use crate::notify::{self, NotificationDispatcher, NotificationEvent};
use crate::retention::RetentionManager;
use crate::scheduler::{RunSet, RunSlot};
use crate::settings::EngineSettings;
use crate::storage::StorageBackend;
use crate::{BackupError, Result};

/// Resolves once a spawned execution has finished all of its work,
/// including retention and notifications
type Completion = Shared<BoxFuture<'static, ()>>;

struct StoredArtifact {
    location: String,
    size: u64,
    file_count: usize,
    checksum: String,
    original_size: u64,
}

#[derive(Clone)]
pub struct Pipeline {
    catalog: Arc<Catalog>,
    storage: Arc<dyn StorageBackend>,
    collector: Arc<dyn SnapshotCollector>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    retention: RetentionManager,
    leases: Arc<BackupLeases>,
    run_set: Arc<RunSet>,
    settings: Arc<EngineSettings>,
    executions: Arc<DashMap<String, Completion>>,
}

/// Storage key of a record's artifact
pub fn artifact_key(config: &BackupConfig, record_id: &str) -> String {
    format!(
        "{}/{}/{}.backup",
        config.storage.path.trim_end_matches('/'),
        config.id,
        record_id
    )
}

impl Pipeline {
    pub fn new(
        catalog: Arc<Catalog>,
        storage: Arc<dyn StorageBackend>,
        collector: Arc<dyn SnapshotCollector>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        leases: Arc<BackupLeases>,
        run_set: Arc<RunSet>,
        settings: Arc<EngineSettings>,
    ) -> Self {
        let retention = RetentionManager::new(
            Arc::clone(&catalog),
            Arc::clone(&storage),
            Arc::clone(&leases),
        );
        Self {
            catalog,
            storage,
            collector,
            dispatcher,
            retention,
            leases,
            run_set,
            settings,
            executions: Arc::new(DashMap::new()),
        }
    }

    pub fn retention(&self) -> &RetentionManager {
        &self.retention
    }

    /// Begin a backup of `config` and return the new record id.
    ///
    /// Fails with `BackupAlreadyRunning`, before any record exists, when the
    /// configuration is already running and `options.force` is not set.
    #[instrument(skip(self, config, options), fields(config_id = %config.id))]
    pub fn start(&self, config: BackupConfig, options: ExecuteOptions) -> Result<String> {
        let record_id = Uuid::new_v4().to_string();
        let slot = self
            .run_set
            .claim(&config.id, &record_id, options.force)
            .map_err(|e| {
                warn!(config_id = %config.id, "Backup trigger rejected: already running");
                e
            })?;
        // Re-read under the claimed slot; a delete cannot pass while it is held.
        let config = self.catalog.config(&config.id)?;

        let backup_type = options.type_override.unwrap_or(config.backup_type);
        self.catalog.insert_backup(BackupRecord {
            id: record_id.clone(),
            config_id: config.id.clone(),
            backup_type,
            scope: config.scope,
            start_time: Utc::now(),
            end_time: None,
            status: BackupStatus::Running,
            size: 0,
            file_count: 0,
            storage_location: String::new(),
            checksum: String::new(),
            metadata: BackupMetadata {
                version: self.settings.app_version.clone(),
                environment: self.settings.environment.clone(),
                client_info: self.settings.client_info.clone(),
                data_version: DATA_FORMAT_VERSION,
                original_size: 0,
                compression_ratio: 1.0,
                compressed: config.retention.compression_enabled,
                encrypted: config.storage.encryption,
            },
            error: None,
            verification_status: None,
        });
        metrics::record_backup_start();
        info!(
            backup_id = %record_id,
            backup_type = ?backup_type,
            scope = ?config.scope,
            forced = options.force,
            "Backup started"
        );

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let done: Completion = done_rx.map(|_| ()).boxed().shared();
        self.executions.insert(record_id.clone(), done);

        let pipeline = self.clone();
        let task_id = record_id.clone();
        tokio::spawn(async move {
            pipeline.run(config, &task_id, slot).await;
            pipeline.executions.remove(&task_id);
            let _ = done_tx.send(());
        });

        Ok(record_id)
    }

    /// Resolve once the backup and its follow-up work have finished
    pub async fn wait(&self, backup_id: &str) -> Result<BackupRecord> {
        let done = self.executions.get(backup_id).map(|done| done.clone());
        if let Some(done) = done {
            done.await;
        }
        self.catalog.wait_for_backup(backup_id).await
    }

    async fn run(&self, config: BackupConfig, record_id: &str, slot: RunSlot) {
        let started = Instant::now();
        let outcome = self.execute_steps(&config, record_id).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(artifact) => self.complete(&config, record_id, artifact, slot, elapsed).await,
            Err(err) => self.fail(&config, record_id, err, slot, elapsed),
        }

        self.catalog
            .save_if_configured(self.settings.catalog_path.as_deref())
            .await;
    }

    async fn execute_steps(&self, config: &BackupConfig, record_id: &str) -> Result<StoredArtifact> {
        let filters = match config.scope {
            BackupScope::Custom => config.custom_filters.as_ref(),
            _ => None,
        };
        let data = self
            .collector
            .collect(config.scope, filters)
            .await
            .map_err(|e| BackupError::Collection(format!("{:#}", e)))?;
        let file_count = data.leaf_count();
        debug!(backup_id = %record_id, file_count = file_count, "Snapshot collected");

        let plaintext = codec::to_canonical_bytes(&data)?;
        let checksum = codec::checksum(&plaintext);
        let original_size = plaintext.len() as u64;

        let mut payload = if config.retention.compression_enabled {
            codec::compress(&plaintext, self.settings.compression_level)?
        } else {
            plaintext
        };

        if config.storage.encryption {
            let passphrase = config
                .storage
                .encryption_key
                .clone()
                .filter(|key| !key.is_empty())
                .ok_or_else(|| {
                    BackupError::Pipeline("encryption is enabled but no key is configured".to_string())
                })?;
            payload = tokio::task::spawn_blocking(move || crypto::encrypt(&payload, &passphrase))
                .await
                .map_err(|e| BackupError::Pipeline(format!("Encryption task failed: {}", e)))??;
        }

        let size = payload.len() as u64;
        let location = self
            .storage
            .put(&artifact_key(config, record_id), payload)
            .await?;
        metrics::record_artifact_size(size, config.retention.compression_enabled);
        debug!(backup_id = %record_id, location = %location, size = size, "Artifact stored");

        Ok(StoredArtifact {
            location,
            size,
            file_count,
            checksum,
            original_size,
        })
    }

    async fn complete(
        &self,
        config: &BackupConfig,
        record_id: &str,
        artifact: StoredArtifact,
        slot: RunSlot,
        elapsed: f64,
    ) {
        let location = artifact.location.clone();
        let finished = self.catalog.finish_backup(record_id, |record| {
            record.status = BackupStatus::Completed;
            record.end_time = Some(Utc::now());
            record.size = artifact.size;
            record.file_count = artifact.file_count;
            record.storage_location = artifact.location;
            record.checksum = artifact.checksum;
            record.metadata.original_size = artifact.original_size;
            record.metadata.compression_ratio = if artifact.size > 0 {
                artifact.original_size as f64 / artifact.size as f64
            } else {
                1.0
            };
        });
        // Free the slot only once the record is final.
        drop(slot);

        let record = match finished {
            Ok(Some(record)) => record,
            Ok(None) | Err(_) => {
                // The sweeper (or a delete) resolved the record first.
                warn!(backup_id = %record_id, "Backup record already resolved, discarding artifact");
                if let Err(e) = self.storage.delete(&location).await {
                    warn!(backup_id = %record_id, error = %e, "Failed to discard artifact");
                }
                return;
            }
        };

        metrics::record_backup_end(BackupStatus::Completed.as_str(), elapsed);
        info!(
            backup_id = %record_id,
            config_id = %config.id,
            size = record.size,
            file_count = record.file_count,
            duration_secs = elapsed,
            "Backup completed"
        );

        if let Err(e) = self.retention.cleanup(&config.id).await {
            warn!(config_id = %config.id, error = %e, "Retention cleanup failed");
        }

        notify::dispatch(
            Arc::clone(&self.dispatcher),
            &config.notifications,
            NotificationEvent::BackupSucceeded,
            &record,
        );
    }

    fn fail(
        &self,
        config: &BackupConfig,
        record_id: &str,
        err: BackupError,
        slot: RunSlot,
        elapsed: f64,
    ) {
        error!(
            backup_id = %record_id,
            config_id = %config.id,
            code = %err.code(),
            error = %err,
            "Backup failed"
        );

        let info = err.to_info();
        let finished = self.catalog.finish_backup(record_id, |record| {
            record.status = BackupStatus::Failed;
            record.end_time = Some(Utc::now());
            record.error = Some(info);
        });
        drop(slot);

        if let Ok(Some(record)) = finished {
            metrics::record_backup_end(BackupStatus::Failed.as_str(), elapsed);
            notify::dispatch(
                Arc::clone(&self.dispatcher),
                &config.notifications,
                NotificationEvent::BackupFailed,
                &record,
            );
        }
    }

    /// Re-read a stored artifact and check it against the recorded checksum.
    ///
    /// Only proven corruption (a checksum mismatch, an undecodable archive or
    /// an unparseable payload) marks the record corrupted. A missing key or an
    /// unreachable artifact fails the verification but leaves the status
    /// alone. A corrupted record that verifies cleanly is completed again.
    #[instrument(skip(self))]
    pub async fn verify(&self, backup_id: &str) -> Result<VerificationResult> {
        let record = self.catalog.backup(backup_id)?;
        if !matches!(record.status, BackupStatus::Completed | BackupStatus::Corrupted) {
            return Err(BackupError::NotRestorable {
                backup_id: backup_id.to_string(),
                reason: format!("backup is {}", record.status.as_str()),
            });
        }
        let _lease = self.leases.acquire_read(backup_id)?;

        let mut result = VerificationResult {
            is_valid: false,
            checksum_match: false,
            expected_checksum: record.checksum.clone(),
            actual_checksum: None,
            corruption_errors: Vec::new(),
        };
        let mut corrupt = false;

        let passphrase = artifact::passphrase_for(&self.catalog, &record);
        match artifact::load_plaintext(self.storage.as_ref(), &record, passphrase.as_deref()).await {
            Ok(plaintext) => {
                let actual = codec::checksum(&plaintext);
                result.checksum_match = actual == record.checksum;
                result.actual_checksum = Some(actual);
                if !result.checksum_match {
                    corrupt = true;
                    result.corruption_errors.push("checksum mismatch".to_string());
                } else if let Err(e) = codec::from_canonical_bytes(&plaintext) {
                    corrupt = true;
                    result.corruption_errors.push(e.to_string());
                } else {
                    result.is_valid = true;
                }
            }
            Err(e) => {
                corrupt = matches!(
                    e,
                    BackupError::CorruptArchive(_) | BackupError::IntegrityCheckFailed { .. }
                );
                result.corruption_errors.push(e.to_string());
            }
        }

        let valid = result.is_valid;
        let updated = self.catalog.update_backup(backup_id, |record| {
            if valid {
                record.verification_status = Some(VerificationStatus::Verified);
                if record.status == BackupStatus::Corrupted {
                    record.status = BackupStatus::Completed;
                }
            } else {
                record.verification_status = Some(VerificationStatus::Failed);
                if corrupt {
                    record.status = BackupStatus::Corrupted;
                }
            }
        })?;

        if valid {
            info!(backup_id = %backup_id, status = updated.status.as_str(), "Backup verified");
        } else {
            warn!(
                backup_id = %backup_id,
                corrupt = corrupt,
                errors = ?result.corruption_errors,
                "Backup failed verification"
            );
        }
        self.catalog
            .save_if_configured(self.settings.catalog_path.as_deref())
            .await;

        Ok(result)
    }

    /// Resolve running records older than `threshold` to failed.
    ///
    /// Their run slots are released and waiters are woken. A task still
    /// attached keeps running detached; if it finishes later it finds the
    /// record resolved and discards its artifact. Returns the ids that were
    /// resolved.
    pub async fn sweep_stale(&self, threshold: Duration) -> Vec<String> {
        let threshold =
            chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let now = Utc::now();
        let cutoff = now - threshold;

        let mut resolved = Vec::new();
        for record in self.catalog.running_backups() {
            if record.start_time >= cutoff {
                continue;
            }

            let err = BackupError::Stale(format!(
                "running since {}",
                record.start_time.to_rfc3339()
            ));
            let info = err.to_info();
            let finished = self.catalog.finish_backup(&record.id, |r| {
                r.status = BackupStatus::Failed;
                r.end_time = Some(now);
                r.error = Some(info);
            });
            let Ok(Some(updated)) = finished else {
                continue;
            };

            self.run_set.release(&record.config_id, &record.id);
            // Records loaded from an earlier process never counted as active here.
            if self.executions.remove(&record.id).is_some() {
                let elapsed = (now - record.start_time).to_std().unwrap_or_default();
                metrics::record_backup_end(BackupStatus::Failed.as_str(), elapsed.as_secs_f64());
            } else {
                metrics::record_backup_resolved(BackupStatus::Failed.as_str());
            }
            warn!(
                backup_id = %record.id,
                config_id = %record.config_id,
                started = %record.start_time,
                "Stale backup resolved as failed"
            );

            if let Ok(config) = self.catalog.config(&record.config_id) {
                notify::dispatch(
                    Arc::clone(&self.dispatcher),
                    &config.notifications,
                    NotificationEvent::BackupFailed,
                    &updated,
                );
            }
            resolved.push(record.id);
        }

        if !resolved.is_empty() {
            self.catalog
                .save_if_configured(self.settings.catalog_path.as_deref())
                .await;
        }
        resolved
    }
}
