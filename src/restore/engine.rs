//! Restore execution
//!
//! A restore loads the artifact, proves it matches the recorded checksum and
//! only then touches the destination. Nothing is written when any check
//! before the apply step fails.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::target::RestoreTarget;
use super::types::{RestoreOptions, RestoreRecord, RestoreStatus, RestoreVerification};
use crate::backup::{artifact, codec, BackupRecord, BackupStatus};
use crate::catalog::{BackupLeases, Catalog, ReadLease};
use crate::metrics;
use crate::settings::EngineSettings;
use crate::storage::StorageBackend;
use crate::{BackupError, Result};

/// Counters kept current while a restore runs, so a failure still reports
/// how far it got
#[derive(Debug, Default)]
struct Progress {
    total: usize,
    restored: usize,
    skipped: usize,
    restored_keys: Vec<String>,
}

struct Outcome {
    status: RestoreStatus,
    verification: Option<RestoreVerification>,
}

#[derive(Clone)]
pub struct RestoreEngine {
    catalog: Arc<Catalog>,
    storage: Arc<dyn StorageBackend>,
    leases: Arc<BackupLeases>,
    targets: Arc<DashMap<String, Arc<dyn RestoreTarget>>>,
    cancellations: Arc<DashMap<String, Arc<AtomicBool>>>,
    settings: Arc<EngineSettings>,
}

impl RestoreEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        storage: Arc<dyn StorageBackend>,
        leases: Arc<BackupLeases>,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            catalog,
            storage,
            leases,
            targets: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
            settings,
        }
    }

    /// Register (or replace) a named destination
    pub fn register_target(&self, name: impl Into<String>, target: Arc<dyn RestoreTarget>) {
        self.targets.insert(name.into(), target);
    }

    pub fn target_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Validate the request, record a running restore and spawn it.
    ///
    /// The backup must exist, be completed and not postdate the restore
    /// point; otherwise `NotRestorable` is returned and no record is created.
    #[instrument(skip(self, options), fields(backup_id = %options.backup_id))]
    pub fn start(&self, options: RestoreOptions) -> Result<String> {
        let target_name = options.target_name().to_string();
        let target = self
            .targets
            .get(&target_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BackupError::TargetNotFound(target_name.clone()))?;

        // Take the lease before reading the record so retention cannot
        // delete it in between.
        let lease = self.leases.acquire_read(&options.backup_id)?;
        let backup = self.restorable(&options)?;

        let restore_id = Uuid::new_v4().to_string();
        self.catalog
            .insert_restore(RestoreRecord::new(&restore_id, options.clone()));
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancellations.insert(restore_id.clone(), Arc::clone(&cancel));

        info!(
            restore_id = %restore_id,
            backup_id = %backup.id,
            target = %target_name,
            dry_run = options.dry_run,
            overwrite = options.overwrite_existing,
            "Restore started"
        );

        let engine = self.clone();
        let task_id = restore_id.clone();
        tokio::spawn(async move {
            engine
                .run(&task_id, backup, options, target, lease, cancel)
                .await;
        });

        Ok(restore_id)
    }

    fn restorable(&self, options: &RestoreOptions) -> Result<BackupRecord> {
        let not_restorable = |reason: String| BackupError::NotRestorable {
            backup_id: options.backup_id.clone(),
            reason,
        };

        let backup = self
            .catalog
            .backup(&options.backup_id)
            .map_err(|_| not_restorable("backup not found".to_string()))?;
        if backup.status != BackupStatus::Completed {
            return Err(not_restorable(format!("backup is {}", backup.status.as_str())));
        }
        if let Some(point) = options.restore_point {
            if backup.start_time > point {
                return Err(not_restorable(format!(
                    "backup started at {} which is after the restore point {}",
                    backup.start_time.to_rfc3339(),
                    point.to_rfc3339()
                )));
            }
        }
        Ok(backup)
    }

    /// Request cooperative cancellation.
    ///
    /// Returns `false` when the restore has already finished.
    pub fn cancel(&self, restore_id: &str) -> Result<bool> {
        let record = self.catalog.restore(restore_id)?;
        if record.status.is_terminal() {
            return Ok(false);
        }
        match self.cancellations.get(restore_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!(restore_id = %restore_id, "Restore cancellation requested");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn run(
        &self,
        restore_id: &str,
        backup: BackupRecord,
        options: RestoreOptions,
        target: Arc<dyn RestoreTarget>,
        lease: ReadLease,
        cancel: Arc<AtomicBool>,
    ) {
        let mut progress = Progress::default();
        let outcome = self
            .execute_steps(restore_id, &backup, &options, target.as_ref(), &cancel, &mut progress)
            .await;
        drop(lease);
        self.cancellations.remove(restore_id);

        let (status, verification, error) = match outcome {
            Ok(outcome) => (outcome.status, outcome.verification, None),
            Err(err) => {
                error!(
                    restore_id = %restore_id,
                    backup_id = %backup.id,
                    code = %err.code(),
                    error = %err,
                    "Restore failed"
                );
                (RestoreStatus::Failed, None, Some(err.to_info()))
            }
        };

        let updated = self.catalog.update_restore(restore_id, |record| {
            record.status = status;
            record.end_time = Some(Utc::now());
            record.total_items = progress.total;
            record.restored_items = progress.restored;
            record.skipped_items = progress.skipped;
            record.verification = verification;
            record.error = error;
        });
        if let Err(e) = updated {
            warn!(restore_id = %restore_id, error = %e, "Restore record vanished before completion");
        }

        metrics::record_restore_end(status.as_str(), options.dry_run);
        info!(
            restore_id = %restore_id,
            status = status.as_str(),
            restored = progress.restored,
            skipped = progress.skipped,
            total = progress.total,
            "Restore finished"
        );

        self.catalog
            .save_if_configured(self.settings.catalog_path.as_deref())
            .await;
    }

    async fn execute_steps(
        &self,
        restore_id: &str,
        backup: &BackupRecord,
        options: &RestoreOptions,
        target: &dyn RestoreTarget,
        cancel: &AtomicBool,
        progress: &mut Progress,
    ) -> Result<Outcome> {
        let passphrase = artifact::passphrase_for(&self.catalog, backup);
        let plaintext =
            artifact::load_plaintext(self.storage.as_ref(), backup, passphrase.as_deref()).await?;
        artifact::check_integrity(backup, &plaintext)?;
        let data = codec::from_canonical_bytes(&plaintext)?;
        debug!(restore_id = %restore_id, "Artifact verified");

        let plan: Vec<_> = data
            .leaves()
            .filter(|leaf| options.selective_restore.allows(&leaf.path(), leaf.key))
            .collect();
        progress.total = plan.len();
        self.catalog
            .update_restore(restore_id, |record| record.total_items = plan.len())?;

        if options.dry_run {
            for leaf in &plan {
                if !options.overwrite_existing && target.contains(&leaf.path()).await.map_err(target_error)? {
                    progress.skipped += 1;
                } else {
                    progress.restored += 1;
                }
            }
            return Ok(Outcome {
                status: RestoreStatus::Completed,
                verification: None,
            });
        }

        for leaf in &plan {
            if cancel.load(Ordering::SeqCst) {
                info!(
                    restore_id = %restore_id,
                    restored = progress.restored,
                    total = progress.total,
                    "Restore cancelled"
                );
                return Ok(Outcome {
                    status: RestoreStatus::Cancelled,
                    verification: None,
                });
            }

            let path = leaf.path();
            if !options.overwrite_existing && target.contains(&path).await.map_err(target_error)? {
                progress.skipped += 1;
            } else {
                target
                    .write(&path, leaf.value.clone())
                    .await
                    .map_err(target_error)?;
                progress.restored += 1;
                progress.restored_keys.push(path);
            }
            tokio::task::yield_now().await;
        }

        let mut data_integrity = true;
        for leaf in plan
            .iter()
            .filter(|leaf| self.settings.critical_keys.iter().any(|key| key == leaf.key))
        {
            if !target.contains(&leaf.path()).await.map_err(target_error)? {
                warn!(restore_id = %restore_id, key = %leaf.path(), "Critical key missing after restore");
                data_integrity = false;
            }
        }

        let mut functional_test = false;
        for key in &progress.restored_keys {
            if let Some(value) = target.read(key).await.map_err(target_error)? {
                if is_structured(&value) {
                    functional_test = true;
                    break;
                }
            }
        }

        Ok(Outcome {
            status: RestoreStatus::Completed,
            verification: Some(RestoreVerification {
                data_integrity,
                functional_test,
                verified_at: Utc::now(),
            }),
        })
    }
}

fn target_error(err: anyhow::Error) -> BackupError {
    BackupError::Io(format!("Restore target error: {:#}", err))
}

/// Objects, arrays, and strings holding a JSON object or array
fn is_structured(value: &Value) -> bool {
    match value {
        Value::Object(_) | Value::Array(_) => true,
        Value::String(text) => matches!(
            serde_json::from_str::<Value>(text),
            Ok(Value::Object(_)) | Ok(Value::Array(_))
        ),
        _ => false,
    }
}
