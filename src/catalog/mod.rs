//! Catalog of configurations, backup records and restore records
//!
//! Every mutation goes through a single `DashMap` entry, so concurrent
//! scheduled and manual executions never lose each other's updates. Terminal
//! transitions wake anyone waiting on a record.

mod leases;

pub use leases::{BackupLeases, DeleteLease, ReadLease};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backup::{BackupFilter, BackupRecord, BackupStatus};
use crate::config::BackupConfig;
use crate::restore::{RestoreRecord, RestoreStatus};
use crate::{BackupError, Result};

/// On-disk form of the catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDocument {
    #[serde(default)]
    pub configs: BTreeMap<String, BackupConfig>,
    #[serde(default)]
    pub backup_records: BTreeMap<String, BackupRecord>,
    #[serde(default)]
    pub restore_records: BTreeMap<String, RestoreRecord>,
}

#[derive(Default)]
pub struct Catalog {
    configs: DashMap<String, BackupConfig>,
    backups: DashMap<String, BackupRecord>,
    restores: DashMap<String, RestoreRecord>,
    changed: Notify,
    // Saves are serialized so the last write always carries the newest state.
    save_lock: Mutex<()>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    // Configurations

    pub fn insert_config(&self, config: BackupConfig) -> Result<()> {
        match self.configs.entry(config.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BackupError::ConfigValidation(vec![
                format!("configuration id {} already exists", config.id),
            ])),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(config);
                Ok(())
            }
        }
    }

    /// Replace an existing configuration, returning the previous version
    pub fn replace_config(&self, config: BackupConfig) -> Result<BackupConfig> {
        let mut entry = self
            .configs
            .get_mut(&config.id)
            .ok_or_else(|| BackupError::ConfigNotFound(config.id.clone()))?;
        Ok(std::mem::replace(entry.value_mut(), config))
    }

    pub fn config(&self, id: &str) -> Result<BackupConfig> {
        self.configs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackupError::ConfigNotFound(id.to_string()))
    }

    pub fn remove_config(&self, id: &str) -> Option<BackupConfig> {
        self.configs.remove(id).map(|(_, config)| config)
    }

    /// Most recently updated first
    pub fn configs(&self) -> Vec<BackupConfig> {
        let mut configs: Vec<BackupConfig> =
            self.configs.iter().map(|entry| entry.value().clone()).collect();
        configs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        configs
    }

    // Backup records

    pub fn insert_backup(&self, record: BackupRecord) {
        self.backups.insert(record.id.clone(), record);
    }

    pub fn backup(&self, id: &str) -> Result<BackupRecord> {
        self.backups
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackupError::BackupNotFound(id.to_string()))
    }

    /// Apply a terminal transition to a running record.
    ///
    /// Returns `None` when the record had already left `Running` (for
    /// example because the stale sweeper resolved it first).
    pub fn finish_backup<F>(&self, id: &str, f: F) -> Result<Option<BackupRecord>>
    where
        F: FnOnce(&mut BackupRecord),
    {
        let updated = {
            let mut entry = self
                .backups
                .get_mut(id)
                .ok_or_else(|| BackupError::BackupNotFound(id.to_string()))?;
            if entry.status.is_terminal() {
                return Ok(None);
            }
            f(entry.value_mut());
            entry.value().clone()
        };
        self.changed.notify_waiters();
        Ok(Some(updated))
    }

    /// Unconditional update of a record
    pub fn update_backup<F>(&self, id: &str, f: F) -> Result<BackupRecord>
    where
        F: FnOnce(&mut BackupRecord),
    {
        let updated = {
            let mut entry = self
                .backups
                .get_mut(id)
                .ok_or_else(|| BackupError::BackupNotFound(id.to_string()))?;
            f(entry.value_mut());
            entry.value().clone()
        };
        self.changed.notify_waiters();
        Ok(updated)
    }

    pub fn remove_backup(&self, id: &str) -> Option<BackupRecord> {
        let removed = self.backups.remove(id).map(|(_, record)| record);
        if removed.is_some() {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Records matching `filter`, most recent first
    pub fn backups(&self, filter: &BackupFilter) -> Vec<BackupRecord> {
        let mut records: Vec<BackupRecord> = self
            .backups
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        records
    }

    pub fn running_backups(&self) -> Vec<BackupRecord> {
        self.backups(&BackupFilter::default().with_status(BackupStatus::Running))
    }

    // Restore records

    pub fn insert_restore(&self, record: RestoreRecord) {
        self.restores.insert(record.id.clone(), record);
    }

    pub fn restore(&self, id: &str) -> Result<RestoreRecord> {
        self.restores
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackupError::RestoreNotFound(id.to_string()))
    }

    pub fn update_restore<F>(&self, id: &str, f: F) -> Result<RestoreRecord>
    where
        F: FnOnce(&mut RestoreRecord),
    {
        let updated = {
            let mut entry = self
                .restores
                .get_mut(id)
                .ok_or_else(|| BackupError::RestoreNotFound(id.to_string()))?;
            f(entry.value_mut());
            entry.value().clone()
        };
        if updated.status.is_terminal() {
            self.changed.notify_waiters();
        }
        Ok(updated)
    }

    /// Restores of one backup (or all), most recent first
    pub fn restores(&self, backup_id: Option<&str>) -> Vec<RestoreRecord> {
        let mut records: Vec<RestoreRecord> = self
            .restores
            .iter()
            .filter(|entry| backup_id.map_or(true, |id| entry.backup_id == id))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        records
    }

    // Waiting

    /// Resolve once the backup leaves `Running`
    pub async fn wait_for_backup(&self, id: &str) -> Result<BackupRecord> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let record = self.backup(id)?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            notified.await;
        }
    }

    /// Resolve once the restore leaves `Running`
    pub async fn wait_for_restore(&self, id: &str) -> Result<RestoreRecord> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let record = self.restore(id)?;
            if record.status != RestoreStatus::Running {
                return Ok(record);
            }
            notified.await;
        }
    }

    // Persistence

    pub fn to_document(&self) -> CatalogDocument {
        CatalogDocument {
            configs: self
                .configs
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            backup_records: self
                .backups
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            restore_records: self
                .restores
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    pub fn from_document(document: CatalogDocument) -> Self {
        let catalog = Self::new();
        for (id, config) in document.configs {
            catalog.configs.insert(id, config);
        }
        for (id, record) in document.backup_records {
            catalog.backups.insert(id, record);
        }
        for (id, record) in document.restore_records {
            catalog.restores.insert(id, record);
        }
        catalog
    }

    /// Write the catalog as JSON via a temp file and rename
    pub async fn save(&self, path: &Path) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let json = serde_json::to_vec_pretty(&self.to_document())
            .map_err(|e| BackupError::Serialization(format!("Failed to serialize catalog: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let written = match fs::write(&tmp_path, &json).await {
            Ok(()) => fs::rename(&tmp_path, path)
                .await
                .map_err(|e| BackupError::Io(format!("Failed to replace catalog: {}", e))),
            Err(e) => Err(BackupError::Io(format!("Failed to write catalog: {}", e))),
        };
        if written.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        written?;

        debug!(path = %path.display(), bytes = json.len(), "Catalog saved");
        Ok(())
    }

    /// Save to `path` when one is configured, logging failures
    pub async fn save_if_configured(&self, path: Option<&Path>) {
        if let Some(path) = path {
            if let Err(e) = self.save(path).await {
                warn!(path = %path.display(), error = %e, "Failed to persist catalog");
            }
        }
    }

    /// Load a catalog file; a missing file yields an empty catalog
    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::new());
        }
        let json = fs::read(path)
            .await
            .map_err(|e| BackupError::Io(format!("Failed to read catalog: {}", e)))?;
        let document: CatalogDocument = serde_json::from_slice(&json)
            .map_err(|e| BackupError::Serialization(format!("Failed to parse catalog: {}", e)))?;
        Ok(Self::from_document(document))
    }
}
