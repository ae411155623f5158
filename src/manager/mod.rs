//! The service facade
//!
//! [`BackupService`] owns the catalog, the scheduler, the backup pipeline and
//! the restore engine. It is always handed out as an `Arc` because timers
//! and the stale sweeper call back into it.

mod builder;

pub use builder::BackupServiceBuilder;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::backup::{
    BackupFilter, BackupRecord, BackupStats, BackupStatus, ExecuteOptions, Pipeline,
    VerificationResult,
};
use crate::catalog::{BackupLeases, Catalog};
use crate::collector::SnapshotCollector;
use crate::config::BackupConfig;
use crate::notify::NotificationDispatcher;
use crate::restore::{RestoreEngine, RestoreOptions, RestoreRecord, RestoreTarget};
use crate::retention::CleanupResult;
use crate::scheduler::{RunSet, ScheduledJob, Scheduler};
use crate::settings::EngineSettings;
use crate::storage::StorageBackend;
use crate::{BackupError, Result};

pub struct BackupService {
    catalog: Arc<Catalog>,
    pipeline: Pipeline,
    restores: RestoreEngine,
    scheduler: Scheduler,
    run_set: Arc<RunSet>,
    settings: Arc<EngineSettings>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    this: Weak<BackupService>,
}

impl BackupService {
    fn assemble(
        catalog: Arc<Catalog>,
        storage: Arc<dyn StorageBackend>,
        collector: Arc<dyn SnapshotCollector>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        settings: Arc<EngineSettings>,
    ) -> Arc<Self> {
        let leases = Arc::new(BackupLeases::new());
        let run_set = Arc::new(RunSet::new());
        let pipeline = Pipeline::new(
            Arc::clone(&catalog),
            Arc::clone(&storage),
            collector,
            dispatcher,
            Arc::clone(&leases),
            Arc::clone(&run_set),
            Arc::clone(&settings),
        );
        let restores = RestoreEngine::new(
            Arc::clone(&catalog),
            storage,
            leases,
            Arc::clone(&settings),
        );

        Arc::new_cyclic(|this| Self {
            catalog,
            pipeline,
            restores,
            scheduler: Scheduler::new(),
            run_set,
            settings,
            sweeper: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn persist(&self) {
        self.catalog
            .save_if_configured(self.settings.catalog_path.as_deref())
            .await;
    }

    fn register_schedule(&self, config: &BackupConfig) -> Option<DateTime<Utc>> {
        let job: Weak<dyn ScheduledJob> = self.this.clone();
        self.scheduler.register(&config.id, &config.schedule, job)
    }

    // Configurations

    /// Validate and store a new configuration.
    ///
    /// A fresh id and timestamps are assigned. Nothing is stored when
    /// validation fails.
    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_config(&self, draft: BackupConfig) -> Result<BackupConfig> {
        draft.validate().map_err(|e| {
            warn!(error = %e, "Rejected backup configuration");
            e
        })?;

        let now = Utc::now();
        let config = BackupConfig {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            ..draft
        };
        self.catalog.insert_config(config.clone())?;
        let next_run = self.register_schedule(&config);
        info!(config_id = %config.id, next_run = ?next_run, "Backup configuration created");

        self.persist().await;
        Ok(config)
    }

    /// Replace a configuration, keeping its id and creation time.
    ///
    /// The timer is re-registered only when the schedule changed.
    #[instrument(skip(self, draft))]
    pub async fn update_config(&self, id: &str, draft: BackupConfig) -> Result<BackupConfig> {
        let existing = self.catalog.config(id)?;
        draft.validate()?;

        let config = BackupConfig {
            id: existing.id.clone(),
            created_at: existing.created_at,
            updated_at: Utc::now(),
            ..draft
        };
        self.catalog.replace_config(config.clone())?;

        if existing.schedule != config.schedule {
            let next_run = self.register_schedule(&config);
            info!(config_id = %id, next_run = ?next_run, "Backup schedule changed");
        }
        debug!(config_id = %id, "Backup configuration updated");

        self.persist().await;
        Ok(config)
    }

    /// Remove a configuration and its timer. Its backup records remain.
    #[instrument(skip(self))]
    pub async fn delete_config(&self, id: &str) -> Result<BackupConfig> {
        self.catalog.config(id)?;
        let removed = self
            .run_set
            .when_idle(id, || self.catalog.remove_config(id))?
            .ok_or_else(|| BackupError::ConfigNotFound(id.to_string()))?;
        self.scheduler.unregister(id);
        info!(config_id = %id, "Backup configuration deleted");

        self.persist().await;
        Ok(removed)
    }

    pub fn get_config(&self, id: &str) -> Result<BackupConfig> {
        self.catalog.config(id)
    }

    /// Most recently updated first
    pub fn list_configs(&self) -> Vec<BackupConfig> {
        self.catalog.configs()
    }

    pub fn next_run_for(&self, config_id: &str) -> Option<DateTime<Utc>> {
        self.scheduler.next_run_for(config_id)
    }

    // Backups

    /// Trigger a backup and return its record id immediately
    pub async fn execute_backup(&self, config_id: &str, options: ExecuteOptions) -> Result<String> {
        let config = self.catalog.config(config_id)?;
        self.pipeline.start(config, options)
    }

    /// Resolve once the backup has finished, including retention cleanup
    pub async fn wait_for_backup(&self, backup_id: &str) -> Result<BackupRecord> {
        self.pipeline.wait(backup_id).await
    }

    pub async fn verify_backup(&self, backup_id: &str) -> Result<VerificationResult> {
        self.pipeline.verify(backup_id).await
    }

    pub fn get_backup(&self, backup_id: &str) -> Result<BackupRecord> {
        self.catalog.backup(backup_id)
    }

    /// Most recent first
    pub fn list_backups(&self, filter: &BackupFilter) -> Vec<BackupRecord> {
        self.catalog.backups(filter)
    }

    /// Delete a backup's artifact and record
    #[instrument(skip(self))]
    pub async fn delete_backup(&self, backup_id: &str) -> Result<BackupRecord> {
        let record = self.pipeline.retention().delete(backup_id).await?;
        info!(backup_id = %backup_id, config_id = %record.config_id, "Backup deleted");
        self.persist().await;
        Ok(record)
    }

    /// Apply a configuration's retention policy now
    pub async fn cleanup(&self, config_id: &str) -> Result<CleanupResult> {
        let result = self.pipeline.retention().cleanup(config_id).await?;
        self.persist().await;
        Ok(result)
    }

    pub fn backup_stats(&self) -> BackupStats {
        let mut stats = BackupStats::default();
        for record in self.catalog.backups(&BackupFilter::default()) {
            stats.total += 1;
            *stats
                .by_status
                .entry(record.status.as_str().to_string())
                .or_default() += 1;
            *stats.by_config.entry(record.config_id.clone()).or_default() += 1;

            if record.status == BackupStatus::Completed {
                stats.stored_bytes += record.size;
                let finished = record.end_time.unwrap_or(record.start_time);
                if stats.last_success.map_or(true, |last| finished > last) {
                    stats.last_success = Some(finished);
                }
            }
        }
        stats
    }

    /// Resolve running records older than `threshold` to failed
    pub async fn sweep_stale_backups(&self, threshold: Duration) -> Vec<String> {
        self.pipeline.sweep_stale(threshold).await
    }

    // Restores

    pub fn register_target(&self, name: impl Into<String>, target: Arc<dyn RestoreTarget>) {
        self.restores.register_target(name, target);
    }

    /// Start a restore and return its record id immediately
    pub async fn execute_restore(&self, options: RestoreOptions) -> Result<String> {
        self.restores.start(options)
    }

    pub async fn wait_for_restore(&self, restore_id: &str) -> Result<RestoreRecord> {
        self.catalog.wait_for_restore(restore_id).await
    }

    /// Request cooperative cancellation; `false` if it already finished
    pub fn cancel_restore(&self, restore_id: &str) -> Result<bool> {
        self.restores.cancel(restore_id)
    }

    pub fn get_restore(&self, restore_id: &str) -> Result<RestoreRecord> {
        self.catalog.restore(restore_id)
    }

    /// Restores of one backup, or all restores, most recent first
    pub fn list_restores(&self, backup_id: Option<&str>) -> Vec<RestoreRecord> {
        self.catalog.restores(backup_id)
    }

    // Lifecycle

    /// Register every enabled schedule, resolve stale records and start the
    /// periodic stale sweeper.
    pub async fn start(&self) {
        let configs = self.catalog.configs();
        for config in &configs {
            self.register_schedule(config);
        }

        let resolved = self.sweep_stale_backups(self.settings.stale_after).await;
        info!(
            configs = configs.len(),
            scheduled = self.scheduler.len(),
            resolved_stale = resolved.len(),
            "Backup service started"
        );

        let this = self.this.clone();
        let interval = self.settings.sweep_interval.max(Duration::from_millis(10));
        let stale_after = self.settings.stale_after;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = this.upgrade() else {
                    break;
                };
                let resolved = service.sweep_stale_backups(stale_after).await;
                if !resolved.is_empty() {
                    debug!(count = resolved.len(), "Stale sweep resolved backups");
                }
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop all timers and the sweeper. Running executions finish on their own.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        info!("Backup service stopped");
    }
}

impl Drop for BackupService {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
    }
}

#[async_trait]
impl ScheduledJob for BackupService {
    async fn run_scheduled(&self, config_id: &str) {
        let config = match self.catalog.config(config_id) {
            Ok(config) => config,
            Err(e) => {
                warn!(config_id = %config_id, error = %e, "Scheduled configuration is gone");
                self.scheduler.unregister(config_id);
                return;
            }
        };

        match self.pipeline.start(config, ExecuteOptions::default()) {
            Ok(backup_id) => info!(config_id = %config_id, backup_id = %backup_id, "Scheduled backup triggered"),
            Err(BackupError::BackupAlreadyRunning(_)) => {
                warn!(config_id = %config_id, "Skipping scheduled backup, previous run still in progress")
            }
            Err(e) => error!(config_id = %config_id, error = %e, "Scheduled backup could not start"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::SectionKind;
    use crate::collector::StaticCollector;
    use crate::config::{BackupScope, BackupType, ScheduleConfig};
    use crate::restore::MemoryTarget;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn service() -> Arc<BackupService> {
        let collector = StaticCollector::new();
        collector.set(SectionKind::UserData, "profiles", "u1", json!({"name": "ada"}));
        BackupServiceBuilder::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(collector),
            Arc::new(MemoryTarget::new()),
        )
        .build()
    }

    #[tokio::test]
    async fn test_create_config_assigns_identity() {
        let service = service();
        let draft = BackupConfig::new("nightly", BackupType::Full, BackupScope::All)
            .with_schedule(ScheduleConfig::daily("02:00"));
        let draft_id = draft.id.clone();

        let config = service.create_config(draft).await.unwrap();
        assert_ne!(config.id, draft_id);
        assert_eq!(service.get_config(&config.id).unwrap(), config);
        assert!(service.next_run_for(&config.id).is_some());
    }

    #[tokio::test]
    async fn test_invalid_config_is_not_stored() {
        let service = service();
        let draft = BackupConfig::new("", BackupType::Full, BackupScope::All);
        assert!(matches!(
            service.create_config(draft).await,
            Err(BackupError::ConfigValidation(_))
        ));
        assert!(service.list_configs().is_empty());
    }

    #[tokio::test]
    async fn test_update_config_reschedules() {
        let service = service();
        let config = service
            .create_config(BackupConfig::new("n", BackupType::Full, BackupScope::All))
            .await
            .unwrap();
        assert!(service.next_run_for(&config.id).is_none());

        let draft = config.clone().with_schedule(ScheduleConfig::hourly());
        let updated = service.update_config(&config.id, draft).await.unwrap();
        assert_eq!(updated.created_at, config.created_at);
        assert!(updated.updated_at >= config.updated_at);
        assert!(service.next_run_for(&config.id).is_some());

        let draft = updated.clone().with_schedule(ScheduleConfig::manual());
        service.update_config(&config.id, draft).await.unwrap();
        assert!(service.next_run_for(&config.id).is_none());
    }

    #[tokio::test]
    async fn test_delete_config_busy_while_running() {
        let service = service();
        let config = service
            .create_config(BackupConfig::new("n", BackupType::Full, BackupScope::All))
            .await
            .unwrap();

        let backup_id = service
            .execute_backup(&config.id, ExecuteOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            service.delete_config(&config.id).await,
            Err(BackupError::ConfigBusy(_))
        ));

        service.wait_for_backup(&backup_id).await.unwrap();
        service.delete_config(&config.id).await.unwrap();
        assert!(service.get_backup(&backup_id).is_ok());
        assert!(matches!(
            service.get_config(&config.id),
            Err(BackupError::ConfigNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_busy_delete_keeps_config_and_schedule() {
        let service = service();
        let config = service
            .create_config(
                BackupConfig::new("n", BackupType::Full, BackupScope::All)
                    .with_schedule(ScheduleConfig::hourly()),
            )
            .await
            .unwrap();
        service.start().await;
        assert!(service.next_run_for(&config.id).is_some());

        let slot = service.run_set.claim(&config.id, "held", false).unwrap();
        assert!(matches!(
            service.delete_config(&config.id).await,
            Err(BackupError::ConfigBusy(_))
        ));
        assert!(service.get_config(&config.id).is_ok());
        assert!(service.next_run_for(&config.id).is_some());
        drop(slot);

        service.delete_config(&config.id).await.unwrap();
        assert!(service.next_run_for(&config.id).is_none());
        assert!(matches!(
            service.execute_backup(&config.id, ExecuteOptions::default()).await,
            Err(BackupError::ConfigNotFound(_))
        ));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_stats() {
        let service = service();
        let config = service
            .create_config(BackupConfig::new("n", BackupType::Full, BackupScope::All))
            .await
            .unwrap();
        for _ in 0..2 {
            let id = service
                .execute_backup(&config.id, ExecuteOptions::default())
                .await
                .unwrap();
            service.wait_for_backup(&id).await.unwrap();
        }

        let stats = service.backup_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get("completed"), Some(&2));
        assert_eq!(stats.by_config.get(&config.id), Some(&2));
        assert!(stats.stored_bytes > 0);
        assert!(stats.last_success.is_some());
    }

    #[tokio::test]
    async fn test_scheduled_trigger_skips_busy_config() {
        let service = service();
        let config = service
            .create_config(BackupConfig::new("n", BackupType::Full, BackupScope::All))
            .await
            .unwrap();

        let running = service
            .execute_backup(&config.id, ExecuteOptions::default())
            .await
            .unwrap();
        service.run_scheduled(&config.id).await;
        assert_eq!(service.list_backups(&BackupFilter::for_config(&config.id)).len(), 1);

        service.wait_for_backup(&running).await.unwrap();
        service.run_scheduled(&config.id).await;
        assert_eq!(service.list_backups(&BackupFilter::for_config(&config.id)).len(), 2);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let service = service();
        service
            .create_config(
                BackupConfig::new("n", BackupType::Full, BackupScope::All)
                    .with_schedule(ScheduleConfig::hourly()),
            )
            .await
            .unwrap();
        service.start().await;
        assert!(service.sweeper.lock().is_some());
        service.shutdown();
        assert!(service.sweeper.lock().is_none());
        assert!(service.scheduler.is_empty());
    }
}
