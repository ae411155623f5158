// Integration tests for file-backed artifacts and catalog persistence

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use statevault::backup::{SectionKind, VerificationStatus};
use statevault::catalog::Catalog;
use statevault::collector::StaticCollector;
use statevault::config::{ScheduleConfig, StorageConfig};
use statevault::restore::MemoryTarget;
use statevault::storage::{FileStorage, StorageBackend};
use statevault::{
    BackupConfig, BackupScope, BackupService, BackupServiceBuilder, BackupStatus, BackupType,
    EngineSettings, ErrorCode, ExecuteOptions, RestoreOptions, RestoreStatus,
};

fn collector() -> StaticCollector {
    let collector = StaticCollector::new();
    collector.set(SectionKind::UserData, "profiles", "alice", json!({"plan": "pro"}));
    collector.set(SectionKind::SystemConfig, "runtime", "app_settings", json!({"region": "eu"}));
    collector
}

async fn open(dir: &TempDir, target: MemoryTarget) -> Arc<BackupService> {
    let settings = EngineSettings::new()
        .environment("test")
        .catalog_path(dir.path().join("catalog.json"))
        .stale_after(Duration::from_secs(3600));
    BackupServiceBuilder::new(
        Arc::new(FileStorage::new(dir.path().join("artifacts"))),
        Arc::new(collector()),
        Arc::new(target),
    )
    .settings(settings)
    .open()
    .await
    .expect("service should open")
}

#[tokio::test]
async fn test_catalog_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (config_id, backup_id) = {
        let service = open(&dir, MemoryTarget::new()).await;
        let config = service
            .create_config(
                BackupConfig::new("nightly", BackupType::Full, BackupScope::All)
                    .with_schedule(ScheduleConfig::daily("03:30"))
                    .with_storage(StorageConfig::local("nightly").encrypted("s3cret")),
            )
            .await
            .unwrap();
        let backup_id = service
            .execute_backup(&config.id, ExecuteOptions::default())
            .await
            .unwrap();
        let record = service.wait_for_backup(&backup_id).await.unwrap();
        assert_eq!(record.status, BackupStatus::Completed);
        assert_eq!(record.metadata.environment, "test");
        service.shutdown();
        (config.id, backup_id)
    };

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("catalog.json")).unwrap()).unwrap();
    assert_eq!(raw["backupRecords"][&backup_id]["status"], "completed");

    let target = MemoryTarget::new();
    let service = open(&dir, target.clone()).await;
    service.start().await;
    assert!(service.next_run_for(&config_id).is_some());

    let restore_id = service
        .execute_restore(RestoreOptions::new(&backup_id))
        .await
        .unwrap();
    let restored = service.wait_for_restore(&restore_id).await.unwrap();
    assert_eq!(restored.status, RestoreStatus::Completed);
    assert_eq!(target.get("userData/profiles/alice"), Some(json!({"plan": "pro"})));
    service.shutdown();
}

#[tokio::test]
async fn test_missing_artifact_fails_restore_and_verification() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(&dir, MemoryTarget::new()).await;
    let config = service
        .create_config(BackupConfig::new("n", BackupType::Full, BackupScope::All))
        .await
        .unwrap();
    let backup_id = service
        .execute_backup(&config.id, ExecuteOptions::default())
        .await
        .unwrap();
    let record = service.wait_for_backup(&backup_id).await.unwrap();

    let storage = FileStorage::new(dir.path().join("artifacts"));
    assert!(storage.exists(&record.storage_location).await.unwrap());
    storage.delete(&record.storage_location).await.unwrap();

    let restore_id = service
        .execute_restore(RestoreOptions::new(&backup_id))
        .await
        .unwrap();
    let restored = service.wait_for_restore(&restore_id).await.unwrap();
    assert_eq!(restored.status, RestoreStatus::Failed);
    assert_eq!(restored.error.unwrap().code, ErrorCode::StorageError);

    // A missing artifact is not proof of corruption; the record keeps its status.
    let verification = service.verify_backup(&backup_id).await.unwrap();
    assert!(!verification.is_valid);
    let record = service.get_backup(&backup_id).unwrap();
    assert_eq!(record.status, BackupStatus::Completed);
    assert_eq!(record.verification_status, Some(VerificationStatus::Failed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_backups_all_persist() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(&dir, MemoryTarget::new()).await;

    let mut config_ids = Vec::new();
    for i in 0..16 {
        let config = service
            .create_config(
                BackupConfig::new(format!("c{i}"), BackupType::Full, BackupScope::All)
                    .with_storage(StorageConfig::local(format!("c{i}"))),
            )
            .await
            .unwrap();
        config_ids.push(config.id);
    }

    let handles: Vec<_> = config_ids
        .iter()
        .cloned()
        .map(|config_id| {
            let service = service.clone();
            tokio::spawn(async move {
                let id = service
                    .execute_backup(&config_id, ExecuteOptions::default())
                    .await
                    .unwrap();
                service.wait_for_backup(&id).await.unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().status, BackupStatus::Completed);
    }
    service.shutdown();

    let catalog = Catalog::load(&dir.path().join("catalog.json")).await.unwrap();
    let document = catalog.to_document();
    assert_eq!(document.configs.len(), 16);
    assert_eq!(document.backup_records.len(), 16);
    assert!(document
        .backup_records
        .values()
        .all(|record| record.status == BackupStatus::Completed));
}

#[tokio::test]
async fn test_interrupted_run_is_resolved_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");

    {
        let service = open(&dir, MemoryTarget::new()).await;
        let config = service
            .create_config(BackupConfig::new("n", BackupType::Full, BackupScope::All))
            .await
            .unwrap();
        let backup_id = service
            .execute_backup(&config.id, ExecuteOptions::default())
            .await
            .unwrap();
        service.wait_for_backup(&backup_id).await.unwrap();
    }

    // Simulate a crash mid-run by rewriting one record as running and old.
    let catalog = Catalog::load(&path).await.unwrap();
    let mut document = catalog.to_document();
    let record = document.backup_records.values_mut().next().unwrap();
    record.status = BackupStatus::Running;
    record.end_time = None;
    record.start_time = chrono::Utc::now() - chrono::Duration::hours(2);
    let interrupted = record.id.clone();
    Catalog::from_document(document).save(&path).await.unwrap();

    let service = open(&dir, MemoryTarget::new()).await;
    service.start().await;
    let record = service.get_backup(&interrupted).unwrap();
    assert_eq!(record.status, BackupStatus::Failed);
    assert_eq!(record.error.unwrap().code, ErrorCode::StaleExecution);
    service.shutdown();
}
