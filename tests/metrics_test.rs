// Active-backup gauge accounting across restarts
// Kept in its own binary so no other test moves the process-wide gauge.

use std::sync::Arc;
use std::time::Duration;

use statevault::catalog::Catalog;
use statevault::collector::StaticCollector;
use statevault::metrics;
use statevault::restore::MemoryTarget;
use statevault::storage::MemoryStorage;
use statevault::{
    BackupConfig, BackupScope, BackupServiceBuilder, BackupStatus, BackupType, EngineSettings,
    ExecuteOptions,
};

#[tokio::test]
async fn test_gauge_balances_for_live_and_interrupted_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    let settings = EngineSettings::new()
        .catalog_path(path.clone())
        .stale_after(Duration::from_secs(3600));

    let first = BackupServiceBuilder::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(StaticCollector::new()),
        Arc::new(MemoryTarget::new()),
    )
    .settings(settings.clone())
    .open()
    .await
    .unwrap();
    let config = first
        .create_config(BackupConfig::new("n", BackupType::Full, BackupScope::All))
        .await
        .unwrap();
    let id = first
        .execute_backup(&config.id, ExecuteOptions::default())
        .await
        .unwrap();
    first.wait_for_backup(&id).await.unwrap();
    assert_eq!(metrics::active_backups(), 0);
    drop(first);

    // Leave a record behind as if the process died mid-run.
    let catalog = Catalog::load(&path).await.unwrap();
    let mut document = catalog.to_document();
    let record = document.backup_records.get_mut(&id).unwrap();
    record.status = BackupStatus::Running;
    record.end_time = None;
    record.start_time = chrono::Utc::now() - chrono::Duration::hours(2);
    Catalog::from_document(document).save(&path).await.unwrap();

    let second = BackupServiceBuilder::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(StaticCollector::new()),
        Arc::new(MemoryTarget::new()),
    )
    .settings(settings)
    .open()
    .await
    .unwrap();
    second.start().await;

    assert_eq!(second.get_backup(&id).unwrap().status, BackupStatus::Failed);
    assert_eq!(metrics::active_backups(), 0);
    second.shutdown();
}
