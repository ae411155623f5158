// Integration tests for backup execution, retention and restore
// Runs the full service against in-memory storage, collector and destination

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use statevault::backup::{BackupFilter, SectionKind};
use statevault::collector::StaticCollector;
use statevault::config::{
    ChannelKind, NotificationChannel, NotificationConfig, StorageConfig,
};
use statevault::notify::{NotificationEvent, RecordingDispatcher};
use statevault::restore::{MemoryTarget, RestoreTarget};
use statevault::storage::{MemoryStorage, StorageBackend};
use statevault::{
    BackupConfig, BackupError, BackupScope, BackupService, BackupServiceBuilder, BackupStatus,
    BackupType, ErrorCode, ExecuteOptions, KeyFilter, RestoreOptions, RestoreStatus,
    RetentionPolicy,
};

struct Fixture {
    service: Arc<BackupService>,
    storage: MemoryStorage,
    collector: StaticCollector,
    target: MemoryTarget,
    dispatcher: RecordingDispatcher,
}

fn fixture() -> Fixture {
    let collector = StaticCollector::new();
    collector.set(SectionKind::UserData, "profiles", "alice", json!({"email": "alice@example.com"}));
    collector.set(SectionKind::UserData, "profiles", "bob", json!({"email": "bob@example.com"}));
    collector.set(SectionKind::UserData, "preferences", "theme", json!("dark"));
    collector.set(SectionKind::SystemConfig, "runtime", "app_settings", json!({"locale": "en"}));
    collector.set(SectionKind::AnalyticsData, "events", "logins", json!([1, 2, 3]));

    let storage = MemoryStorage::new();
    let target = MemoryTarget::new();
    let dispatcher = RecordingDispatcher::new();
    let service = BackupServiceBuilder::new(
        Arc::new(storage.clone()),
        Arc::new(collector.clone()),
        Arc::new(target.clone()),
    )
    .dispatcher(Arc::new(dispatcher.clone()))
    .build();

    Fixture {
        service,
        storage,
        collector,
        target,
        dispatcher,
    }
}

/// Uncompressed, unencrypted artifacts keep a flipped byte visible to the checksum
fn plain(config: BackupConfig) -> BackupConfig {
    let retention = config.retention.clone().compression(false);
    config.with_retention(retention)
}

async fn backup(f: &Fixture, config_id: &str) -> statevault::BackupRecord {
    let id = f
        .service
        .execute_backup(config_id, ExecuteOptions::default())
        .await
        .expect("backup should start");
    f.service.wait_for_backup(&id).await.expect("backup record")
}

async fn restore(f: &Fixture, options: RestoreOptions) -> statevault::RestoreRecord {
    let id = f
        .service
        .execute_restore(options)
        .await
        .expect("restore should start");
    f.service.wait_for_restore(&id).await.expect("restore record")
}

#[tokio::test]
async fn test_user_data_backup_counts_keys() {
    let f = fixture();
    let config = f
        .service
        .create_config(BackupConfig::new("users", BackupType::Full, BackupScope::UserData))
        .await
        .unwrap();
    assert!(!config.schedule.enabled);

    let record = backup(&f, &config.id).await;

    assert_eq!(record.status, BackupStatus::Completed);
    assert_eq!(record.file_count, 3);
    assert_eq!(record.scope, BackupScope::UserData);
    assert_eq!(
        f.service.list_backups(&BackupFilter::for_config(&config.id)).len(),
        1
    );
}

#[tokio::test]
async fn test_restore_round_trip_matches_checksum() {
    let f = fixture();
    let config = f
        .service
        .create_config(BackupConfig::new("all", BackupType::Full, BackupScope::All))
        .await
        .unwrap();
    let record = backup(&f, &config.id).await;

    let restored = restore(&f, RestoreOptions::new(&record.id)).await;

    assert_eq!(restored.status, RestoreStatus::Completed);
    assert_eq!(restored.total_items, 5);
    assert_eq!(restored.restored_items, 5);
    assert_eq!(
        f.target.get("systemConfig/runtime/app_settings"),
        Some(json!({"locale": "en"}))
    );
    let verification = restored.verification.expect("verification");
    assert!(verification.data_integrity);
    assert!(verification.functional_test);

    let verified = f.service.verify_backup(&record.id).await.unwrap();
    assert!(verified.is_valid);
    assert_eq!(verified.actual_checksum.as_deref(), Some(record.checksum.as_str()));
}

#[tokio::test]
async fn test_flipped_byte_fails_integrity_check() {
    let f = fixture();
    let config = f
        .service
        .create_config(plain(BackupConfig::new("all", BackupType::Full, BackupScope::All)))
        .await
        .unwrap();
    let record = backup(&f, &config.id).await;
    f.target.write("userData/preferences/theme", json!("light")).await.unwrap();
    let before = f.target.snapshot();

    assert!(f.storage.tamper(&record.storage_location, |bytes| {
        let at = bytes.len() / 3;
        bytes[at] ^= 0x04;
    }));

    let restored = restore(&f, RestoreOptions::new(&record.id).overwrite(true)).await;
    assert_eq!(restored.status, RestoreStatus::Failed);
    assert_eq!(restored.error.unwrap().code, ErrorCode::IntegrityCheckFailed);
    assert_eq!(restored.restored_items, 0);
    assert_eq!(f.target.snapshot(), before);
}

#[tokio::test]
async fn test_only_one_unforced_run_per_config() {
    let f = fixture();
    let config = f
        .service
        .create_config(BackupConfig::new("all", BackupType::Full, BackupScope::All))
        .await
        .unwrap();

    let first = f
        .service
        .execute_backup(&config.id, ExecuteOptions::default())
        .await
        .unwrap();
    let second = f
        .service
        .execute_backup(&config.id, ExecuteOptions::default())
        .await;
    assert!(matches!(second, Err(BackupError::BackupAlreadyRunning(_))));

    let running = f.service.list_backups(
        &BackupFilter::for_config(&config.id).with_status(BackupStatus::Running),
    );
    assert_eq!(running.len(), 1);

    f.service.wait_for_backup(&first).await.unwrap();
    backup(&f, &config.id).await;
}

#[tokio::test]
async fn test_retention_keeps_newest_three() {
    let f = fixture();
    let config = f
        .service
        .create_config(
            BackupConfig::new("all", BackupType::Full, BackupScope::All)
                .with_retention(RetentionPolicy::new().max_backups(3)),
        )
        .await
        .unwrap();

    let mut records = Vec::new();
    for _ in 0..4 {
        records.push(backup(&f, &config.id).await);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let remaining = f.service.list_backups(
        &BackupFilter::for_config(&config.id).with_status(BackupStatus::Completed),
    );
    assert_eq!(remaining.len(), 3);
    assert!(remaining.iter().all(|r| r.id != records[0].id));
    assert!(!f.storage.exists(&records[0].storage_location).await.unwrap());
    assert!(f.storage.exists(&records[3].storage_location).await.unwrap());
}

#[tokio::test]
async fn test_exclusion_beats_inclusion() {
    let f = fixture();
    f.collector.set(SectionKind::CustomData, "kv", "a", json!(1));
    f.collector.set(SectionKind::CustomData, "kv", "b", json!(2));
    let config = f
        .service
        .create_config(BackupConfig::new("all", BackupType::Full, BackupScope::All))
        .await
        .unwrap();
    let record = backup(&f, &config.id).await;

    let filter = KeyFilter::new().include_keys(["a", "b"]).exclude_keys(["b"]);
    let restored = restore(&f, RestoreOptions::new(&record.id).selective(filter)).await;

    assert_eq!(restored.total_items, 1);
    assert_eq!(
        f.target.snapshot().into_keys().collect::<Vec<_>>(),
        vec!["customData/kv/a".to_string()]
    );
}

#[tokio::test]
async fn test_existing_values_survive_default_restore() {
    let f = fixture();
    let config = f
        .service
        .create_config(BackupConfig::new("users", BackupType::Full, BackupScope::UserData))
        .await
        .unwrap();
    let record = backup(&f, &config.id).await;
    f.target.write("userData/preferences/theme", json!("v1")).await.unwrap();

    let restored = restore(&f, RestoreOptions::new(&record.id)).await;

    assert_eq!(restored.status, RestoreStatus::Completed);
    assert_eq!(restored.skipped_items, 1);
    assert_eq!(f.target.get("userData/preferences/theme"), Some(json!("v1")));
}

#[tokio::test]
async fn test_dry_run_matches_real_restore() {
    let f = fixture();
    let config = f
        .service
        .create_config(BackupConfig::new("all", BackupType::Full, BackupScope::All))
        .await
        .unwrap();
    let record = backup(&f, &config.id).await;
    let filter = KeyFilter::new().include_paths(["userData"]);

    let dry = restore(
        &f,
        RestoreOptions::new(&record.id).selective(filter.clone()).dry_run(true),
    )
    .await;
    assert!(f.target.is_empty());

    let real = restore(&f, RestoreOptions::new(&record.id).selective(filter)).await;
    assert_eq!(dry.total_items, real.total_items);
    assert_eq!(dry.restored_items, real.restored_items);
    assert_eq!(f.target.len(), 3);
}

#[tokio::test]
async fn test_encrypted_backup_restores() {
    let f = fixture();
    let config = f
        .service
        .create_config(
            BackupConfig::new("secret", BackupType::Full, BackupScope::SystemConfig)
                .with_storage(StorageConfig::local("vault").encrypted("correct horse")),
        )
        .await
        .unwrap();
    let record = backup(&f, &config.id).await;
    assert!(record.metadata.encrypted);
    assert!(record.storage_location.starts_with("vault/"));

    let restored = restore(&f, RestoreOptions::new(&record.id)).await;
    assert_eq!(restored.status, RestoreStatus::Completed);
    assert_eq!(restored.restored_items, 1);
}

#[tokio::test]
async fn test_notifications_follow_outcome() {
    let f = fixture();
    let notifications = NotificationConfig {
        on_success: true,
        on_failure: false,
        channels: vec![
            NotificationChannel::new(ChannelKind::Email, "ops@example.com"),
            NotificationChannel::new(ChannelKind::Webhook, "https://hooks.example.com/backup"),
        ],
    };
    let config = f
        .service
        .create_config(
            BackupConfig::new("all", BackupType::Full, BackupScope::All)
                .with_notifications(notifications),
        )
        .await
        .unwrap();
    let record = backup(&f, &config.id).await;

    for _ in 0..10 {
        if f.dispatcher.sent().len() == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    let sent = f.dispatcher.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .all(|n| n.event == NotificationEvent::BackupSucceeded && n.backup_id == record.id));
}

#[tokio::test]
async fn test_running_restore_blocks_deletion() {
    let f = fixture();
    let config = f
        .service
        .create_config(BackupConfig::new("all", BackupType::Full, BackupScope::All))
        .await
        .unwrap();
    let record = backup(&f, &config.id).await;

    let restore_id = f
        .service
        .execute_restore(RestoreOptions::new(&record.id))
        .await
        .unwrap();
    assert!(matches!(
        f.service.delete_backup(&record.id).await,
        Err(BackupError::BackupInUse(_))
    ));

    f.service.wait_for_restore(&restore_id).await.unwrap();
    f.service.delete_backup(&record.id).await.unwrap();
    assert!(f.storage.is_empty());
    assert!(matches!(
        f.service.execute_restore(RestoreOptions::new(&record.id)).await,
        Err(BackupError::NotRestorable { .. })
    ));
    assert_eq!(f.service.list_restores(Some(record.id.as_str())).len(), 1);
}

#[tokio::test]
async fn test_stale_running_backup_is_swept() {
    let f = fixture();
    let config = f
        .service
        .create_config(BackupConfig::new("all", BackupType::Full, BackupScope::All))
        .await
        .unwrap();
    let id = f
        .service
        .execute_backup(&config.id, ExecuteOptions::default())
        .await
        .unwrap();

    let resolved = f.service.sweep_stale_backups(Duration::ZERO).await;
    assert_eq!(resolved, vec![id.clone()]);

    let record = f.service.wait_for_backup(&id).await.unwrap();
    assert_eq!(record.status, BackupStatus::Failed);
    assert_eq!(record.error.unwrap().code, ErrorCode::StaleExecution);

    // The detached run may still store its artifact; it discards it on finishing.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !f.storage.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("swept artifact should be discarded");
    assert_eq!(
        f.service.get_backup(&id).unwrap().status,
        BackupStatus::Failed
    );

    backup(&f, &config.id).await;
}
