//! Success/failure notifications
//!
//! Delivery is fire-and-forget: [`dispatch`] spawns one task per channel and
//! returns immediately, so a slow or failing channel never delays or fails
//! the backup that triggered it.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backup::BackupRecord;
use crate::config::{NotificationChannel, NotificationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    BackupSucceeded,
    BackupFailed,
}

/// Delivers events to a configured channel
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(
        &self,
        channel: &NotificationChannel,
        event: NotificationEvent,
        record: &BackupRecord,
    ) -> anyhow::Result<()>;
}

/// Logs every notification through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn notify(
        &self,
        channel: &NotificationChannel,
        event: NotificationEvent,
        record: &BackupRecord,
    ) -> anyhow::Result<()> {
        info!(
            channel = ?channel.kind,
            target = %channel.target,
            event = ?event,
            backup_id = %record.id,
            config_id = %record.config_id,
            status = record.status.as_str(),
            "Backup notification"
        );
        Ok(())
    }
}

/// A delivered notification, as seen by [`RecordingDispatcher`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub channel: NotificationChannel,
    pub event: NotificationEvent,
    pub backup_id: String,
}

/// Keeps every notification in memory
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<SentNotification>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify(
        &self,
        channel: &NotificationChannel,
        event: NotificationEvent,
        record: &BackupRecord,
    ) -> anyhow::Result<()> {
        self.sent.lock().push(SentNotification {
            channel: channel.clone(),
            event,
            backup_id: record.id.clone(),
        });
        Ok(())
    }
}

/// Send `event` to every channel of `config` if that event is enabled
pub fn dispatch(
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: &NotificationConfig,
    event: NotificationEvent,
    record: &BackupRecord,
) {
    let enabled = match event {
        NotificationEvent::BackupSucceeded => config.on_success,
        NotificationEvent::BackupFailed => config.on_failure,
    };
    if !enabled {
        return;
    }

    for channel in config.channels.iter().cloned() {
        let dispatcher = Arc::clone(&dispatcher);
        let record = record.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.notify(&channel, event, &record).await {
                warn!(
                    channel = ?channel.kind,
                    backup_id = %record.id,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        });
    }
}
