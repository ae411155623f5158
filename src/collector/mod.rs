//! Snapshot collection
//!
//! The engine treats the captured payload as opaque beyond its four-section
//! shape. Applications implement [`SnapshotCollector`] over their own state;
//! [`StaticCollector`] serves a fixed in-memory payload.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

use crate::backup::{BackupData, SectionKind};
use crate::config::{BackupScope, KeyFilter};

/// Produces a snapshot for a scope
#[async_trait]
pub trait SnapshotCollector: Send + Sync {
    async fn collect(
        &self,
        scope: BackupScope,
        filters: Option<&KeyFilter>,
    ) -> anyhow::Result<BackupData>;
}

/// Collector over a mutable in-memory payload.
///
/// Each call returns the payload restricted to the requested scope and
/// custom filters. `Custom` scope spans all four sections and relies on the
/// filters to narrow them.
#[derive(Clone)]
pub struct StaticCollector {
    payload: Arc<RwLock<BackupData>>,
}

impl StaticCollector {
    pub fn new() -> Self {
        Self::from_data(BackupData::new(BackupScope::All))
    }

    pub fn from_data(data: BackupData) -> Self {
        Self {
            payload: Arc::new(RwLock::new(data)),
        }
    }

    /// Insert or replace one key of the served payload
    pub fn set(
        &self,
        section: SectionKind,
        sub_section: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) {
        self.payload.write().insert(section, sub_section, key, value);
    }

    pub fn remove(&self, section: SectionKind, sub_section: &str, key: &str) -> Option<Value> {
        let mut payload = self.payload.write();
        payload
            .section_mut(section)
            .get_mut(sub_section)
            .and_then(|entries| entries.remove(key))
    }

    pub fn snapshot(&self) -> BackupData {
        self.payload.read().clone()
    }
}

impl Default for StaticCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotCollector for StaticCollector {
    async fn collect(
        &self,
        scope: BackupScope,
        filters: Option<&KeyFilter>,
    ) -> anyhow::Result<BackupData> {
        Ok(self.payload.read().restricted(scope, filters))
    }
}
