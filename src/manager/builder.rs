//! Builder for [`BackupService`]

use std::sync::Arc;

use super::BackupService;
use crate::catalog::Catalog;
use crate::collector::SnapshotCollector;
use crate::notify::{NotificationDispatcher, TracingDispatcher};
use crate::restore::{RestoreTarget, DEFAULT_TARGET};
use crate::settings::EngineSettings;
use crate::storage::StorageBackend;
use crate::Result;

/// Wires the external collaborators into a [`BackupService`]
pub struct BackupServiceBuilder {
    storage: Arc<dyn StorageBackend>,
    collector: Arc<dyn SnapshotCollector>,
    targets: Vec<(String, Arc<dyn RestoreTarget>)>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    catalog: Option<Arc<Catalog>>,
    settings: EngineSettings,
}

impl BackupServiceBuilder {
    /// `target` becomes the restore destination named `"default"`
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        collector: Arc<dyn SnapshotCollector>,
        target: Arc<dyn RestoreTarget>,
    ) -> Self {
        Self {
            storage,
            collector,
            targets: vec![(DEFAULT_TARGET.to_string(), target)],
            dispatcher: Arc::new(TracingDispatcher),
            catalog: None,
            settings: EngineSettings::default(),
        }
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Start from an existing catalog instead of an empty one
    pub fn catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Add another named restore destination
    pub fn target(mut self, name: impl Into<String>, target: Arc<dyn RestoreTarget>) -> Self {
        self.targets.push((name.into(), target));
        self
    }

    pub fn build(self) -> Arc<BackupService> {
        let catalog = self.catalog.unwrap_or_else(|| Arc::new(Catalog::new()));
        let service = BackupService::assemble(
            catalog,
            self.storage,
            self.collector,
            self.dispatcher,
            Arc::new(self.settings),
        );
        for (name, target) in self.targets {
            service.register_target(name, target);
        }
        service
    }

    /// Build, loading the catalog from `settings.catalog_path` when set.
    ///
    /// An explicitly supplied catalog takes precedence.
    pub async fn open(mut self) -> Result<Arc<BackupService>> {
        if self.catalog.is_none() {
            if let Some(path) = self.settings.catalog_path.clone() {
                self.catalog = Some(Arc::new(Catalog::load(&path).await?));
            }
        }
        Ok(self.build())
    }
}
