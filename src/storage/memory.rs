use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use super::StorageBackend;
use crate::{BackupError, Result};

/// In-memory artifact store
#[derive(Clone, Default)]
pub struct MemoryStorage {
    artifacts: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Apply `f` to the stored bytes in place; returns false if absent
    pub fn tamper<F>(&self, location: &str, f: F) -> bool
    where
        F: FnOnce(&mut Vec<u8>),
    {
        match self.artifacts.get_mut(location) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<String> {
        self.artifacts.insert(key.to_string(), data);
        Ok(key.to_string())
    }

    async fn get(&self, location: &str) -> Result<Vec<u8>> {
        self.artifacts
            .get(location)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackupError::Storage(format!("Artifact {} not found", location)))
    }

    async fn delete(&self, location: &str) -> Result<()> {
        self.artifacts.remove(location);
        Ok(())
    }

    async fn exists(&self, location: &str) -> Result<bool> {
        Ok(self.artifacts.contains_key(location))
    }
}
