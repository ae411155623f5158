// Restore destinations

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Destination key/value store a restore writes into
#[async_trait]
pub trait RestoreTarget: Send + Sync {
    async fn contains(&self, key: &str) -> anyhow::Result<bool>;

    async fn read(&self, key: &str) -> anyhow::Result<Option<Value>>;

    async fn write(&self, key: &str, value: Value) -> anyhow::Result<()>;
}

/// In-memory destination
#[derive(Clone, Default)]
pub struct MemoryTarget {
    entries: Arc<DashMap<String, Value>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let target = Self::new();
        for (key, value) in entries {
            target.entries.insert(key.into(), value);
        }
        target
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ordered copy of the current contents
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl RestoreTarget for MemoryTarget {
    async fn contains(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn read(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}
