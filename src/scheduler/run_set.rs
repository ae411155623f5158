// Per-configuration run slots

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::{BackupError, Result};

/// Backup executions currently in flight, keyed by configuration id.
///
/// Without `force` a configuration holds at most one slot. Claiming happens
/// under the configuration's map entry, so two concurrent triggers cannot
/// both succeed.
#[derive(Debug, Default)]
pub struct RunSet {
    running: DashMap<String, HashSet<String>>,
}

/// Held by a running execution; frees its slot on drop
#[derive(Debug)]
pub struct RunSlot {
    run_set: Arc<RunSet>,
    config_id: String,
    record_id: String,
}

impl RunSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(self: &Arc<Self>, config_id: &str, record_id: &str, force: bool) -> Result<RunSlot> {
        match self.running.entry(config_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if !force && !entry.get().is_empty() {
                    return Err(BackupError::BackupAlreadyRunning(config_id.to_string()));
                }
                entry.get_mut().insert(record_id.to_string());
            }
            Entry::Vacant(entry) => {
                entry.insert(HashSet::from([record_id.to_string()]));
            }
        }
        Ok(RunSlot {
            run_set: Arc::clone(self),
            config_id: config_id.to_string(),
            record_id: record_id.to_string(),
        })
    }

    /// Run `f` while no execution of `config_id` is in flight.
    ///
    /// The configuration's entry stays locked while `f` runs, so no claim can
    /// slip in between the check and `f`. Fails with `ConfigBusy` otherwise.
    pub fn when_idle<T>(&self, config_id: &str, f: impl FnOnce() -> T) -> Result<T> {
        let entry = self.running.entry(config_id.to_string());
        if let Entry::Occupied(occupied) = &entry {
            if !occupied.get().is_empty() {
                return Err(BackupError::ConfigBusy(config_id.to_string()));
            }
        }
        let out = f();
        drop(entry);
        Ok(out)
    }

    /// Free a slot regardless of who holds it. Releasing twice is harmless.
    pub fn release(&self, config_id: &str, record_id: &str) {
        if let Entry::Occupied(mut entry) = self.running.entry(config_id.to_string()) {
            entry.get_mut().remove(record_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    pub fn is_running(&self, config_id: &str) -> bool {
        self.running
            .get(config_id)
            .map(|records| !records.is_empty())
            .unwrap_or(false)
    }

    pub fn running_count(&self, config_id: &str) -> usize {
        self.running.get(config_id).map(|records| records.len()).unwrap_or(0)
    }
}

impl RunSlot {
    pub fn record_id(&self) -> &str {
        &self.record_id
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.run_set.release(&self.config_id, &self.record_id);
    }
}
