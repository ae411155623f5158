// Reader/deleter leases on backup records

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseState {
    Readers(usize),
    Deleting,
}

/// Tracks which backups are being read by running restores.
///
/// A backup with readers cannot be deleted, and a backup being deleted
/// cannot gain readers. Both checks happen under the same map entry lock.
#[derive(Debug, Default)]
pub struct BackupLeases {
    leases: DashMap<String, LeaseState>,
}

/// Held by a running restore; released on drop
#[derive(Debug)]
pub struct ReadLease {
    leases: Arc<BackupLeases>,
    backup_id: String,
}

/// Held while a backup's artifact and record are removed; released on drop
#[derive(Debug)]
pub struct DeleteLease {
    leases: Arc<BackupLeases>,
    backup_id: String,
}

impl BackupLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_read(self: &Arc<Self>, backup_id: &str) -> Result<ReadLease> {
        match self.leases.entry(backup_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let state = *entry.get();
                match state {
                    LeaseState::Deleting => {
                        return Err(BackupError::NotRestorable {
                            backup_id: backup_id.to_string(),
                            reason: "backup is being deleted".to_string(),
                        })
                    }
                    LeaseState::Readers(n) => {
                        entry.insert(LeaseState::Readers(n + 1));
                    }
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(LeaseState::Readers(1));
            }
        }
        Ok(ReadLease {
            leases: Arc::clone(self),
            backup_id: backup_id.to_string(),
        })
    }

    pub fn acquire_delete(self: &Arc<Self>, backup_id: &str) -> Result<DeleteLease> {
        match self.leases.entry(backup_id.to_string()) {
            Entry::Occupied(_) => return Err(BackupError::BackupInUse(backup_id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(LeaseState::Deleting);
            }
        }
        Ok(DeleteLease {
            leases: Arc::clone(self),
            backup_id: backup_id.to_string(),
        })
    }

    /// Number of running restores reading `backup_id`
    pub fn readers(&self, backup_id: &str) -> usize {
        match self.leases.get(backup_id).map(|entry| *entry.value()) {
            Some(LeaseState::Readers(n)) => n,
            _ => 0,
        }
    }

    fn release_read(&self, backup_id: &str) {
        if let Entry::Occupied(mut entry) = self.leases.entry(backup_id.to_string()) {
            let state = *entry.get();
            match state {
                LeaseState::Readers(n) if n > 1 => {
                    entry.insert(LeaseState::Readers(n - 1));
                }
                LeaseState::Readers(_) => {
                    entry.remove();
                }
                LeaseState::Deleting => {}
            }
        }
    }

    fn release_delete(&self, backup_id: &str) {
        self.leases
            .remove_if(backup_id, |_, state| *state == LeaseState::Deleting);
    }
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        self.leases.release_read(&self.backup_id);
    }
}

impl Drop for DeleteLease {
    fn drop(&mut self) {
        self.leases.release_delete(&self.backup_id);
    }
}
