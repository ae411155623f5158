//! Restore records, destinations and the restore engine

mod engine;
mod target;
mod types;

pub use engine::RestoreEngine;
pub use target::{MemoryTarget, RestoreTarget};
pub use types::{
    RestoreOptions, RestoreRecord, RestoreStatus, RestoreVerification, DEFAULT_TARGET,
};
