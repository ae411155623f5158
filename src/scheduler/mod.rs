//! Per-configuration timers
//!
//! Every enabled configuration owns exactly one tokio task that sleeps until
//! the schedule's next instant, fires the job and recomputes. Registering a
//! configuration again aborts its previous task before the new one starts.

mod calendar;
mod run_set;

pub use calendar::next_run_after;
pub use run_set::{RunSet, RunSlot};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ScheduleConfig;

/// Work run when a configuration's timer fires.
///
/// Implementations handle and log their own errors; nothing propagates back
/// into the timer loop.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    async fn run_scheduled(&self, config_id: &str);
}

struct TimerEntry {
    handle: JoinHandle<()>,
    schedule: ScheduleConfig,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
}

#[derive(Default)]
pub struct Scheduler {
    timers: Mutex<HashMap<String, TimerEntry>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer for `config_id`.
    ///
    /// A disabled schedule removes any existing timer. Returns the first
    /// fire instant. The job is held weakly so timers never keep their owner
    /// alive.
    pub fn register(
        &self,
        config_id: &str,
        schedule: &ScheduleConfig,
        job: Weak<dyn ScheduledJob>,
    ) -> Option<DateTime<Utc>> {
        let first = next_run_after(schedule, Utc::now());
        let mut timers = self.timers.lock();
        if let Some(previous) = timers.remove(config_id) {
            previous.handle.abort();
        }
        let first = first?;

        let next_run = Arc::new(Mutex::new(Some(first)));
        let handle = tokio::spawn(timer_loop(
            config_id.to_string(),
            schedule.clone(),
            job,
            Arc::clone(&next_run),
        ));
        timers.insert(
            config_id.to_string(),
            TimerEntry {
                handle,
                schedule: schedule.clone(),
                next_run,
            },
        );

        info!(config_id = %config_id, next_run = %first, "Backup schedule registered");
        Some(first)
    }

    pub fn unregister(&self, config_id: &str) -> bool {
        match self.timers.lock().remove(config_id) {
            Some(entry) => {
                entry.handle.abort();
                debug!(config_id = %config_id, "Backup schedule removed");
                true
            }
            None => false,
        }
    }

    /// Whether the registered timer for `config_id` uses `schedule`
    pub fn has_schedule(&self, config_id: &str, schedule: &ScheduleConfig) -> bool {
        self.timers
            .lock()
            .get(config_id)
            .map(|entry| &entry.schedule == schedule)
            .unwrap_or(false)
    }

    pub fn next_run_for(&self, config_id: &str) -> Option<DateTime<Utc>> {
        self.timers
            .lock()
            .get(config_id)
            .and_then(|entry| *entry.next_run.lock())
    }

    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every timer
    pub fn shutdown(&self) {
        let mut timers = self.timers.lock();
        for (_, entry) in timers.drain() {
            entry.handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn timer_loop(
    config_id: String,
    schedule: ScheduleConfig,
    job: Weak<dyn ScheduledJob>,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        let reference = match last_fire {
            Some(fired) if fired > now => fired,
            _ => now,
        };
        let Some(next) = next_run_after(&schedule, reference) else {
            break;
        };
        *next_run.lock() = Some(next);

        let wait = (next - reference).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let Some(job) = job.upgrade() else {
            break;
        };
        debug!(config_id = %config_id, "Scheduled backup firing");
        job.run_scheduled(&config_id).await;
        last_fire = Some(next);
    }
    *next_run.lock() = None;
}
