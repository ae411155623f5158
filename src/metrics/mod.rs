//! Prometheus metrics for backup and restore execution

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Finished backup executions by terminal status
    static ref BACKUPS: IntCounterVec = register_int_counter_vec!(
        "statevault_backups_total",
        "Total number of finished backup executions",
        &["status"]
    ).unwrap();

    static ref BACKUP_DURATION: HistogramVec = register_histogram_vec!(
        "statevault_backup_duration_seconds",
        "Backup execution duration in seconds",
        &["status"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    ).unwrap();

    static ref ARTIFACT_BYTES: HistogramVec = register_histogram_vec!(
        "statevault_artifact_bytes",
        "Stored artifact size in bytes",
        &["compressed"],
        prometheus::exponential_buckets(1024.0, 4.0, 10).unwrap()
    ).unwrap();

    static ref ACTIVE_BACKUPS: IntGauge = register_int_gauge!(
        "statevault_active_backups",
        "Number of currently running backup executions"
    ).unwrap();

    /// Finished restores by terminal status
    static ref RESTORES: IntCounterVec = register_int_counter_vec!(
        "statevault_restores_total",
        "Total number of finished restore executions",
        &["status", "dry_run"]
    ).unwrap();

    static ref RETENTION_DELETED: IntCounter = register_int_counter!(
        "statevault_retention_deleted_total",
        "Backups deleted by retention cleanup"
    ).unwrap();
}

pub fn record_backup_start() {
    ACTIVE_BACKUPS.inc();
}

pub fn record_backup_end(status: &str, duration_secs: f64) {
    ACTIVE_BACKUPS.dec();
    BACKUPS.with_label_values(&[status]).inc();
    BACKUP_DURATION.with_label_values(&[status]).observe(duration_secs);
}

/// Backup executions currently running in this process
pub fn active_backups() -> i64 {
    ACTIVE_BACKUPS.get()
}

/// Count a record resolved without a live execution in this process
pub fn record_backup_resolved(status: &str) {
    BACKUPS.with_label_values(&[status]).inc();
}

pub fn record_artifact_size(bytes: u64, compressed: bool) {
    let label = if compressed { "true" } else { "false" };
    ARTIFACT_BYTES.with_label_values(&[label]).observe(bytes as f64);
}

pub fn record_restore_end(status: &str, dry_run: bool) {
    let dry_run = if dry_run { "true" } else { "false" };
    RESTORES.with_label_values(&[status, dry_run]).inc();
}

pub fn record_retention_deletions(count: usize) {
    RETENTION_DELETED.inc_by(count as u64);
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_export() {
        record_backup_start();
        record_backup_end("completed", 0.2);
        record_restore_end("completed", true);
        record_retention_deletions(2);
        record_backup_resolved("failed");

        let text = gather_text();
        assert!(text.contains("statevault_backups_total"));
        assert!(text.contains("statevault_restores_total"));
        assert!(text.contains("statevault_retention_deleted_total"));
    }
}
