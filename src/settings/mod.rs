//! Engine-wide settings
//!
//! Per-job behaviour lives on [`BackupConfig`](crate::BackupConfig); these
//! settings describe the process running the engine.

use std::path::PathBuf;
use std::time::Duration;

/// Prefix of every environment variable read by [`EngineSettings::from_env`]
pub const ENV_PREFIX: &str = "STATEVAULT_";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Recorded as `metadata.environment` on every backup
    pub environment: String,
    /// Recorded as `metadata.version`
    pub app_version: String,
    /// Recorded as `metadata.clientInfo`
    pub client_info: String,
    /// When set, the catalog is saved here after every finished execution
    pub catalog_path: Option<PathBuf>,
    /// Running records older than this are resolved to failed
    pub stale_after: Duration,
    pub sweep_interval: Duration,
    /// gzip level, 0-9
    pub compression_level: u32,
    /// Keys whose presence after a restore is checked
    pub critical_keys: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            client_info: format!("statevault/{}", env!("CARGO_PKG_VERSION")),
            catalog_path: None,
            stale_after: Duration::from_secs(6 * 3600),
            sweep_interval: Duration::from_secs(300),
            compression_level: 6,
            critical_keys: vec!["app_settings".to_string(), "user_preferences".to_string()],
        }
    }
}

impl EngineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `STATEVAULT_*` variables.
    ///
    /// Recognised: `ENVIRONMENT`, `CLIENT_INFO`, `CATALOG_PATH`,
    /// `STALE_AFTER_SECS`, `SWEEP_INTERVAL_SECS`, `COMPRESSION_LEVEL`,
    /// `CRITICAL_KEYS` (comma separated). Unparseable numbers are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(environment) = lookup("ENVIRONMENT") {
            settings.environment = environment;
        }
        if let Some(client_info) = lookup("CLIENT_INFO") {
            settings.client_info = client_info;
        }
        if let Some(path) = lookup("CATALOG_PATH").filter(|p| !p.is_empty()) {
            settings.catalog_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = lookup("STALE_AFTER_SECS").and_then(|v| v.parse().ok()) {
            settings.stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = lookup("SWEEP_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            settings.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(level) = lookup("COMPRESSION_LEVEL").and_then(|v| v.parse::<u32>().ok()) {
            settings.compression_level = level.min(9);
        }
        if let Some(keys) = lookup("CRITICAL_KEYS") {
            settings.critical_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }
        settings
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    pub fn stale_after(mut self, threshold: Duration) -> Self {
        self.stale_after = threshold;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    pub fn critical_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.critical_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}
