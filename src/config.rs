//! Server configuration loaded from `APPOINTD_*` environment variables.
//!
//! Every setting has a default so the server starts with zero configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Env: `APPOINTD_BIND`. Default: `0.0.0.0`
    pub bind: String,
    /// Env: `APPOINTD_PORT`. Default: `7878`
    pub port: u16,
    /// Directory holding the journal. Env: `APPOINTD_DATA_DIR`. Default: `./data`
    pub data_dir: PathBuf,
    /// Shared key every request must carry. Env: `APPOINTD_API_KEY`. Default: `appointd`
    pub api_key: String,
    /// Env: `APPOINTD_MAX_CONNECTIONS`. Default: `256`
    pub max_connections: usize,
    /// Journal appends before compaction. Env: `APPOINTD_COMPACT_THRESHOLD`. Default: `1000`
    pub compact_threshold: u64,
    /// Prometheus exporter port; unset disables it. Env: `APPOINTD_METRICS_PORT`
    pub metrics_port: Option<u16>,
    /// Env: `APPOINTD_RETRY_INTERVAL_SECS`. Default: `60`
    pub retry_interval: Duration,
    /// Env: `APPOINTD_MAX_NOTIFICATION_RETRIES`. Default: `3`
    pub max_notification_retries: u32,
    /// Env: `APPOINTD_REMINDER_INTERVAL_SECS`. Default: `900`
    pub reminder_interval: Duration,
    /// How long exhausted outbox entries are kept.
    /// Env: `APPOINTD_OUTBOX_RETENTION_SECS`. Default: `604800` (7 days)
    pub outbox_retention: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            api_key: "appointd".to_string(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            retry_interval: Duration::from_secs(60),
            max_notification_retries: 3,
            reminder_interval: Duration::from_secs(900),
            outbox_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "invalid value, using default");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(bind) = lookup("APPOINTD_BIND") {
            config.bind = bind;
        }
        if let Some(port) = parsed(&lookup, "APPOINTD_PORT") {
            config.port = port;
        }
        if let Some(dir) = lookup("APPOINTD_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("APPOINTD_API_KEY") {
            if key.is_empty() {
                tracing::warn!("empty APPOINTD_API_KEY, using default");
            } else {
                config.api_key = key;
            }
        }
        if let Some(n) = parsed::<usize>(&lookup, "APPOINTD_MAX_CONNECTIONS") {
            if n == 0 {
                tracing::warn!("APPOINTD_MAX_CONNECTIONS must be positive, using default");
            } else {
                config.max_connections = n;
            }
        }
        if let Some(n) = parsed(&lookup, "APPOINTD_COMPACT_THRESHOLD") {
            config.compact_threshold = n;
        }
        config.metrics_port = parsed(&lookup, "APPOINTD_METRICS_PORT");
        if let Some(secs) = parsed::<u64>(&lookup, "APPOINTD_RETRY_INTERVAL_SECS")
            && secs > 0
        {
            config.retry_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parsed(&lookup, "APPOINTD_MAX_NOTIFICATION_RETRIES") {
            config.max_notification_retries = n;
        }
        if let Some(secs) = parsed::<u64>(&lookup, "APPOINTD_REMINDER_INTERVAL_SECS")
            && secs > 0
        {
            config.reminder_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed(&lookup, "APPOINTD_OUTBOX_RETENTION_SECS") {
            config.outbox_retention = Duration::from_secs(secs);
        }

        config
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("appointd.journal")
    }
}
