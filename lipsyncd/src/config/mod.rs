//! Application configuration.
//!
//! Every knob has a sensible default and can be overridden through
//! `LIPSYNCD_*` environment variables; there is no config file.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::{ExecutorConfig, RetryPolicy};
use crate::progress::BroadcasterConfig;

/// Top-level application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub executor: ExecutorConfig,
    pub broadcaster: BroadcasterConfig,
    /// Directory for daily-rolling log files; console-only when unset.
    pub log_dir: Option<PathBuf>,
    /// Wire the simulated adapter set instead of real collaborators.
    pub dry_run: bool,
}

impl AppConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Supported variables:
    /// - `LIPSYNCD_TASK_DEADLINE_SECS`
    /// - `LIPSYNCD_MAX_RETRIES`
    /// - `LIPSYNCD_DETECTION_SLOTS`
    /// - `LIPSYNCD_BACKGROUND_REMOVAL_SLOTS`
    /// - `LIPSYNCD_ACQUIRE_TIMEOUT_SECS`
    /// - `LIPSYNCD_HISTORY_CAPACITY`
    /// - `LIPSYNCD_HEARTBEAT_SECS`
    /// - `LIPSYNCD_RETENTION_SECS`
    /// - `LIPSYNCD_LOG_DIR`
    /// - `LIPSYNCD_DRY_RUN`
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("LIPSYNCD_TASK_DEADLINE_SECS") {
            config.executor.task_deadline = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse::<u32>("LIPSYNCD_MAX_RETRIES") {
            config.executor.retry = RetryPolicy {
                max_retries: retries,
                ..config.executor.retry
            };
        }

        if let Some(slots) = env_parse::<usize>("LIPSYNCD_DETECTION_SLOTS") {
            config.executor.gate.detection_slots = slots;
        }
        if let Some(slots) = env_parse::<usize>("LIPSYNCD_BACKGROUND_REMOVAL_SLOTS") {
            config.executor.gate.background_removal_slots = slots;
        }
        if let Some(secs) = env_parse::<u64>("LIPSYNCD_ACQUIRE_TIMEOUT_SECS") {
            config.executor.gate.acquire_timeout = Duration::from_secs(secs);
        }

        if let Some(capacity) = env_parse::<usize>("LIPSYNCD_HISTORY_CAPACITY") {
            config.broadcaster.history_capacity = capacity;
        }
        if let Some(secs) = env_parse::<u64>("LIPSYNCD_HEARTBEAT_SECS") {
            config.broadcaster.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LIPSYNCD_RETENTION_SECS") {
            config.broadcaster.retention = Duration::from_secs(secs);
        }

        if let Ok(dir) = std::env::var("LIPSYNCD_LOG_DIR")
            && !dir.trim().is_empty()
        {
            config.log_dir = Some(PathBuf::from(dir));
        }
        config.dry_run = env_parse::<bool>("LIPSYNCD_DRY_RUN").unwrap_or(false)
            || std::env::var("LIPSYNCD_DRY_RUN").is_ok_and(|v| v == "1");

        config
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.executor.task_deadline, Duration::from_secs(80));
        assert_eq!(config.executor.gate.detection_slots, 2);
        assert_eq!(config.executor.gate.background_removal_slots, 1);
        assert_eq!(config.broadcaster.retention, Duration::from_secs(3600));
        assert!(!config.dry_run);
    }
}
