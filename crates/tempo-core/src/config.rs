//! Engine configuration model.
//!
//! Loaded from `config.toml` by the infrastructure layer. Every field has a
//! default so an empty or missing file yields a working engine.

use crate::session::{DEFAULT_STALE_AFTER_HOURS, StalenessPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Cadence of elapsed-time ticks while running.
    pub tick_interval_ms: u64,
    /// Age after which a durable record is evicted on load.
    pub stale_after_hours: i64,
    /// Buffer size of the engine event channel.
    pub event_capacity: usize,
    /// Extra attempts for background durable propagation.
    pub sync_retry_attempts: u32,
    /// Initial backoff between attempts, doubled each retry.
    pub sync_retry_backoff_ms: u64,
    /// How often file-backed stores are polled for writes by other processes.
    pub watch_interval_ms: u64,
    /// Static identity for local use. Unset means local-only mode.
    pub owner_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            stale_after_hours: DEFAULT_STALE_AFTER_HOURS,
            event_capacity: 64,
            sync_retry_attempts: 2,
            sync_retry_backoff_ms: 250,
            watch_interval_ms: 500,
            owner_id: None,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.sync_retry_backoff_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms.max(10))
    }

    pub fn staleness_policy(&self) -> StalenessPolicy {
        StalenessPolicy::from_hours(self.stale_after_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("tick_interval_ms = 250\nowner_id = \"u-1\"").unwrap();
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.owner_id.as_deref(), Some("u-1"));
        assert_eq!(config.stale_after_hours, 24);
        assert_eq!(config.sync_retry_attempts, 2);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_zero_tick_interval_is_clamped() {
        let config = EngineConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_watch_interval_has_a_floor() {
        let config: EngineConfig = toml::from_str("watch_interval_ms = 0").unwrap();
        assert_eq!(config.watch_interval(), Duration::from_millis(10));
        assert_eq!(
            EngineConfig::default().watch_interval(),
            Duration::from_millis(500)
        );
    }
}
