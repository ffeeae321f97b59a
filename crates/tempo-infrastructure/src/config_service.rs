//! Configuration service implementation.
//!
//! Loads the engine configuration from `config.toml` and caches it to avoid
//! repeated file I/O.

use crate::storage::AtomicTomlFile;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tempo_core::config::EngineConfig;
use tempo_core::error::Result;

#[derive(Debug, Clone)]
pub struct ConfigService {
    file: AtomicTomlFile<EngineConfig>,
    /// Cached configuration loaded from file.
    config: Arc<RwLock<Option<EngineConfig>>>,
}

impl ConfigService {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: AtomicTomlFile::new(path),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the configuration, loading from file if not cached.
    ///
    /// A missing file yields defaults. A malformed file is an error so that a
    /// typo does not silently disable sync.
    pub fn get_config(&self) -> Result<EngineConfig> {
        {
            let read_lock = self.config.read().unwrap_or_else(|e| e.into_inner());
            if let Some(ref cached) = *read_lock {
                return Ok(cached.clone());
            }
        }

        let loaded = match self.file.load()? {
            Some(config) => config,
            None => {
                tracing::debug!(path = %self.file.path().display(), "no config file, using defaults");
                EngineConfig::default()
            }
        };

        {
            let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
            *write_lock = Some(loaded.clone());
        }

        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let service = ConfigService::new(dir.path().join("config.toml"));
        assert_eq!(service.get_config().unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_config_is_read_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let service = ConfigService::new(path.clone());
        assert_eq!(service.get_config().unwrap().tick_interval_ms, 1000);

        std::fs::write(&path, "tick_interval_ms = 500\n").unwrap();
        assert_eq!(service.get_config().unwrap().tick_interval_ms, 1000);
        assert_eq!(
            ConfigService::new(path).get_config().unwrap().tick_interval_ms,
            500
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "owner_id = \"alice\"\nstale_after_hours = 12\n").unwrap();

        let config = ConfigService::new(path).get_config().unwrap();
        assert_eq!(config.owner_id.as_deref(), Some("alice"));
        assert_eq!(config.stale_after_hours, 12);
        assert_eq!(config.tick_interval_ms, EngineConfig::default().tick_interval_ms);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tick_interval_ms = \"fast\"\n").unwrap();
        assert!(ConfigService::new(path).get_config().is_err());
    }
}
