pub mod session;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tempo_application::{EngineStores, SessionEngine};
use tokio::task::JoinHandle;
use tempo_core::clock::SystemClock;
use tempo_core::session::IdentityProvider;
use tempo_infrastructure::{
    ConfigService, DeviceBus, DirDurableStore, FileLocalStore, StaticIdentity, TempoPaths,
};

/// A CLI invocation: one execution context wired to on-disk stores.
///
/// Other invocations running at the same time are separate processes, so
/// both stores are polled for their writes.
pub struct App {
    pub engine: SessionEngine,
    pub durable: Arc<DirDurableStore>,
    pub owner_id: Option<String>,
    watchers: Vec<JoinHandle<()>>,
}

impl App {
    pub async fn open(config_dir: Option<PathBuf>, owner: Option<String>) -> Result<Self> {
        let paths = TempoPaths::new(config_dir);
        let config = ConfigService::new(paths.config_file()?)
            .get_config()
            .context("Failed to load config.toml")?;

        let identity = match owner {
            Some(owner_id) => StaticIdentity::signed_in(owner_id),
            None => StaticIdentity::from_env_or_config(&config),
        };
        let owner_id = identity.current_owner_id().ok();
        tracing::debug!(owner_id = ?owner_id, "resolved identity");

        let local = FileLocalStore::open(
            paths.local_session_file()?,
            DeviceBus::default(),
            format!("cli-{}", std::process::id()),
        );
        let durable = Arc::new(
            DirDurableStore::new(paths.durable_dir()?)
                .await
                .context("Failed to open durable store")?,
        );
        let watchers = vec![
            local.spawn_watcher(config.watch_interval()),
            durable.spawn_watcher(config.watch_interval()),
        ];

        let stores = EngineStores {
            local: Arc::new(local),
            durable: durable.clone(),
            entries: durable.clone(),
            identity: Arc::new(identity),
        };
        let engine = SessionEngine::new(stores, Arc::new(SystemClock), config);
        engine.activate().await?;

        Ok(Self {
            engine,
            durable,
            owner_id,
            watchers,
        })
    }

    /// Stops polling and waits for queued durable writes before the process exits.
    pub async fn close(&self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
        self.engine.close().await;
    }
}

/// Formats seconds as `H:MM:SS`.
pub fn format_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "0:00:00");
        assert_eq!(format_elapsed(170), "0:02:50");
        assert_eq!(format_elapsed(3_725), "1:02:05");
        assert_eq!(format_elapsed(-4), "0:00:00");
    }
}
