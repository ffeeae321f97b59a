//! File-backed fast local store.
//!
//! The active session lives in a single TOML file that survives restarts.
//! Contexts in one process open the same file and share one [`DeviceBus`],
//! which carries the same-device change notifications. Contexts in other
//! processes are noticed by polling the file, see
//! [`FileLocalStore::spawn_watcher`].

use crate::device_bus::DeviceBus;
use crate::storage::AtomicTomlFile;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempo_core::error::Result;
use tempo_core::session::{LocalChange, LocalSessionStore, SessionRecord};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Origin of changes written to the file by another process.
pub const EXTERNAL_ORIGIN: &str = "file-watch";

/// A context's handle on the device-wide active session file.
#[derive(Debug, Clone)]
pub struct FileLocalStore {
    context_id: String,
    file: AtomicTomlFile<SessionRecord>,
    bus: DeviceBus,
    /// File content as last written or polled by this process.
    observed: Arc<Mutex<Option<SessionRecord>>>,
}

impl FileLocalStore {
    /// Opens the store at `path` for the context `context_id`.
    pub fn open(path: PathBuf, bus: DeviceBus, context_id: impl Into<String>) -> Self {
        let file = AtomicTomlFile::new(path);
        let current = file.load().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "active session file unreadable");
            None
        });
        Self {
            context_id: context_id.into(),
            file,
            bus,
            observed: Arc::new(Mutex::new(current)),
        }
    }

    /// Opens another context's handle on the same file and bus.
    pub fn sibling(&self, context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            file: self.file.clone(),
            bus: self.bus.clone(),
            observed: Arc::clone(&self.observed),
        }
    }

    /// Re-reads the file and announces content written by another process.
    ///
    /// Returns whether a change was published.
    pub fn poll_changes(&self) -> Result<bool> {
        let mut observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.file.load()?;
        if *observed == current {
            return Ok(false);
        }
        let old = std::mem::replace(&mut *observed, current.clone());
        drop(observed);

        tracing::debug!(cleared = current.is_none(), "active session file changed externally");
        self.bus.publish(LocalChange {
            origin: EXTERNAL_ORIGIN.to_string(),
            old,
            new: current,
        });
        Ok(true)
    }

    /// Polls the file every `period` until the handle is aborted.
    pub fn spawn_watcher(&self, period: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                if let Err(err) = store.poll_changes() {
                    tracing::warn!(error = %err, "active session file poll failed");
                }
            }
        })
    }
}

impl LocalSessionStore for FileLocalStore {
    fn context_id(&self) -> &str {
        &self.context_id
    }

    fn get(&self) -> Result<Option<SessionRecord>> {
        Ok(self.file.load()?)
    }

    fn set(&self, record: Option<&SessionRecord>) -> Result<()> {
        let mut observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
        let old = self.file.update(|_| record.cloned())?;
        *observed = record.cloned();
        drop(observed);

        if old.as_ref() == record {
            return Ok(());
        }

        tracing::debug!(
            context_id = %self.context_id,
            cleared = record.is_none(),
            "local session store written"
        );
        self.bus.publish(LocalChange {
            origin: self.context_id.clone(),
            old,
            new: record.cloned(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<LocalChange> {
        self.bus.subscribe()
    }
}
