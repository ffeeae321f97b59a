//! Directory-backed durable record store.
//!
//! Lets a session outlive the process when no remote backend is configured.
//! Writes made through this instance are published right away. Writes made
//! by other processes sharing the root are picked up by polling, see
//! [`DirDurableStore::spawn_watcher`].

use crate::change_feed::ChangeFeedBroker;
use crate::storage::AtomicTomlFile;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempo_core::error::{Result, TempoError};
use tempo_core::session::{
    ChangeEvent, ChangeFeedSubscription, CompletedEntry, DurableSessionStore, SessionRecord,
    TimeEntryRepository,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Directory structure:
/// ```text
/// root/
/// ├── sessions/
/// │   └── <owner>.toml          # the owner's single live record
/// └── entries/
///     └── <owner>/
///         └── <session-id>.toml # completed entries
/// ```
pub struct DirDurableStore {
    root: PathBuf,
    feeds: ChangeFeedBroker,
    /// Last known session file content per watched owner. Held across each
    /// write and each poll so the two never interleave.
    observed: Mutex<HashMap<String, Option<SessionRecord>>>,
}

/// Maps an id onto a file stem, one id per stem.
///
/// Lowercase ASCII letters, digits and `-` are kept. Every other byte is
/// written as `_` plus two hex digits, so distinct ids never share a file
/// even on case-insensitive filesystems.
fn file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            stem.push(byte as char);
        } else {
            let _ = write!(stem, "_{:02x}", byte);
        }
    }
    stem
}

async fn blocking<T, F>(operation: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TempoError::sync(operation, format!("storage task failed: {}", e)))?
}

fn to_sync_error(operation: &'static str) -> impl Fn(TempoError) -> TempoError {
    move |err| match err {
        TempoError::Sync { .. } => err,
        other => TempoError::sync(operation, other.to_string()),
    }
}

impl DirDurableStore {
    /// Creates the store rooted at `root`, creating the directory layout.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join("sessions")).await?;
        tokio::fs::create_dir_all(root.join("entries")).await?;
        Ok(Self {
            root,
            feeds: ChangeFeedBroker::default(),
            observed: Mutex::new(HashMap::new()),
        })
    }

    /// Polls the session files of subscribed owners every `period`.
    ///
    /// The task runs until the handle is aborted.
    pub fn spawn_watcher(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                if let Err(err) = store.poll_changes().await {
                    tracing::warn!(error = %err, "[DirDurableStore] session file poll failed");
                }
            }
        })
    }

    /// Publishes the difference between each subscribed owner's session file
    /// and its last observed content.
    pub async fn poll_changes(&self) -> Result<()> {
        for owner_id in self.feeds.owners().await {
            let mut observed = self.observed.lock().await;
            let file = self.session_file(&owner_id);
            let current = blocking("poll", move || Ok(file.load()?))
                .await
                .map_err(to_sync_error("poll"))?;
            let previous = observed.insert(owner_id.clone(), current.clone()).flatten();

            let event = match (previous, current) {
                (None, Some(record)) => ChangeEvent::Insert { record },
                (Some(previous), Some(record)) if previous != record => {
                    ChangeEvent::Update { record }
                }
                (Some(previous), None) => ChangeEvent::Delete {
                    owner_id,
                    session_id: previous.id,
                },
                _ => continue,
            };
            tracing::debug!(owner_id = %event.owner_id(), "[DirDurableStore] external session change");
            self.feeds.publish(event).await;
        }
        Ok(())
    }

    fn session_file(&self, owner_id: &str) -> AtomicTomlFile<SessionRecord> {
        AtomicTomlFile::new(
            self.root
                .join("sessions")
                .join(format!("{}.toml", file_stem(owner_id))),
        )
    }

    fn entry_file(&self, entry: &CompletedEntry) -> AtomicTomlFile<CompletedEntry> {
        AtomicTomlFile::new(
            self.root
                .join("entries")
                .join(file_stem(&entry.owner_id))
                .join(format!("{}.toml", file_stem(&entry.id))),
        )
    }

    /// Lists completed entries for `owner_id`, ordered by end time.
    pub async fn entries_for(&self, owner_id: &str) -> Result<Vec<CompletedEntry>> {
        let dir = self.root.join("entries").join(file_stem(owner_id));
        blocking("list_entries", move || {
            let mut entries = Vec::new();
            let read_dir = match std::fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
                Err(e) => return Err(e.into()),
            };
            for item in read_dir {
                let path = item?.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(entry) = load::<CompletedEntry>(&path)? {
                        entries.push(entry);
                    }
                }
            }
            entries.sort_by_key(|e| e.ended_at);
            Ok(entries)
        })
        .await
    }
}

fn load<T: Serialize + DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    Ok(AtomicTomlFile::<T>::new(path.to_path_buf()).load()?)
}

#[async_trait]
impl DurableSessionStore for DirDurableStore {
    async fn fetch_by_owner(&self, owner_id: &str) -> Result<Option<SessionRecord>> {
        let file = self.session_file(owner_id);
        blocking("fetch", move || Ok(file.load()?))
            .await
            .map_err(to_sync_error("fetch"))
    }

    async fn upsert_by_owner(&self, record: &SessionRecord) -> Result<()> {
        let mut observed = self.observed.lock().await;
        let file = self.session_file(&record.owner_id);
        let next = record.clone();
        let previous = blocking("upsert", move || Ok(file.update(|_| Some(next))?))
            .await
            .map_err(to_sync_error("upsert"))?;
        observed.insert(record.owner_id.clone(), Some(record.clone()));

        let record = record.clone();
        let event = if previous.is_some() {
            ChangeEvent::Update { record }
        } else {
            ChangeEvent::Insert { record }
        };
        self.feeds.publish(event).await;
        Ok(())
    }

    async fn delete_by_owner(&self, owner_id: &str) -> Result<()> {
        let mut observed = self.observed.lock().await;
        let file = self.session_file(owner_id);
        let previous = blocking("delete", move || Ok(file.update(|_| None)?))
            .await
            .map_err(to_sync_error("delete"))?;
        observed.insert(owner_id.to_string(), None);

        if let Some(previous) = previous {
            self.feeds
                .publish(ChangeEvent::Delete {
                    owner_id: owner_id.to_string(),
                    session_id: previous.id,
                })
                .await;
        }
        Ok(())
    }

    async fn subscribe(&self, owner_id: &str) -> Result<ChangeFeedSubscription> {
        let mut observed = self.observed.lock().await;
        if !observed.contains_key(owner_id) {
            let file = self.session_file(owner_id);
            let current = blocking("subscribe", move || Ok(file.load()?))
                .await
                .map_err(to_sync_error("subscribe"))?;
            observed.insert(owner_id.to_string(), current);
        }
        Ok(self.feeds.subscribe(owner_id).await)
    }
}

#[async_trait]
impl TimeEntryRepository for DirDurableStore {
    async fn insert_entry(&self, entry: &CompletedEntry) -> Result<()> {
        let file = self.entry_file(entry);
        let entry = entry.clone();
        blocking("insert_entry", move || Ok(file.save(&entry)?))
            .await
            .map_err(to_sync_error("insert_entry"))
    }
}
