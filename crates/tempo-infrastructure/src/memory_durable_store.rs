//! In-process durable record store.
//!
//! Shared through an `Arc` by every engine in the process, which makes it a
//! stand-in for a remote store reached by several devices. Connectivity can
//! be toggled to exercise sync failures.

use crate::change_feed::ChangeFeedBroker;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tempo_core::error::{Result, TempoError};
use tempo_core::session::{
    ChangeEvent, ChangeFeedSubscription, CompletedEntry, DurableSessionStore, SessionRecord,
    TimeEntryRepository,
};
use tokio::sync::RwLock;

pub struct MemoryDurableStore {
    records: RwLock<HashMap<String, SessionRecord>>,
    entries: RwLock<HashMap<String, Vec<CompletedEntry>>>,
    feeds: ChangeFeedBroker,
    online: AtomicBool,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::with_feed(ChangeFeedBroker::default())
    }

    /// A store whose change feed retains at most `capacity` undelivered
    /// events per subscriber.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self::with_feed(ChangeFeedBroker::new(capacity))
    }

    fn with_feed(feeds: ChangeFeedBroker) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
            feeds,
            online: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn ensure_online(&self, operation: &str) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(TempoError::sync(operation, "durable store unreachable"))
        }
    }

    /// Completed entries recorded for `owner_id`, oldest first.
    pub async fn entries_for(&self, owner_id: &str) -> Vec<CompletedEntry> {
        self.entries
            .read()
            .await
            .get(owner_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Writes a record without emitting a change event.
    ///
    /// Used to seed state that predates any subscriber, such as a session
    /// left behind on another device.
    pub async fn seed(&self, record: SessionRecord) {
        self.records
            .write()
            .await
            .insert(record.owner_id.clone(), record);
    }
}

impl Default for MemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableSessionStore for MemoryDurableStore {
    async fn fetch_by_owner(&self, owner_id: &str) -> Result<Option<SessionRecord>> {
        self.ensure_online("fetch")?;
        Ok(self.records.read().await.get(owner_id).cloned())
    }

    async fn upsert_by_owner(&self, record: &SessionRecord) -> Result<()> {
        self.ensure_online("upsert")?;
        let previous = self
            .records
            .write()
            .await
            .insert(record.owner_id.clone(), record.clone());

        let event = match previous {
            Some(_) => ChangeEvent::Update {
                record: record.clone(),
            },
            None => ChangeEvent::Insert {
                record: record.clone(),
            },
        };
        self.feeds.publish(event).await;
        Ok(())
    }

    async fn delete_by_owner(&self, owner_id: &str) -> Result<()> {
        self.ensure_online("delete")?;
        let removed = self.records.write().await.remove(owner_id);
        if let Some(removed) = removed {
            self.feeds
                .publish(ChangeEvent::Delete {
                    owner_id: owner_id.to_string(),
                    session_id: removed.id,
                })
                .await;
        }
        Ok(())
    }

    async fn subscribe(&self, owner_id: &str) -> Result<ChangeFeedSubscription> {
        self.ensure_online("subscribe")?;
        Ok(self.feeds.subscribe(owner_id).await)
    }
}

#[async_trait]
impl TimeEntryRepository for MemoryDurableStore {
    async fn insert_entry(&self, entry: &CompletedEntry) -> Result<()> {
        self.ensure_online("insert_entry")?;
        self.entries
            .write()
            .await
            .entry(entry.owner_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }
}
