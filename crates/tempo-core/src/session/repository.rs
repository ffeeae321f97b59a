//! Collaborator contracts consumed by the session engine.
//!
//! These traits decouple the state machine from the concrete storage
//! mechanism (TOML files, in-memory maps, a remote API).

use super::event::{ChangeEvent, LocalChange};
use super::model::{CompletedEntry, SessionRecord};
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Synchronous, single-device persistence for the active session.
///
/// Every write is announced on the same-device channel returned by
/// [`LocalSessionStore::subscribe`], including to the writer itself; the
/// `origin` field of [`LocalChange`] identifies the writer.
pub trait LocalSessionStore: Send + Sync {
    /// Identifier of the execution context this handle belongs to.
    fn context_id(&self) -> &str;

    /// Reads the active session, if any.
    fn get(&self) -> Result<Option<SessionRecord>>;

    /// Replaces the active session. `None` clears it. Idempotent.
    fn set(&self, record: Option<&SessionRecord>) -> Result<()>;

    /// Subscribes to writes made by any context on this device.
    fn subscribe(&self) -> broadcast::Receiver<LocalChange>;
}

/// Item delivered by [`ChangeFeedSubscription::recv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Change(ChangeEvent),
    /// The subscriber fell behind and `skipped` events were dropped.
    /// The owner's record has to be re-read to catch up.
    Lagged { skipped: u64 },
}

/// Long-lived change-feed subscription for one owner.
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct ChangeFeedSubscription {
    owner_id: String,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl ChangeFeedSubscription {
    pub fn new(owner_id: impl Into<String>, receiver: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            owner_id: owner_id.into(),
            receiver,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the feed is closed. A lagging receiver gets a
    /// single [`FeedMessage::Lagged`] and then resumes at the oldest
    /// retained event.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        match self.receiver.recv().await {
            Ok(event) => Some(FeedMessage::Change(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    owner_id = %self.owner_id,
                    skipped,
                    "change feed subscriber lagged"
                );
                Some(FeedMessage::Lagged { skipped })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// Authoritative, network-accessible store scoped to one identity.
#[async_trait]
pub trait DurableSessionStore: Send + Sync {
    /// Fetches the owner's live record.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))`: a live record exists
    /// - `Ok(None)`: the owner is idle
    /// - `Err(_)`: the store could not be reached
    async fn fetch_by_owner(&self, owner_id: &str) -> Result<Option<SessionRecord>>;

    /// Inserts or replaces the owner's single live record.
    async fn upsert_by_owner(&self, record: &SessionRecord) -> Result<()>;

    /// Deletes the owner's live record. Deleting a missing record succeeds.
    async fn delete_by_owner(&self, owner_id: &str) -> Result<()>;

    /// Opens a change-feed subscription scoped to `owner_id`.
    async fn subscribe(&self, owner_id: &str) -> Result<ChangeFeedSubscription>;
}

/// Sink for finished intervals, owned by the time-entry subsystem.
#[async_trait]
pub trait TimeEntryRepository: Send + Sync {
    /// Records a completed entry. Must not return `Ok` unless durably stored.
    async fn insert_entry(&self, entry: &CompletedEntry) -> Result<()>;
}

/// Resolves the authenticated identity of the current user.
pub trait IdentityProvider: Send + Sync {
    /// Returns the owner id, or `TempoError::Auth` when nobody is signed in.
    fn current_owner_id(&self) -> Result<String>;
}
