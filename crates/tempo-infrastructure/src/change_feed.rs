use std::collections::HashMap;
use tempo_core::session::{ChangeEvent, ChangeFeedSubscription};
use tokio::sync::{RwLock, broadcast};

/// Per-owner broadcast channels backing a durable store's change feed.
pub struct ChangeFeedBroker {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl ChangeFeedBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    async fn sender(&self, owner_id: &str) -> broadcast::Sender<ChangeEvent> {
        if let Some(tx) = self.channels.read().await.get(owner_id) {
            return tx.clone();
        }
        self.channels
            .write()
            .await
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub async fn subscribe(&self, owner_id: &str) -> ChangeFeedSubscription {
        let rx = self.sender(owner_id).await.subscribe();
        ChangeFeedSubscription::new(owner_id, rx)
    }

    /// Delivers `event` to every subscriber of the event's owner.
    pub async fn publish(&self, event: ChangeEvent) {
        let owner_id = event.owner_id().to_string();
        let tx = self.channels.read().await.get(&owner_id).cloned();
        if let Some(tx) = tx {
            let receivers = tx.send(event).unwrap_or(0);
            tracing::trace!(%owner_id, receivers, "published change feed event");
        }
    }

    /// Owners that currently have at least one subscriber.
    pub async fn owners(&self) -> Vec<String> {
        self.channels
            .read()
            .await
            .iter()
            .filter(|(_, tx)| tx.receiver_count() > 0)
            .map(|(owner_id, _)| owner_id.clone())
            .collect()
    }
}

impl Default for ChangeFeedBroker {
    fn default() -> Self {
        Self::new(64)
    }
}
