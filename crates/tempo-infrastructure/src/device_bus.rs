//! Same-device pub/sub for local store writes.
//!
//! Every execution context on one device holds a clone of the same
//! [`DeviceBus`]; a write by any of them is delivered to all subscribers.

use tempo_core::session::LocalChange;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct DeviceBus {
    sender: broadcast::Sender<LocalChange>,
}

impl DeviceBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a change. Having no subscribers is not an error.
    pub fn publish(&self, change: LocalChange) {
        let receivers = self.sender.send(change).unwrap_or(0);
        tracing::trace!(receivers, "published local change");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocalChange> {
        self.sender.subscribe()
    }
}

impl Default for DeviceBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_subscribers_receive() {
        let bus = DeviceBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.clone().subscribe();

        bus.publish(LocalChange {
            origin: "tab-a".to_string(),
            old: None,
            new: None,
        });

        assert_eq!(first.recv().await.unwrap().origin, "tab-a");
        assert_eq!(second.recv().await.unwrap().origin, "tab-a");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = DeviceBus::new(0);
        bus.publish(LocalChange {
            origin: "tab-a".to_string(),
            old: None,
            new: None,
        });
    }
}
