//! Listeners feeding external changes into the engine.
//!
//! Both listeners funnel into [`EngineInner::apply_incoming`] and
//! [`EngineInner::apply_removal`], so a change arriving over the network and
//! a change written by a sibling tab on the same device go through identical
//! reconciliation.

use std::sync::Arc;

use tempo_core::session::{
    ChangeEvent, ChangeFeedSubscription, ChangeOrigin, FeedMessage, LocalChange,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::engine::EngineInner;

pub(crate) fn spawn_change_feed_listener(
    inner: Arc<EngineInner>,
    mut feed: ChangeFeedSubscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let owner_id = feed.owner_id().to_string();
        tracing::debug!(%owner_id, "[ChangeFeed] listening");
        while let Some(message) = feed.recv().await {
            match message {
                FeedMessage::Change(ChangeEvent::Insert { record })
                | FeedMessage::Change(ChangeEvent::Update { record }) => {
                    inner.apply_incoming(record, ChangeOrigin::Remote).await;
                }
                FeedMessage::Change(ChangeEvent::Delete { session_id, .. }) => {
                    inner
                        .apply_removal(Some(session_id), ChangeOrigin::Remote)
                        .await;
                }
                FeedMessage::Lagged { .. } => inner.resync_durable(&owner_id).await,
            }
        }
        tracing::debug!("[ChangeFeed] feed closed");
    })
}

pub(crate) fn spawn_same_device_listener(
    inner: Arc<EngineInner>,
    mut changes: broadcast::Receiver<LocalChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if change.origin == inner.context_id() {
                        continue;
                    }
                    tracing::debug!(origin = %change.origin, "[SameDevice] local store changed");
                    match change.new {
                        Some(record) => {
                            inner.apply_incoming(record, ChangeOrigin::SameDevice).await
                        }
                        None => {
                            let removed = change.old.map(|record| record.id);
                            inner.apply_removal(removed, ChangeOrigin::SameDevice).await
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed notifications; the store itself holds the latest value.
                    tracing::warn!(skipped, "[SameDevice] listener lagged, re-reading store");
                    match inner.read_local() {
                        Ok(Some(record)) => {
                            inner.apply_incoming(record, ChangeOrigin::SameDevice).await
                        }
                        Ok(None) => inner.apply_removal(None, ChangeOrigin::SameDevice).await,
                        Err(err) => tracing::warn!(error = %err, "[SameDevice] re-read failed"),
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
