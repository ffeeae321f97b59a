#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tempo_application::{EngineStores, SessionEngine};
use tempo_core::clock::{Clock, ManualClock};
use tempo_core::config::EngineConfig;
use tempo_core::session::{DurableSessionStore, EngineEvent, SessionRecord, TimeEntryRepository};
use tempo_infrastructure::{DeviceBus, FileLocalStore, MemoryDurableStore, StaticIdentity};
use tokio::sync::broadcast;

pub const OWNER: &str = "alice";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// One device: a temp dir holding the shared local session file.
pub struct Device {
    _dir: TempDir,
    first: FileLocalStore,
}

impl Device {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let first = FileLocalStore::open(
            dir.path().join("active_session.toml"),
            DeviceBus::default(),
            "tab-1",
        );
        Self { _dir: dir, first }
    }

    /// A store handle for another tab on this device.
    pub fn tab(&self, context_id: &str) -> FileLocalStore {
        self.first.sibling(context_id)
    }

    pub fn local(&self) -> FileLocalStore {
        self.first.clone()
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        tick_interval_ms: 20,
        sync_retry_attempts: 0,
        sync_retry_backoff_ms: 1,
        ..Default::default()
    }
}

pub fn engine(
    local: FileLocalStore,
    durable: &Arc<MemoryDurableStore>,
    identity: StaticIdentity,
    clock: &Arc<ManualClock>,
) -> SessionEngine {
    engine_over(local, durable.clone(), durable.clone(), identity, clock)
}

/// An engine over arbitrary durable collaborators.
pub fn engine_over(
    local: FileLocalStore,
    durable: Arc<dyn DurableSessionStore>,
    entries: Arc<dyn TimeEntryRepository>,
    identity: StaticIdentity,
    clock: &Arc<ManualClock>,
) -> SessionEngine {
    let stores = EngineStores {
        local: Arc::new(local),
        durable,
        entries,
        identity: Arc::new(identity),
    };
    SessionEngine::new(stores, clock.clone() as Arc<dyn Clock>, test_config())
}

pub fn signed_in() -> StaticIdentity {
    StaticIdentity::signed_in(OWNER)
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_until<F: FnMut() -> bool>(what: &str, mut condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Polls the durable store until its record for [`OWNER`] satisfies `check`.
pub async fn wait_for_durable<F>(durable: &MemoryDurableStore, what: &str, check: F)
where
    F: Fn(Option<&SessionRecord>) -> bool,
{
    for _ in 0..200 {
        let record = durable.fetch_by_owner(OWNER).await.unwrap();
        if check(record.as_ref()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for durable {what}");
}

/// Receives events until one matches, panicking after two seconds.
pub async fn next_matching<F>(rx: &mut broadcast::Receiver<EngineEvent>, matches: F) -> EngineEvent
where
    F: Fn(&EngineEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    found.expect("no matching engine event")
}

/// Everything currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}
