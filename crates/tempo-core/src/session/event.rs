use serde::{Deserialize, Serialize};

use super::model::{SessionRecord, SessionState};

/// Change-feed event emitted by the durable store for one owner's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert {
        record: SessionRecord,
    },
    Update {
        record: SessionRecord,
    },
    /// The owner's record was removed. `session_id` names the removed session.
    Delete {
        owner_id: String,
        session_id: String,
    },
}

impl ChangeEvent {
    pub fn owner_id(&self) -> &str {
        match self {
            ChangeEvent::Insert { record } | ChangeEvent::Update { record } => &record.owner_id,
            ChangeEvent::Delete { owner_id, .. } => owner_id,
        }
    }
}

/// Same-device notification published by the fast local store on every write.
///
/// `origin` names the execution context that performed the write so that
/// the writer can ignore its own notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChange {
    pub origin: String,
    pub old: Option<SessionRecord>,
    pub new: Option<SessionRecord>,
}

/// Where a state transition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// A mutation performed by this context.
    Local,
    /// A change-feed event from another device or context.
    Remote,
    /// A write by a sibling context on the same device.
    SameDevice,
}

/// Health of durable propagation as seen by one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum SyncStatus {
    /// No identity; durable sync is skipped.
    LocalOnly,
    /// Nothing written yet in this context.
    Idle,
    /// A durable write is queued or in flight.
    Pending,
    Synced,
    /// The last durable write failed.
    Failed(String),
}

/// Events published by the session engine to its observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Periodic elapsed-time update while running.
    Tick { elapsed_secs: i64 },
    StateChanged {
        state: SessionState,
        origin: ChangeOrigin,
    },
    /// User-visible notice that another context changed the session.
    ExternalChange { state: SessionState },
    SyncFailed { operation: String, message: String },
    SyncRestored,
}
