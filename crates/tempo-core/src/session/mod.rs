//! Session domain module.
//!
//! This module contains the replicated session model, the pure
//! reconciliation and staleness rules, and the collaborator traits the
//! engine is wired against.
//!
//! # Module Structure
//!
//! - `model`: `SessionRecord`, `CompletedEntry`, run states
//! - `reconciler`: last-write-wins conflict resolution
//! - `staleness`: eviction policy for abandoned durable records
//! - `event`: change-feed, same-device and engine events
//! - `repository`: store and identity contracts
//!
//! # Usage
//!
//! ```ignore
//! use tempo_core::session::{reconcile, SessionRecord, StalenessPolicy};
//! use tempo_core::session::{DurableSessionStore, LocalSessionStore};
//! ```

mod event;
mod model;
mod reconciler;
mod repository;
mod staleness;

// Re-export public API
pub use event::{ChangeEvent, ChangeOrigin, EngineEvent, LocalChange, SyncStatus};
pub use model::{CompletedEntry, RunState, SessionRecord, SessionState, next_update_stamp};
pub use reconciler::{Reconciliation, reconcile};
pub use repository::{
    ChangeFeedSubscription, DurableSessionStore, FeedMessage, IdentityProvider, LocalSessionStore,
    TimeEntryRepository,
};
pub use staleness::{DEFAULT_STALE_AFTER_HOURS, StalenessPolicy};
