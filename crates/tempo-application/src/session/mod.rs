//! Session engine: the per-context state machine and its background tasks.

mod engine;
mod listener;
mod propagator;
mod ticker;

pub use engine::{EngineStores, LOCAL_OWNER_ID, SessionEngine, SessionSnapshot};
