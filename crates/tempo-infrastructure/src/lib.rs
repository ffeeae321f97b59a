//! Storage and identity adapters for the Tempo session engine.

pub mod change_feed;
pub mod config_service;
pub mod device_bus;
pub mod dir_durable_store;
pub mod file_local_store;
pub mod identity;
pub mod memory_durable_store;
pub mod paths;
pub mod storage;

pub use crate::config_service::ConfigService;
pub use crate::device_bus::DeviceBus;
pub use crate::dir_durable_store::DirDurableStore;
pub use crate::file_local_store::FileLocalStore;
pub use crate::identity::StaticIdentity;
pub use crate::memory_durable_store::MemoryDurableStore;
pub use crate::paths::TempoPaths;
