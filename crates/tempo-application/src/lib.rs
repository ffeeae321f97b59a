pub mod session;

pub use session::{EngineStores, LOCAL_OWNER_ID, SessionEngine, SessionSnapshot};
