//! Domain layer for Tempo.
//!
//! Holds the replicated session model, the pure reconciliation rules and
//! the contracts the session engine consumes. Nothing in this crate performs
//! I/O.

pub mod clock;
pub mod config;
pub mod error;
pub mod session;

// Re-export common error type
pub use error::{Result, TempoError};
