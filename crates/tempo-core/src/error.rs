//! Error types for the Tempo session engine.

use serde::Serialize;
use thiserror::Error;

/// A shared error type for the entire Tempo workspace.
///
/// The first three variants form the sync taxonomy the engine reasons about:
/// - `Auth`: no authenticated identity, durable sync is skipped
/// - `Sync`: a durable read/write/delete failed
/// - `StaleRecord`: a durable record outlived the staleness threshold
///
/// The rest are plumbing errors raised by adapters.
#[derive(Error, Debug, Clone, Serialize)]
pub enum TempoError {
    /// No authenticated identity is available
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Durable store operation failed
    #[error("Sync error during {operation}: {message}")]
    Sync { operation: String, message: String },

    /// A durable record is older than the staleness threshold
    #[error("Stale session record for owner '{owner_id}' (age {age_secs}s)")]
    StaleRecord { owner_id: String, age_secs: i64 },

    /// Operation not allowed in the current state
    #[error("Cannot {operation} while {from}")]
    InvalidTransition {
        from: String,
        operation: &'static str,
    },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", etc.
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TempoError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates an Auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Creates a Sync error for the named durable operation
    pub fn sync(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sync {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is an Auth error
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Check if this is a Sync error
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync { .. })
    }

    /// Check if this is an InvalidTransition error
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for TempoError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

/// A type alias for `Result<T, TempoError>`.
pub type Result<T> = std::result::Result<T, TempoError>;
