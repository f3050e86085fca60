//! Error types for the reconciliation engine.
//!
//! Only load failures are user-visible: they surface through the controller's
//! `error_occurred` signal. Everything else the engine recovers from
//! internally — an inconclusive diff falls back to a full replace, a canceled
//! operation's result is silently discarded, and calls on a disposed
//! controller resolve as no-ops.

use serde_json::Value;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur while loading or looking up data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DataError {
    /// The store rejected or threw during a load.
    #[error("load failed: {0}")]
    LoadFailed(String),

    /// No row with the given key exists in the store.
    #[error("no row with key {0}")]
    KeyNotFound(Value),

    /// The operation target has been disposed.
    #[error("data source is disposed")]
    Disposed,
}

impl DataError {
    /// Create a load failure from any displayable error.
    pub fn load(err: impl std::fmt::Display) -> Self {
        Self::LoadFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = DataError::load("connection reset");
        assert_eq!(err.to_string(), "load failed: connection reset");

        let err = DataError::KeyNotFound(serde_json::json!(42));
        assert_eq!(err.to_string(), "no row with key 42");
    }
}
