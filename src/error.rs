use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::engine::ResultCode;

#[derive(Debug, Error)]
pub enum OmadmError {
    #[error("DMT lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Unsupported DM tree version: {0}")]
    UnsupportedTreeVersion(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Engine returned {code} for {path}")]
    Engine { path: String, code: ResultCode },

    #[error("Configuration store not ready after {0:?}")]
    StoreNotReady(Duration),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Session manager stopped")]
    ManagerStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Errors cross the host boundary as plain strings
impl Serialize for OmadmError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OmadmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serializes_as_message() {
        let err = OmadmError::Engine {
            path: "./DMAcc/p1".to_string(),
            code: 1,
        };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Engine returned 1 for ./DMAcc/p1\"");
    }
}
