//! Error types for the bridge.

use crate::types::HandleId;
use std::time::Duration;
use thiserror::Error;

/// Main error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A discoverable remote object never appeared within the polling bound.
    #[error("Retrieval timeout: `{key}` did not appear within {waited:?}")]
    RetrievalTimeout { key: String, waited: Duration },

    /// The remote call itself failed. Terminal for the owning subscription.
    #[error("Boundary invocation failed: {0}")]
    BoundaryInvocation(String),

    /// Per-item enrichment failed during materialization.
    #[error("Transform failed for {item}: {reason}")]
    Transform { item: String, reason: String },

    /// A decoded payload does not match the shape its reason requires.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Already disposed: {0}")]
    AlreadyDisposed(String),

    #[error("Handle not found: {0}")]
    HandleNotFound(HandleId),

    #[error("Handle {handle} is not {expected}")]
    HandleKindMismatch {
        handle: HandleId,
        expected: &'static str,
    },

    #[error("Container already registered: {0}")]
    ContainerExists(String),

    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Replica out of sync: {0}")]
    OutOfSync(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Shorthand for a failed boundary call.
    pub(crate) fn boundary(message: impl Into<String>) -> Self {
        BridgeError::BoundaryInvocation(message.into())
    }

    /// True for the "resource is already gone" faults a teardown swallows.
    pub fn is_already_disposed(&self) -> bool {
        matches!(self, BridgeError::AlreadyDisposed(_))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for BridgeError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BridgeError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BridgeError::ProtocolViolation(e.to_string())
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
