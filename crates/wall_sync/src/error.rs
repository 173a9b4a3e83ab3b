//! Synchronization error types

use crate::versioned::SyncKey;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the cluster synchronization protocol
#[derive(Debug, Error)]
pub enum SyncError {
    /// Nodes entered different collective calls
    #[error("Protocol divergence: expected {expected}, found {found}")]
    ProtocolDivergence { expected: String, found: String },

    /// The cluster agreed on a version this node holds no value for
    #[error("Cannot resolve agreed version {agreed} of '{key}' (local version {local})")]
    UnresolvedVersion { key: SyncKey, agreed: u64, local: u64 },

    /// This node resolved the agreed version but another node did not
    #[error("Commit of version {agreed} of '{key}' aborted by another node")]
    PeerAborted { key: SyncKey, agreed: u64 },

    /// The cluster agreed on a version older than the one already applied
    #[error("Agreed version {agreed} of '{key}' is older than committed version {committed}")]
    VersionRegression { key: SyncKey, agreed: u64, committed: u64 },

    #[error("Collective call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cluster channel disconnected")]
    Disconnected,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },
}

impl SyncError {
    /// Fatal errors stop the frame loop; the others only abort the round
    /// for one value, which is retried on the next frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SyncError::UnresolvedVersion { .. }
                | SyncError::PeerAborted { .. }
                | SyncError::VersionRegression { .. }
        )
    }
}

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;
