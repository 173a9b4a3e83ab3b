//! # wall_sync
//!
//! Frame-locked replication of shared state across the nodes of a wall.
//!
//! ## Architecture
//!
//! ```text
//! Master ──publish──► WallMessage stream ──► every node applies as local update
//!                                                     │
//!                                                     ▼
//!      per frame: check_version(key) + confirm_commit(key) for each value, in order
//!                                                     │
//!                                                     ▼
//!                      commit agreed version ──► render ──► barrier ──► swap
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Same order everywhere** - every node makes the same collective calls
//!    in the same order; a mismatch is reported as a protocol divergence
//! 2. **Cluster minimum, confirmed** - the agreed version of a value is the
//!    smallest version any node holds; it commits only once every node has
//!    confirmed it still has that version, otherwise no node commits it
//! 3. **One commit per version** - a value changes at most once per agreed
//!    version, and never goes backwards

pub mod channel;
pub mod coordinator;
pub mod error;
pub mod group;
pub mod local;
pub mod message;
pub mod versioned;

pub use channel::{Publisher, WallChannel};
pub use coordinator::{ClusterSyncCoordinator, SyncReport, SyncStats};
pub use error::{SyncError, SyncResult};
pub use group::{SyncGroup, WallSyncGroup};
pub use local::{LocalChannel, LocalCluster, LocalPublisher, DEFAULT_COLLECTIVE_TIMEOUT};
pub use message::{decode_message, encode_message, WallMessage, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
pub use versioned::{SyncKey, SyncSlot, VersionedValue, DEFAULT_MAX_PENDING};
