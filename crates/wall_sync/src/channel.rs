//! Cluster channel abstraction
//!
//! A [`WallChannel`] is one node's handle on the cluster transport. It offers
//! the collective primitives the frame loop is built on and the inbound
//! message stream published by the master. Collective calls block until every
//! node has made the same call; calling them in a different order on
//! different nodes is a protocol error.

use crate::error::SyncResult;
use crate::message::WallMessage;
use crate::versioned::SyncKey;

/// One node's endpoint on the cluster transport
pub trait WallChannel: Send {
    /// Rank of this node, from 0
    fn rank(&self) -> usize;

    /// Number of nodes
    fn size(&self) -> usize;

    /// Rank 0 is the clock reference of the cluster
    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    /// Collective version check
    ///
    /// Returns the minimum version reported by all nodes for `key`.
    fn check_version(&mut self, key: SyncKey, version: u64) -> SyncResult<u64>;

    /// Collective confirmation of a commit
    ///
    /// Returns true only if every node reported `resolved` for `key`.
    fn confirm_commit(&mut self, key: SyncKey, resolved: bool) -> SyncResult<bool>;

    /// Collective barrier
    fn barrier(&mut self) -> SyncResult<()>;

    /// Collective clock synchronization, returns rank 0's time in seconds
    fn synchronize_clock(&mut self, local_time: f64) -> SyncResult<f64>;

    /// Drain messages received since the last call, without blocking
    fn receive_messages(&mut self) -> SyncResult<Vec<WallMessage>>;
}

/// Master side of the message stream
pub trait Publisher: Send + Sync {
    /// Send a message to every node, the master included
    fn publish(&self, message: &WallMessage) -> SyncResult<()>;
}

impl<C: WallChannel + ?Sized> WallChannel for Box<C> {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn check_version(&mut self, key: SyncKey, version: u64) -> SyncResult<u64> {
        (**self).check_version(key, version)
    }

    fn confirm_commit(&mut self, key: SyncKey, resolved: bool) -> SyncResult<bool> {
        (**self).confirm_commit(key, resolved)
    }

    fn barrier(&mut self) -> SyncResult<()> {
        (**self).barrier()
    }

    fn synchronize_clock(&mut self, local_time: f64) -> SyncResult<f64> {
        (**self).synchronize_clock(local_time)
    }

    fn receive_messages(&mut self) -> SyncResult<Vec<WallMessage>> {
        (**self).receive_messages()
    }
}
