//! Versioned values
//!
//! A [`VersionedValue`] pairs a piece of replicated state with a version that
//! grows by one on every local update. Synchronization asks the cluster which
//! version every node can agree on and commits the matching value. Versions
//! newer than the committed one are kept in a bounded history until the
//! cluster catches up with them.
//!
//! A round that changes the value takes two collective calls: the version
//! check, then a confirmation that every node found the agreed version in
//! its history. The value commits only if all of them did, so a node whose
//! history was pruned holds the whole cluster back for that frame instead of
//! falling out of step with it. Committed versions are equal on every node,
//! so all nodes agree on whether a round needs the confirmation at all.

use crate::channel::WallChannel;
use crate::error::{SyncError, SyncResult};
use core::fmt;
use std::collections::VecDeque;

/// Default number of not-yet-committed versions kept per value
pub const DEFAULT_MAX_PENDING: usize = 64;

/// Name of a synchronized value, identical on every node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncKey(&'static str);

impl SyncKey {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Callback invoked with every newly committed value
pub type CommitCallback<T> = Box<dyn FnMut(&T) + Send>;

/// A value replicated across the cluster
pub struct VersionedValue<T> {
    key: SyncKey,
    /// Last committed value, what renderers see
    committed: T,
    committed_version: u64,
    /// Local versions newer than `committed_version`, ascending
    pending: VecDeque<(u64, T)>,
    /// Latest local version
    version: u64,
    max_pending: usize,
    /// Set by a commit, cleared by `take_committed`
    changed: bool,
    callback: Option<CommitCallback<T>>,
}

impl<T> VersionedValue<T> {
    /// Create a value at version 0
    pub fn new(key: SyncKey, initial: T) -> Self {
        Self {
            key,
            committed: initial,
            committed_version: 0,
            pending: VecDeque::new(),
            version: 0,
            max_pending: DEFAULT_MAX_PENDING,
            changed: false,
            callback: None,
        }
    }

    /// Limit the number of uncommitted versions kept around
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// Register the callback invoked on every commit
    pub fn set_callback(&mut self, callback: impl FnMut(&T) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    pub fn key(&self) -> SyncKey {
        self.key
    }

    /// Latest local version
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version of the value returned by [`get`](Self::get)
    pub fn committed_version(&self) -> u64 {
        self.committed_version
    }

    /// Last committed value
    pub fn get(&self) -> &T {
        &self.committed
    }

    /// True if local updates are waiting for the cluster
    pub fn is_dirty(&self) -> bool {
        self.version != self.committed_version
    }

    /// Replace the value locally and bump the version
    ///
    /// The new value becomes visible through [`get`](Self::get) only once
    /// the cluster has agreed on it.
    pub fn update(&mut self, value: T) -> u64 {
        self.version += 1;
        self.pending.push_back((self.version, value));
        if self.pending.len() > self.max_pending {
            if let Some((dropped, _)) = self.pending.pop_front() {
                log::debug!("'{}': dropped uncommitted version {}", self.key, dropped);
            }
        }
        self.version
    }

    /// Synchronize with the cluster
    ///
    /// `check_version` is the collective version check: it receives the
    /// local version and returns the version the cluster agreed on.
    /// `confirm` is the collective confirmation: it receives whether this
    /// node can resolve the agreed version and returns whether every node
    /// can. Each is called at most once; `confirm` is skipped when the agreed
    /// version is already committed. Returns `Ok(true)` if a new value was
    /// committed.
    pub fn synchronize<F, C>(&mut self, check_version: F, confirm: C) -> SyncResult<bool>
    where
        F: FnOnce(u64) -> SyncResult<u64>,
        C: FnOnce(bool) -> SyncResult<bool>,
    {
        let agreed = check_version(self.version)?;
        self.finish_round(agreed, confirm)
    }

    fn finish_round<C>(&mut self, agreed: u64, confirm: C) -> SyncResult<bool>
    where
        C: FnOnce(bool) -> SyncResult<bool>,
    {
        if agreed == self.committed_version {
            return Ok(false);
        }

        let resolved = self.resolve(agreed);
        let everyone = confirm(resolved.is_ok())?;
        let position = resolved?;
        if !everyone {
            return Err(SyncError::PeerAborted {
                key: self.key,
                agreed,
            });
        }

        if let Some((_, value)) = self.pending.drain(..=position).last() {
            self.committed = value;
            self.committed_version = agreed;
            self.changed = true;
            if let Some(callback) = self.callback.as_mut() {
                callback(&self.committed);
            }
        }
        Ok(true)
    }

    /// Position of `agreed` in the pending history
    fn resolve(&self, agreed: u64) -> SyncResult<usize> {
        if agreed < self.committed_version {
            return Err(SyncError::VersionRegression {
                key: self.key,
                agreed,
                committed: self.committed_version,
            });
        }
        self.pending
            .iter()
            .position(|(version, _)| *version == agreed)
            .ok_or(SyncError::UnresolvedVersion {
                key: self.key,
                agreed,
                local: self.version,
            })
    }

    /// The committed value, once per commit
    pub fn take_committed(&mut self) -> Option<&T> {
        if std::mem::take(&mut self.changed) {
            Some(&self.committed)
        } else {
            None
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for VersionedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedValue")
            .field("key", &self.key)
            .field("version", &self.version)
            .field("committed_version", &self.committed_version)
            .field("committed", &self.committed)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Object-safe view of a versioned value, used to iterate a sync group
pub trait SyncSlot {
    fn key(&self) -> SyncKey;

    fn version(&self) -> u64;

    /// [`VersionedValue::synchronize`] over the collectives of `channel`
    fn synchronize_with(&mut self, channel: &mut dyn WallChannel) -> SyncResult<bool>;
}

impl<T> SyncSlot for VersionedValue<T> {
    fn key(&self) -> SyncKey {
        self.key
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn synchronize_with(&mut self, channel: &mut dyn WallChannel) -> SyncResult<bool> {
        let key = self.key;
        let agreed = channel.check_version(key, self.version)?;
        self.finish_round(agreed, |resolved| channel.confirm_commit(key, resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const KEY: SyncKey = SyncKey::new("test");

    #[test]
    fn test_update_increments_version() {
        let mut value = VersionedValue::new(KEY, 0u32);
        assert_eq!(value.update(1), 1);
        assert_eq!(value.update(2), 2);
        assert_eq!(value.version(), 2);
        assert_eq!(*value.get(), 0);
        assert!(value.is_dirty());
    }

    #[test]
    fn test_echo_commits_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut value = VersionedValue::new(KEY, String::from("initial"));
        {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            value.set_callback(move |v: &String| {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().push(v.clone());
            });
        }

        value.update(String::from("updated"));
        assert!(value.synchronize(Ok, Ok).unwrap());
        assert!(!value.synchronize(Ok, Ok).unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![String::from("updated")]);
        assert_eq!(value.get(), "updated");
        assert!(!value.is_dirty());
    }

    #[test]
    fn test_no_update_no_commit() {
        let mut value = VersionedValue::new(KEY, 5u8);
        assert!(!value.synchronize(Ok, Ok).unwrap());
        assert!(value.take_committed().is_none());
    }

    #[test]
    fn test_commits_agreed_minimum_from_history() {
        let mut value = VersionedValue::new(KEY, 0u32);
        value.update(10);
        value.update(20);
        value.update(30);

        // A slower peer only has version 2
        assert!(value.synchronize(|_| Ok(2), Ok).unwrap());
        assert_eq!(*value.get(), 20);
        assert_eq!(value.committed_version(), 2);
        assert!(value.is_dirty());

        assert!(value.synchronize(|_| Ok(3), Ok).unwrap());
        assert_eq!(*value.get(), 30);
    }

    #[test]
    fn test_unresolved_version_leaves_state_untouched() {
        let mut value = VersionedValue::new(KEY, 0u32);
        value.update(1);

        let err = value.synchronize(|_| Ok(7), Ok).unwrap_err();
        assert!(matches!(err, SyncError::UnresolvedVersion { agreed: 7, local: 1, .. }));
        assert!(!err.is_fatal());
        assert_eq!(*value.get(), 0);

        // Retried next frame with a resolvable version
        assert!(value.synchronize(|_| Ok(1), Ok).unwrap());
        assert_eq!(*value.get(), 1);
    }

    #[test]
    fn test_pruned_history_is_unresolvable() {
        let mut value = VersionedValue::new(KEY, 0u32).with_max_pending(2);
        value.update(1);
        value.update(2);
        value.update(3);

        assert!(value.synchronize(|_| Ok(1), Ok).is_err());
        assert!(value.synchronize(|_| Ok(2), Ok).unwrap());
    }

    #[test]
    fn test_peer_failure_aborts_commit() {
        let mut value = VersionedValue::new(KEY, 0u32);
        value.update(1);
        value.update(2);

        // Resolvable here, not on some other node
        let mut asked = None;
        let err = value
            .synchronize(|_| Ok(1), |resolved| {
                asked = Some(resolved);
                Ok(false)
            })
            .unwrap_err();
        assert_eq!(asked, Some(true));
        assert!(matches!(err, SyncError::PeerAborted { agreed: 1, .. }));
        assert!(!err.is_fatal());
        assert_eq!(value.committed_version(), 0);
        assert!(value.take_committed().is_none());

        // History kept for the retry
        assert!(value.synchronize(|_| Ok(1), Ok).unwrap());
        assert_eq!(*value.get(), 1);
    }

    #[test]
    fn test_local_failure_still_confirms() {
        let mut value = VersionedValue::new(KEY, 0u32).with_max_pending(1);
        value.update(1);
        value.update(2);

        let mut asked = None;
        let err = value
            .synchronize(|_| Ok(1), |resolved| {
                asked = Some(resolved);
                Ok(resolved)
            })
            .unwrap_err();
        assert_eq!(asked, Some(false));
        assert!(matches!(err, SyncError::UnresolvedVersion { agreed: 1, .. }));
    }

    #[test]
    fn test_unchanged_round_skips_confirmation() {
        let mut value = VersionedValue::new(KEY, 0u32);
        value.update(1);
        assert!(!value
            .synchronize(|_| Ok(0), |_| panic!("confirmation not expected"))
            .unwrap());
    }

    #[test]
    fn test_version_regression() {
        let mut value = VersionedValue::new(KEY, 0u32);
        value.update(1);
        value.update(2);
        value.synchronize(Ok, Ok).unwrap();

        let err = value.synchronize(|_| Ok(1), Ok).unwrap_err();
        assert!(matches!(err, SyncError::VersionRegression { agreed: 1, committed: 2, .. }));
    }

    #[test]
    fn test_collective_error_propagates() {
        let mut value = VersionedValue::new(KEY, 0u32);
        value.update(1);
        let err = value
            .synchronize(|_| Err(SyncError::Disconnected), Ok)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(*value.get(), 0);
    }

    #[test]
    fn test_take_committed_clears_flag() {
        let mut value = VersionedValue::new(KEY, 0u32);
        value.update(4);
        value.synchronize(Ok, Ok).unwrap();
        assert_eq!(value.take_committed(), Some(&4));
        assert_eq!(value.take_committed(), None);
    }
}
