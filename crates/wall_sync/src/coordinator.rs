//! Cluster synchronization coordinator
//!
//! Once per frame the coordinator walks the sync group in its fixed order,
//! running the collective version check of each value (and, when the value
//! changes, the commit confirmation), then hands the committed state to the
//! caller. The final barrier is a separate collective so no node
//! swaps its framebuffer before every node has committed the same state.

use crate::channel::WallChannel;
use crate::error::{SyncError, SyncResult};
use crate::group::SyncGroup;
use crate::message::WallMessage;
use crate::versioned::SyncKey;

/// What happened during one synchronization round
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Values that committed a new version, in group order
    pub committed: Vec<SyncKey>,
    /// Values whose round was aborted; retried next frame
    pub failed: Vec<(SyncKey, SyncError)>,
}

impl SyncReport {
    pub fn has_changes(&self) -> bool {
        !self.committed.is_empty()
    }

    pub fn committed(&self, key: SyncKey) -> bool {
        self.committed.contains(&key)
    }
}

/// Counters kept across rounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub rounds: u64,
    pub commits: u64,
    pub aborted: u64,
}

/// Drives the per-frame synchronization of a sync group over a channel
pub struct ClusterSyncCoordinator<C: WallChannel> {
    channel: C,
    stats: SyncStats,
}

impl<C: WallChannel> ClusterSyncCoordinator<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            stats: SyncStats::default(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Inbound messages from the master
    pub fn receive_messages(&mut self) -> SyncResult<Vec<WallMessage>> {
        self.channel.receive_messages()
    }

    /// Agree on the master's clock
    pub fn synchronize_clock(&mut self, local_time: f64) -> SyncResult<f64> {
        self.channel.synchronize_clock(local_time)
    }

    /// Synchronize every value of `group`, then run `commit` if anything changed
    ///
    /// A value whose agreed version cannot be resolved on some node is
    /// committed on none; every node reports it in [`SyncReport::failed`] and
    /// the remaining values are still synchronized, keeping the collective
    /// calls paired. Any other error
    /// is returned immediately and must end the frame loop.
    pub fn synchronize<G, F>(&mut self, group: &mut G, commit: F) -> SyncResult<SyncReport>
    where
        G: SyncGroup + ?Sized,
        F: FnOnce(&mut G, &SyncReport),
    {
        let mut report = SyncReport::default();

        for slot in group.slots() {
            let key = slot.key();
            match slot.synchronize_with(&mut self.channel) {
                Ok(true) => {
                    log::debug!("committed '{}'", key);
                    report.committed.push(key);
                }
                Ok(false) => {}
                Err(err) if !err.is_fatal() => {
                    log::error!("synchronization of '{}' aborted: {}", key, err);
                    report.failed.push((key, err));
                }
                Err(err) => {
                    log::error!("synchronization failed on '{}': {}", key, err);
                    return Err(err);
                }
            }
        }

        self.stats.rounds += 1;
        self.stats.commits += report.committed.len() as u64;
        self.stats.aborted += report.failed.len() as u64;

        if report.has_changes() {
            commit(group, &report);
        }
        Ok(report)
    }

    /// Block until every node has committed this frame's state
    pub fn barrier(&mut self) -> SyncResult<()> {
        self.channel.barrier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{WallSyncGroup, DISPLAY_GROUP, OPTIONS, QUIT};
    use crate::local::{LocalCluster, DEFAULT_COLLECTIVE_TIMEOUT};
    use wall_core::{DisplayGroup, Options};

    /// A channel that always agrees with the local version
    struct EchoChannel {
        calls: Vec<SyncKey>,
    }

    impl WallChannel for EchoChannel {
        fn rank(&self) -> usize {
            0
        }

        fn size(&self) -> usize {
            1
        }

        fn check_version(&mut self, key: SyncKey, version: u64) -> SyncResult<u64> {
            self.calls.push(key);
            Ok(version)
        }

        fn confirm_commit(&mut self, _key: SyncKey, resolved: bool) -> SyncResult<bool> {
            Ok(resolved)
        }

        fn barrier(&mut self) -> SyncResult<()> {
            Ok(())
        }

        fn synchronize_clock(&mut self, local_time: f64) -> SyncResult<f64> {
            Ok(local_time)
        }

        fn receive_messages(&mut self) -> SyncResult<Vec<WallMessage>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_every_value_checked_in_order() {
        let mut coordinator = ClusterSyncCoordinator::new(EchoChannel { calls: Vec::new() });
        let mut group = WallSyncGroup::new(DisplayGroup::default(), Options::default());

        coordinator.synchronize(&mut group, |_, _| {}).unwrap();
        let expected = group.keys();
        assert_eq!(coordinator.channel().calls, expected);
    }

    #[test]
    fn test_commit_runs_after_all_values() {
        let mut coordinator = ClusterSyncCoordinator::new(EchoChannel { calls: Vec::new() });
        let mut group = WallSyncGroup::new(DisplayGroup::default(), Options::default());
        group.apply(WallMessage::Options(Options {
            show_statistics: true,
            ..Options::default()
        }));
        group.apply(WallMessage::Quit);

        let mut commits = 0;
        let report = coordinator
            .synchronize(&mut group, |group, report| {
                commits += 1;
                assert_eq!(report.committed, vec![QUIT, OPTIONS]);
                assert!(group.options.get().show_statistics);
            })
            .unwrap();

        assert_eq!(commits, 1);
        assert!(report.committed(QUIT));
        assert!(!report.committed(DISPLAY_GROUP));
        assert!(group.should_quit());

        // Nothing new: no commit
        coordinator
            .synchronize(&mut group, |_, _| panic!("unexpected commit"))
            .unwrap();
        assert_eq!(coordinator.stats().rounds, 2);
        assert_eq!(coordinator.stats().commits, 2);
    }

    #[test]
    fn test_unresolved_value_does_not_stop_the_round() {
        struct AheadChannel;

        impl WallChannel for AheadChannel {
            fn rank(&self) -> usize {
                0
            }
            fn size(&self) -> usize {
                1
            }
            fn check_version(&mut self, key: SyncKey, version: u64) -> SyncResult<u64> {
                // Claims a display group version nobody sent
                Ok(if key == DISPLAY_GROUP { version + 1 } else { version })
            }
            fn confirm_commit(&mut self, _key: SyncKey, resolved: bool) -> SyncResult<bool> {
                Ok(resolved)
            }
            fn barrier(&mut self) -> SyncResult<()> {
                Ok(())
            }
            fn synchronize_clock(&mut self, local_time: f64) -> SyncResult<f64> {
                Ok(local_time)
            }
            fn receive_messages(&mut self) -> SyncResult<Vec<WallMessage>> {
                Ok(Vec::new())
            }
        }

        let mut coordinator = ClusterSyncCoordinator::new(AheadChannel);
        let mut group = WallSyncGroup::new(DisplayGroup::default(), Options::default());
        group.apply(WallMessage::Quit);

        let report = coordinator.synchronize(&mut group, |_, _| {}).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, DISPLAY_GROUP);
        assert!(report.committed(QUIT));
        assert_eq!(coordinator.stats().aborted, 1);
    }

    #[test]
    fn test_single_node_cluster_round() {
        let (_cluster, mut channels, _publisher) = LocalCluster::new(1, DEFAULT_COLLECTIVE_TIMEOUT);
        let mut coordinator = ClusterSyncCoordinator::new(channels.remove(0));
        let mut group = WallSyncGroup::new(DisplayGroup::default(), Options::default());
        group.apply(WallMessage::Quit);

        coordinator.synchronize(&mut group, |_, _| {}).unwrap();
        coordinator.barrier().unwrap();
        assert!(group.should_quit());
    }
}
