//! In-process cluster transport
//!
//! [`LocalCluster`] connects N nodes running as threads of one process. The
//! collectives are implemented as a generation-counted rendezvous guarded by
//! a mutex/condvar pair; the master's message stream uses one
//! crossbeam channel per node carrying framed bincode payloads.
//!
//! Every collective call is tagged (version check or commit confirmation
//! with its key, barrier, clock). A round whose tags differ between nodes
//! completes with [`SyncError::ProtocolDivergence`] on every node.

use crate::channel::{Publisher, WallChannel};
use crate::error::{SyncError, SyncResult};
use crate::message::{decode_message, encode_message, WallMessage};
use crate::versioned::SyncKey;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default time a node waits for its peers in a collective call
pub const DEFAULT_COLLECTIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// A node's contribution to a collective round
#[derive(Debug, Clone, Copy, PartialEq)]
enum Contribution {
    Version { key: SyncKey, version: u64 },
    Confirm { key: SyncKey, resolved: bool },
    Barrier,
    Clock(f64),
}

impl Contribution {
    fn same_call(&self, other: &Contribution) -> bool {
        match (self, other) {
            (Self::Version { key: a, .. }, Self::Version { key: b, .. }) => a == b,
            (Self::Confirm { key: a, .. }, Self::Confirm { key: b, .. }) => a == b,
            (Self::Barrier, Self::Barrier) => true,
            (Self::Clock(_), Self::Clock(_)) => true,
            _ => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Version { key, .. } => format!("check_version({})", key),
            Self::Confirm { key, .. } => format!("confirm_commit({})", key),
            Self::Barrier => "barrier".to_string(),
            Self::Clock(_) => "synchronize_clock".to_string(),
        }
    }
}

/// Result of a completed round, shared by every participant
#[derive(Debug, Clone)]
enum Outcome {
    Version(u64),
    Confirmed(bool),
    Barrier,
    Clock(f64),
    Diverged { expected: String, found: String },
}

struct Round {
    generation: u64,
    arrived: usize,
    contributions: Vec<Option<Contribution>>,
    outcome: Option<Outcome>,
    /// Set once a participant gave up; the collective is unusable afterwards
    broken: bool,
}

struct Collective {
    size: usize,
    timeout: Duration,
    round: Mutex<Round>,
    cond: Condvar,
    /// Every call made by each rank, for protocol inspection
    call_log: Mutex<Vec<Vec<String>>>,
}

impl Collective {
    fn new(size: usize, timeout: Duration) -> Self {
        Self {
            size,
            timeout,
            round: Mutex::new(Round {
                generation: 0,
                arrived: 0,
                contributions: vec![None; size],
                outcome: None,
                broken: false,
            }),
            cond: Condvar::new(),
            call_log: Mutex::new(vec![Vec::new(); size]),
        }
    }

    fn reduce(&self, contributions: &[Option<Contribution>]) -> Outcome {
        let all: Vec<Contribution> = contributions.iter().flatten().copied().collect();
        let Some(first) = all.first().copied() else {
            return Outcome::Barrier;
        };

        if let Some(other) = all.iter().find(|c| !first.same_call(c)) {
            return Outcome::Diverged {
                expected: first.describe(),
                found: other.describe(),
            };
        }

        match first {
            Contribution::Version { .. } => Outcome::Version(
                all.iter()
                    .filter_map(|c| match c {
                        Contribution::Version { version, .. } => Some(*version),
                        _ => None,
                    })
                    .min()
                    .unwrap_or(0),
            ),
            Contribution::Confirm { .. } => Outcome::Confirmed(all.iter().all(|c| {
                matches!(c, Contribution::Confirm { resolved: true, .. })
            })),
            Contribution::Barrier => Outcome::Barrier,
            // Rank 0 is the time reference
            Contribution::Clock(master_time) => Outcome::Clock(master_time),
        }
    }

    fn participate(&self, rank: usize, contribution: Contribution) -> SyncResult<Outcome> {
        self.call_log.lock()[rank].push(contribution.describe());

        let mut round = self.round.lock();
        if round.broken {
            return Err(SyncError::Disconnected);
        }

        let generation = round.generation;
        round.contributions[rank] = Some(contribution);
        round.arrived += 1;

        if round.arrived == self.size {
            let outcome = self.reduce(&round.contributions);
            round.contributions.iter_mut().for_each(|c| *c = None);
            round.arrived = 0;
            round.generation += 1;
            round.outcome = Some(outcome.clone());
            self.cond.notify_all();
            return Ok(outcome);
        }

        let deadline = Instant::now() + self.timeout;
        while round.generation == generation && !round.broken {
            if self.cond.wait_until(&mut round, deadline).timed_out()
                && round.generation == generation
            {
                log::error!(
                    "node {} timed out in {} after {:?}",
                    rank,
                    contribution.describe(),
                    self.timeout
                );
                round.broken = true;
                self.cond.notify_all();
                return Err(SyncError::Timeout(self.timeout));
            }
        }

        if round.generation == generation {
            return Err(SyncError::Disconnected);
        }
        round.outcome.clone().ok_or(SyncError::Disconnected)
    }
}

fn into_result<T>(outcome: Outcome, extract: impl FnOnce(Outcome) -> Option<T>) -> SyncResult<T> {
    match outcome {
        Outcome::Diverged { expected, found } => {
            Err(SyncError::ProtocolDivergence { expected, found })
        }
        other => {
            let description = format!("{:?}", other);
            extract(other).ok_or(SyncError::ProtocolDivergence {
                expected: "matching collective outcome".to_string(),
                found: description,
            })
        }
    }
}

/// Factory for a set of connected in-process nodes
pub struct LocalCluster {
    collective: Arc<Collective>,
}

impl LocalCluster {
    /// Create `size` connected channels and the master's publisher
    pub fn new(size: usize, timeout: Duration) -> (Self, Vec<LocalChannel>, LocalPublisher) {
        let size = size.max(1);
        let collective = Arc::new(Collective::new(size, timeout));

        let (senders, receivers): (Vec<Sender<Vec<u8>>>, Vec<Receiver<Vec<u8>>>) =
            (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        let channels = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalChannel {
                rank,
                collective: Arc::clone(&collective),
                inbox,
            })
            .collect();

        (Self { collective }, channels, LocalPublisher { outboxes: senders })
    }

    /// Calls made so far by one rank, in order
    pub fn call_log(&self, rank: usize) -> Vec<String> {
        self.collective
            .call_log
            .lock()
            .get(rank)
            .cloned()
            .unwrap_or_default()
    }

    /// True if every rank made the same sequence of collective calls
    pub fn call_logs_agree(&self) -> bool {
        let logs = self.collective.call_log.lock();
        logs.windows(2).all(|pair| pair[0] == pair[1])
    }
}

/// One node's endpoint on a [`LocalCluster`]
pub struct LocalChannel {
    rank: usize,
    collective: Arc<Collective>,
    inbox: Receiver<Vec<u8>>,
}

impl WallChannel for LocalChannel {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.collective.size
    }

    fn check_version(&mut self, key: SyncKey, version: u64) -> SyncResult<u64> {
        let outcome = self
            .collective
            .participate(self.rank, Contribution::Version { key, version })?;
        into_result(outcome, |o| match o {
            Outcome::Version(v) => Some(v),
            _ => None,
        })
    }

    fn confirm_commit(&mut self, key: SyncKey, resolved: bool) -> SyncResult<bool> {
        let outcome = self
            .collective
            .participate(self.rank, Contribution::Confirm { key, resolved })?;
        into_result(outcome, |o| match o {
            Outcome::Confirmed(everyone) => Some(everyone),
            _ => None,
        })
    }

    fn barrier(&mut self) -> SyncResult<()> {
        let outcome = self.collective.participate(self.rank, Contribution::Barrier)?;
        into_result(outcome, |o| match o {
            Outcome::Barrier => Some(()),
            _ => None,
        })
    }

    fn synchronize_clock(&mut self, local_time: f64) -> SyncResult<f64> {
        let outcome = self
            .collective
            .participate(self.rank, Contribution::Clock(local_time))?;
        into_result(outcome, |o| match o {
            Outcome::Clock(t) => Some(t),
            _ => None,
        })
    }

    fn receive_messages(&mut self) -> SyncResult<Vec<WallMessage>> {
        let mut messages = Vec::new();
        loop {
            match self.inbox.try_recv() {
                Ok(bytes) => messages.push(decode_message(&bytes)?),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(messages)
    }
}

/// The master's handle for publishing to every node of a [`LocalCluster`]
#[derive(Clone)]
pub struct LocalPublisher {
    outboxes: Vec<Sender<Vec<u8>>>,
}

impl Publisher for LocalPublisher {
    fn publish(&self, message: &WallMessage) -> SyncResult<()> {
        let bytes = encode_message(message)?;
        for outbox in &self.outboxes {
            outbox
                .send(bytes.clone())
                .map_err(|_| SyncError::Disconnected)?;
        }
        log::trace!("published {} ({} bytes)", message.kind(), bytes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const A: SyncKey = SyncKey::new("a");
    const B: SyncKey = SyncKey::new("b");

    #[test]
    fn test_check_version_returns_minimum() {
        let (_cluster, channels, _publisher) = LocalCluster::new(3, DEFAULT_COLLECTIVE_TIMEOUT);
        let handles: Vec<_> = channels
            .into_iter()
            .map(|mut channel| {
                thread::spawn(move || {
                    let version = 5 + channel.rank() as u64;
                    channel.check_version(A, version).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 5);
        }
    }

    #[test]
    fn test_mismatched_keys_diverge_on_every_node() {
        let (cluster, channels, _publisher) = LocalCluster::new(2, DEFAULT_COLLECTIVE_TIMEOUT);
        let handles: Vec<_> = channels
            .into_iter()
            .map(|mut channel| {
                thread::spawn(move || {
                    let key = if channel.rank() == 0 { A } else { B };
                    channel.check_version(key, 1)
                })
            })
            .collect();

        for handle in handles {
            assert!(matches!(
                handle.join().unwrap(),
                Err(SyncError::ProtocolDivergence { .. })
            ));
        }
        assert!(!cluster.call_logs_agree());
    }

    #[test]
    fn test_confirm_commit_needs_every_node() {
        let (_cluster, channels, _publisher) = LocalCluster::new(3, DEFAULT_COLLECTIVE_TIMEOUT);
        let handles: Vec<_> = channels
            .into_iter()
            .map(|mut channel| {
                thread::spawn(move || {
                    let first = channel.confirm_commit(A, true).unwrap();
                    let second = channel.confirm_commit(A, channel.rank() != 2).unwrap();
                    (first, second)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), (true, false));
        }
    }

    #[test]
    fn test_clock_uses_master_time() {
        let (_cluster, channels, _publisher) = LocalCluster::new(2, DEFAULT_COLLECTIVE_TIMEOUT);
        let handles: Vec<_> = channels
            .into_iter()
            .map(|mut channel| {
                thread::spawn(move || {
                    let local = if channel.rank() == 0 { 42.0 } else { 7.0 };
                    channel.synchronize_clock(local).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42.0);
        }
    }

    #[test]
    fn test_missing_peer_times_out() {
        let (_cluster, mut channels, _publisher) =
            LocalCluster::new(2, Duration::from_millis(50));
        let mut lonely = channels.remove(0);
        assert!(matches!(lonely.barrier(), Err(SyncError::Timeout(_))));
        // The collective stays broken
        assert!(matches!(lonely.barrier(), Err(SyncError::Disconnected)));
    }

    #[test]
    fn test_publish_reaches_every_node() {
        let (_cluster, mut channels, publisher) = LocalCluster::new(3, DEFAULT_COLLECTIVE_TIMEOUT);
        publisher.publish(&WallMessage::Quit).unwrap();

        for channel in channels.iter_mut() {
            assert_eq!(channel.receive_messages().unwrap(), vec![WallMessage::Quit]);
            assert!(channel.receive_messages().unwrap().is_empty());
        }
    }

    #[test]
    fn test_single_node_cluster() {
        let (_cluster, mut channels, _publisher) = LocalCluster::new(1, DEFAULT_COLLECTIVE_TIMEOUT);
        let channel = &mut channels[0];
        assert!(channel.is_master());
        assert_eq!(channel.check_version(A, 3).unwrap(), 3);
        channel.barrier().unwrap();
    }
}
