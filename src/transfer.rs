//! Inter-rank particle transfer.
//!
//! A [`Transport`] moves opaque byte payloads between ranks at a
//! synchronization point. Every rank must call [`Transport::exchange`] the
//! same number of times, even when it has nothing to send, so that
//! migrating particles are reconstructed exactly once on the receiving side.

use anyhow::{Result, anyhow};
use log::trace;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::TrackingError;

/// Payload addressed from one rank to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source: usize,
    pub dest: usize,
    pub payload: Vec<u8>,
}

pub trait Transport {
    fn rank(&self) -> usize;

    fn n_ranks(&self) -> usize;

    /// Collective all-to-all exchange. Returns every envelope addressed to
    /// this rank, ordered by source rank.
    fn exchange(&mut self, outbound: Vec<Envelope>) -> Result<Vec<Envelope>>;

    /// Collective gather of one value per rank, indexed by rank.
    fn all_gather(&mut self, value: u64) -> Result<Vec<u64>>;
}

/// Single-rank transport. Any outbound envelope is a lost particle.
#[derive(Debug, Default, Clone)]
pub struct SerialTransport;

impl SerialTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for SerialTransport {
    fn rank(&self) -> usize {
        0
    }

    fn n_ranks(&self) -> usize {
        1
    }

    fn exchange(&mut self, outbound: Vec<Envelope>) -> Result<Vec<Envelope>> {
        if let Some(env) = outbound.first() {
            return Err(TrackingError::MigrationLoss {
                from_rank: env.source,
                to_rank: env.dest,
                detail: "serial run has no neighbouring ranks".to_string(),
            }
            .into());
        }
        Ok(Vec::new())
    }

    fn all_gather(&mut self, value: u64) -> Result<Vec<u64>> {
        Ok(vec![value])
    }
}

struct Hub {
    mailboxes: Vec<Vec<Envelope>>,
    /// `sent[src][dest]`: envelopes posted in the current round.
    sent: Vec<Vec<usize>>,
    gather: Vec<u64>,
    /// Ranks waiting at the current rendezvous.
    arrived: usize,
    /// Completed rendezvous.
    generation: u64,
    /// First rank whose transport was dropped.
    departed: Option<usize>,
}

/// In-process transport connecting ranks that run on separate threads.
///
/// Each collective call is two phases separated by a rendezvous: post,
/// then collect. A rank only writes its own row of the bookkeeping before
/// the first rendezvous and only reads after it. Once a rank drops its
/// transport, for instance after failing, every rendezvous it would have
/// joined fails on the others instead of blocking them.
pub struct ThreadedTransport {
    rank: usize,
    n_ranks: usize,
    hub: Arc<Mutex<Hub>>,
    wake: Arc<Condvar>,
}

impl ThreadedTransport {
    /// Creates connected transports for `n_ranks` ranks, one per thread.
    pub fn group(n_ranks: usize) -> Vec<Self> {
        let hub = Arc::new(Mutex::new(Hub {
            mailboxes: vec![Vec::new(); n_ranks],
            sent: vec![vec![0; n_ranks]; n_ranks],
            gather: vec![0; n_ranks],
            arrived: 0,
            generation: 0,
            departed: None,
        }));
        let wake = Arc::new(Condvar::new());
        (0..n_ranks)
            .map(|rank| Self {
                rank,
                n_ranks,
                hub: Arc::clone(&hub),
                wake: Arc::clone(&wake),
            })
            .collect()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Hub>> {
        self.hub
            .lock()
            .map_err(|_| anyhow!("rank {}: transport hub poisoned by a failed rank", self.rank))
    }

    /// Waits until every rank reaches the same point.
    fn sync(&self) -> Result<()> {
        let left = |other: usize| anyhow!("rank {}: rank {other} left the transport group", self.rank);
        let mut hub = self.lock()?;
        if let Some(other) = hub.departed {
            return Err(left(other));
        }
        hub.arrived += 1;
        if hub.arrived == self.n_ranks {
            hub.arrived = 0;
            hub.generation += 1;
            self.wake.notify_all();
            return Ok(());
        }
        let generation = hub.generation;
        while hub.generation == generation {
            if let Some(other) = hub.departed {
                return Err(left(other));
            }
            hub = self
                .wake
                .wait(hub)
                .map_err(|_| anyhow!("rank {}: transport hub poisoned by a failed rank", self.rank))?;
        }
        Ok(())
    }
}

impl Drop for ThreadedTransport {
    fn drop(&mut self) {
        let mut hub = self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        hub.departed.get_or_insert(self.rank);
        drop(hub);
        self.wake.notify_all();
    }
}

impl Transport for ThreadedTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    fn exchange(&mut self, outbound: Vec<Envelope>) -> Result<Vec<Envelope>> {
        let mut rejected = None;
        {
            let mut hub = self.lock()?;
            hub.sent[self.rank].iter_mut().for_each(|n| *n = 0);
            for env in outbound {
                if env.dest >= self.n_ranks || env.source != self.rank || env.dest == self.rank {
                    rejected.get_or_insert((env.dest, env.source));
                    continue;
                }
                hub.sent[self.rank][env.dest] += 1;
                hub.mailboxes[env.dest].push(env);
            }
        }
        self.sync()?;

        let (mut inbound, expected) = {
            let mut hub = self.lock()?;
            let inbound = std::mem::take(&mut hub.mailboxes[self.rank]);
            let expected: usize = hub.sent.iter().map(|row| row[self.rank]).sum();
            (inbound, expected)
        };
        self.sync()?;

        if let Some((dest, source)) = rejected {
            return Err(TrackingError::MigrationLoss {
                from_rank: self.rank,
                to_rank: dest,
                detail: format!(
                    "envelope from {source} to {dest} is not routable in a group of {}",
                    self.n_ranks
                ),
            }
            .into());
        }
        if inbound.len() != expected {
            return Err(TrackingError::MigrationLoss {
                from_rank: usize::MAX,
                to_rank: self.rank,
                detail: format!("expected {expected} envelopes, received {}", inbound.len()),
            }
            .into());
        }
        inbound.sort_by_key(|env| env.source);
        trace!("rank {}: received {} envelopes", self.rank, inbound.len());
        Ok(inbound)
    }

    fn all_gather(&mut self, value: u64) -> Result<Vec<u64>> {
        {
            let mut hub = self.lock()?;
            hub.gather[self.rank] = value;
        }
        self.sync()?;
        let values = self.lock()?.gather.clone();
        self.sync()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<R: Send>(n: usize, f: impl Fn(ThreadedTransport) -> R + Sync) -> Vec<R> {
        let transports = ThreadedTransport::group(n);
        std::thread::scope(|s| {
            let handles: Vec<_> = transports
                .into_iter()
                .map(|t| {
                    let f = &f;
                    s.spawn(move || f(t))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_serial_rejects_outbound() {
        let mut t = SerialTransport::new();
        assert!(t.exchange(Vec::new()).unwrap().is_empty());
        let err = t
            .exchange(vec![Envelope {
                source: 0,
                dest: 1,
                payload: vec![1],
            }])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackingError>(),
            Some(TrackingError::MigrationLoss { to_rank: 1, .. })
        ));
        assert_eq!(t.all_gather(5).unwrap(), vec![5]);
    }

    #[test]
    fn test_ring_exchange() {
        let received = run(3, |mut t| {
            let me = t.rank();
            let next = (me + 1) % 3;
            let out = vec![Envelope {
                source: me,
                dest: next,
                payload: vec![me as u8; me + 1],
            }];
            let first = t.exchange(out).unwrap();
            // Second round with nothing to send must not replay the first.
            let second = t.exchange(Vec::new()).unwrap();
            (me, first, second)
        });
        for (me, first, second) in received {
            let prev = (me + 2) % 3;
            assert_eq!(first.len(), 1);
            assert_eq!(first[0].source, prev);
            assert_eq!(first[0].payload, vec![prev as u8; prev + 1]);
            assert!(second.is_empty());
        }
    }

    #[test]
    fn test_invalid_destination_fails_without_deadlock() {
        let results = run(2, |mut t| {
            let out = if t.rank() == 0 {
                vec![Envelope {
                    source: 0,
                    dest: 7,
                    payload: Vec::new(),
                }]
            } else {
                Vec::new()
            };
            t.exchange(out).is_ok()
        });
        assert_eq!(results, vec![false, true]);
    }

    #[test]
    fn test_departed_rank_fails_the_others_instead_of_blocking() {
        let results = run(3, |mut t| {
            t.exchange(Vec::new()).unwrap();
            if t.rank() == 2 {
                // Dropped here, as a failing rank would be
                return None;
            }
            Some(t.all_gather(1).is_err())
        });
        assert_eq!(results, vec![Some(true), Some(true), None]);
    }

    #[test]
    fn test_all_gather() {
        let gathered = run(4, |mut t| t.all_gather(10 * t.rank() as u64).unwrap());
        for values in gathered {
            assert_eq!(values, vec![0, 10, 20, 30]);
        }
    }
}
