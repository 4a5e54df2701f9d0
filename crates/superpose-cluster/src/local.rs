//! In-process multi-rank cluster
//!
//! Runs one thread per rank inside the current process, which is enough for
//! single-host distributed operation and makes the distributed pipeline
//! testable without an external launcher. Collectives go through a shared
//! blackboard (one slot per rank plus a reusable barrier); point-to-point
//! traffic uses buffered per-pair channels so paired sends never deadlock.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

struct Blackboard {
    size: usize,
    barrier: Barrier,
    slots: Vec<Mutex<Vec<u8>>>,
}

/// One rank's endpoint of a [`LocalCluster`].
pub struct LocalComm {
    rank: usize,
    shared: Arc<Blackboard>,
    /// `senders[dst]` feeds messages to rank `dst`.
    senders: Vec<Sender<Vec<u8>>>,
    /// `receivers[src]` yields messages sent by rank `src`.
    receivers: Vec<Receiver<Vec<u8>>>,
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn allgather(&self, payload: &[u8]) -> Result<Vec<Vec<u8>>> {
        *self.shared.slots[self.rank].lock() = payload.to_vec();
        self.shared.barrier.wait();
        let gathered = (0..self.shared.size)
            .map(|r| self.shared.slots[r].lock().clone())
            .collect();
        // Hold everyone until all reads are done so the slots can be reused
        // by the next collective.
        self.shared.barrier.wait();
        Ok(gathered)
    }

    fn send(&self, dst: usize, payload: &[u8]) -> Result<()> {
        self.senders[dst]
            .send(payload.to_vec())
            .map_err(|_| Error::Comm(format!("rank {dst} is gone")))
    }

    fn recv(&self, src: usize) -> Result<Vec<u8>> {
        self.receivers[src]
            .recv()
            .map_err(|_| Error::Comm(format!("rank {src} is gone")))
    }
}

/// Spawn `size` ranks, run `body` on each, and return the per-rank results
/// in rank order. A panic on any rank propagates to the caller.
pub struct LocalCluster;

impl LocalCluster {
    pub fn run<T, F>(size: usize, body: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalComm) -> T + Sync,
    {
        assert!(size > 0, "a cluster needs at least one rank");

        let shared = Arc::new(Blackboard {
            size,
            barrier: Barrier::new(size),
            slots: (0..size).map(|_| Mutex::new(Vec::new())).collect(),
        });

        // Full channel matrix: one buffered pipe per ordered rank pair.
        let mut senders: Vec<Vec<Sender<Vec<u8>>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Receiver<Vec<u8>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = channel();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }

        let comms: Vec<LocalComm> = senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalComm {
                rank,
                shared: Arc::clone(&shared),
                senders,
                receivers,
            })
            .collect();

        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let body = &body;
                    scope.spawn(move || body(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm;

    #[test]
    fn allgather_orders_by_rank() {
        let results = LocalCluster::run(4, |comm| {
            let gathered = comm.allgather(&[comm.rank() as u8; 3]).unwrap();
            gathered
        });
        for per_rank in results {
            assert_eq!(per_rank.len(), 4);
            for (r, payload) in per_rank.iter().enumerate() {
                assert_eq!(payload, &vec![r as u8; 3]);
            }
        }
    }

    #[test]
    fn repeated_collectives_reuse_the_blackboard() {
        LocalCluster::run(3, |comm| {
            for round in 0..10u64 {
                let sum = comm::allreduce_sum_u64(&comm, comm.rank() as u64 + round).unwrap();
                assert_eq!(sum, 3 * round + 3);
            }
        });
    }

    #[test]
    fn point_to_point_ring() {
        LocalCluster::run(4, |comm| {
            let next = (comm.rank() + 1) % comm.size();
            let prev = (comm.rank() + comm.size() - 1) % comm.size();
            comm.send(next, &[comm.rank() as u8]).unwrap();
            let got = comm.recv(prev).unwrap();
            assert_eq!(got, vec![prev as u8]);
        });
    }

    #[test]
    fn alltoallv_routes_segments() {
        LocalCluster::run(3, |comm| {
            let me = comm.rank() as u64;
            // Rank r sends r+1 copies of `10*r + d` to each destination d.
            let mut send = Vec::new();
            let mut counts = Vec::new();
            for dst in 0..3u64 {
                for _ in 0..=me {
                    send.push(10 * me + dst);
                }
                counts.push(me as usize + 1);
            }
            let (data, recv_counts) = comm::alltoallv::<u64, _>(&comm, &send, &counts).unwrap();
            assert_eq!(recv_counts, vec![1, 2, 3]);
            let expected: Vec<u64> = (0..3u64)
                .flat_map(|src| std::iter::repeat(10 * src + me).take(src as usize + 1))
                .collect();
            assert_eq!(data, expected);
        });
    }
}
