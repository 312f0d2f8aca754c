//! In-process communicator fabric.
//!
//! Models a co-scheduled process group inside one address space: each rank
//! runs as a task, messages move through per-`(dest, src, tag)` FIFO queues,
//! and receivers park on a per-rank [`Notify`] until a matching message
//! lands. Useful for single-host deployments and for the test harness.

use super::{CommFuture, Communicator, MessageTag};
use crate::error::{Result, StoreError};
use crate::types::Rank;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared state of one communicator group.
struct Fabric {
    size: u32,
    /// FIFO queues keyed by (dest, src, tag).
    queues: Mutex<HashMap<(Rank, Rank, MessageTag), VecDeque<Vec<u8>>>>,
    /// One wakeup per destination rank.
    doorbells: Vec<Notify>,
}

impl Fabric {
    fn push(&self, dest: Rank, src: Rank, tag: MessageTag, payload: Vec<u8>) {
        self.queues
            .lock()
            .entry((dest, src, tag))
            .or_default()
            .push_back(payload);
        self.doorbells[dest.as_usize()].notify_waiters();
    }

    fn pop(&self, dest: Rank, src: Rank, tag: MessageTag) -> Option<Vec<u8>> {
        self.queues.lock().get_mut(&(dest, src, tag))?.pop_front()
    }

    fn pop_any(&self, dest: Rank, tag: MessageTag) -> Option<(Rank, Vec<u8>)> {
        let mut queues = self.queues.lock();
        // Scan senders in rank order for deterministic draining.
        for src in 0..self.size {
            let src = Rank::new(src);
            if let Some(queue) = queues.get_mut(&(dest, src, tag)) {
                if let Some(payload) = queue.pop_front() {
                    return Some((src, payload));
                }
            }
        }
        None
    }
}

/// A group of in-process communicators sharing one fabric.
pub struct MemoryGroup;

impl MemoryGroup {
    /// Create a group of `size` ranks, returned in rank order.
    #[must_use]
    pub fn create(size: u32) -> Vec<MemoryComm> {
        let fabric = Arc::new(Fabric {
            size,
            queues: Mutex::new(HashMap::new()),
            doorbells: (0..size).map(|_| Notify::new()).collect(),
        });
        (0..size)
            .map(|rank| MemoryComm {
                rank: Rank::new(rank),
                fabric: Arc::clone(&fabric),
            })
            .collect()
    }
}

/// One rank's endpoint in a [`MemoryGroup`].
#[derive(Clone)]
pub struct MemoryComm {
    rank: Rank,
    fabric: Arc<Fabric>,
}

impl MemoryComm {
    fn check_rank(&self, rank: Rank) -> Result<()> {
        if rank.as_u32() >= self.fabric.size {
            return Err(StoreError::InvalidRank {
                rank,
                group_size: self.fabric.size,
            });
        }
        Ok(())
    }
}

impl Communicator for MemoryComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> u32 {
        self.fabric.size
    }

    fn send(&self, dest: Rank, tag: MessageTag, payload: Vec<u8>) -> CommFuture<'_, ()> {
        Box::pin(async move {
            self.check_rank(dest)?;
            tracing::trace!(src = %self.rank, dest = %dest, ?tag, "Sent message");
            self.fabric.push(dest, self.rank, tag, payload);
            Ok(())
        })
    }

    fn recv(&self, src: Rank, tag: MessageTag) -> CommFuture<'_, Vec<u8>> {
        Box::pin(async move {
            self.check_rank(src)?;
            let doorbell = &self.fabric.doorbells[self.rank.as_usize()];
            loop {
                // Arm the wakeup before checking the queue so a message
                // pushed in between is not missed.
                let mut notified = std::pin::pin!(doorbell.notified());
                notified.as_mut().enable();
                if let Some(payload) = self.fabric.pop(self.rank, src, tag) {
                    return Ok(payload);
                }
                notified.await;
            }
        })
    }

    fn recv_any(&self, tag: MessageTag) -> CommFuture<'_, (Rank, Vec<u8>)> {
        Box::pin(async move {
            let doorbell = &self.fabric.doorbells[self.rank.as_usize()];
            loop {
                let mut notified = std::pin::pin!(doorbell.notified());
                notified.as_mut().enable();
                if let Some(found) = self.fabric.pop_any(self.rank, tag) {
                    tracing::trace!(dest = %self.rank, src = %found.0, ?tag, "Received message");
                    return Ok(found);
                }
                notified.await;
            }
        })
    }
}
