//! Communicator group boundary.
//!
//! The point store treats a process group as an opaque addressable peer set
//! with `send`/`recv`/`recv_any` primitives plus an `all_gather` collective.
//! Three disjoint groups are bound at run time (the outbox-group carrying
//! fetch requests, the inbox-group carrying acknowledgments, and the
//! computation-group carrying the unrelated numerical traffic) so that
//! point-serving messages are never reordered against or blocked by the
//! consumer's own exchange.
//!
//! [`MemoryGroup`] provides the in-process fabric used by co-scheduled
//! single-host jobs and tests.

mod memory;

use crate::error::{Result, StoreError};
use crate::types::Rank;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

pub use memory::{MemoryComm, MemoryGroup};

/// Tags distinguishing message kinds on a communicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    /// A point-fetch request, sent outbox → inbox.
    RequestPoint,
    /// The acknowledgment token sent inbox → outbox once a point is staged.
    ReceivePoint,
    /// Initialization-time all-gather traffic.
    Gather,
}

/// Type alias for async communicator futures.
pub type CommFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// An opaque addressable peer set.
///
/// Implementations must deliver messages between a fixed group of ranks
/// with per-`(sender, tag)` FIFO ordering. No ordering is defined across
/// different senders, and none is required: point fetches are independent.
pub trait Communicator: Send + Sync {
    /// This process's rank within the group.
    fn rank(&self) -> Rank;

    /// The number of ranks in the group.
    fn size(&self) -> u32;

    /// Send a payload to `dest`.
    ///
    /// # Errors
    ///
    /// `InvalidRank` if `dest` is outside the group: a fatal addressing
    /// error, never silently dropped.
    fn send(&self, dest: Rank, tag: MessageTag, payload: Vec<u8>) -> CommFuture<'_, ()>;

    /// Receive the next payload sent by `src` with `tag`.
    ///
    /// Suspends until a matching message arrives.
    fn recv(&self, src: Rank, tag: MessageTag) -> CommFuture<'_, Vec<u8>>;

    /// Receive the next payload with `tag` from any sender.
    ///
    /// Suspends until a matching message arrives. Must be cancel-safe: a
    /// dropped future consumes no message.
    fn recv_any(&self, tag: MessageTag) -> CommFuture<'_, (Rank, Vec<u8>)>;
}

/// Typed helpers layered over any [`Communicator`].
pub trait CommunicatorExt: Communicator {
    /// Serialize and send one value.
    fn send_value<'a, V: Serialize + Sync + 'a>(
        &'a self,
        dest: Rank,
        tag: MessageTag,
        value: &'a V,
    ) -> CommFuture<'a, ()> {
        Box::pin(async move {
            let payload =
                serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
            self.send(dest, tag, payload).await
        })
    }

    /// Receive and deserialize one value from `src`.
    fn recv_value<'a, V: DeserializeOwned + 'a>(
        &'a self,
        src: Rank,
        tag: MessageTag,
    ) -> CommFuture<'a, V> {
        Box::pin(async move {
            let payload = self.recv(src, tag).await?;
            serde_json::from_slice(&payload).map_err(|e| StoreError::Serialization(e.to_string()))
        })
    }

    /// Receive and deserialize one value from any sender.
    fn recv_any_value<'a, V: DeserializeOwned + 'a>(
        &'a self,
        tag: MessageTag,
    ) -> CommFuture<'a, (Rank, V)> {
        Box::pin(async move {
            let (src, payload) = self.recv_any(tag).await?;
            let value = serde_json::from_slice(&payload)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            Ok((src, value))
        })
    }

    /// Gather one value from every rank, in rank order.
    ///
    /// Every rank must call this concurrently with its own contribution;
    /// the result at index `r` is rank `r`'s value. Used once at table
    /// initialization for entry counts and the mailbox directory.
    fn all_gather<'a, V: Serialize + DeserializeOwned + Send + Sync + 'a>(
        &'a self,
        value: &'a V,
    ) -> CommFuture<'a, Vec<V>> {
        Box::pin(async move {
            for dest in 0..self.size() {
                self.send_value(Rank::new(dest), MessageTag::Gather, value)
                    .await?;
            }
            let mut gathered = Vec::with_capacity(self.size() as usize);
            for src in 0..self.size() {
                gathered.push(self.recv_value(Rank::new(src), MessageTag::Gather).await?);
            }
            Ok(gathered)
        })
    }
}

impl<C: Communicator + ?Sized> CommunicatorExt for C {}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn Communicator) {}

    #[test]
    fn tag_is_hashable() {
        use std::collections::HashSet;
        let tags: HashSet<MessageTag> = [
            MessageTag::RequestPoint,
            MessageTag::ReceivePoint,
            MessageTag::Gather,
        ]
        .into_iter()
        .collect();
        assert_eq!(tags.len(), 3);
    }
}
