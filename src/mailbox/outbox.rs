//! Client-side mailbox: issues point-fetch requests on behalf of local
//! computation.

use super::inbox::Inbox;
use super::message::{AckToken, FetchRequest};
use crate::arena::{Arena, ArenaArray};
use crate::comm::{Communicator, CommunicatorExt, MessageTag};
use crate::error::{Result, StoreError};
use crate::table::{Partition, PointRef};
use crate::types::{ArenaHandle, PointId, Rank};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

/// Default interval between diagnostics while an ack is outstanding: 5s.
pub(crate) const DEFAULT_ACK_WARN_INTERVAL_MS: u64 = 5_000;

/// The client half of the point-fetch protocol.
///
/// `fetch` routes a point request: locally owned points come straight from
/// the partition, previously acknowledged points come from the alias cache,
/// and everything else goes over the wire. The wait for an acknowledgment
/// is the only blocking point in the whole core: the calling task suspends
/// on a reply channel that the ack-router loop signals, so one rank can
/// keep many fetches in flight without a thread per request.
pub struct Outbox {
    my_rank: Rank,
    /// Handle to the locally owned partition, for the no-traffic path.
    partition: ArenaHandle<Partition>,
    /// Aliases of previously fetched remote points.
    cache: Mutex<HashMap<(Rank, PointId), PointRef>>,
    /// In-flight requests waiting for an acknowledgment, keyed by owner and
    /// point. Several waiters may stack behind the same key; each incoming
    /// ack wakes exactly one.
    in_flight: Mutex<HashMap<(Rank, PointId), Vec<oneshot::Sender<AckToken>>>>,
    /// Milliseconds between "still waiting" diagnostics.
    ack_warn_interval_ms: u64,
    closing: AtomicBool,
    shutdown: Notify,
}

impl Outbox {
    /// Create an outbox for the given rank and owned partition.
    #[must_use]
    pub fn new(my_rank: Rank, partition: ArenaHandle<Partition>) -> Self {
        Self::with_warn_interval(my_rank, partition, DEFAULT_ACK_WARN_INTERVAL_MS)
    }

    /// Create an outbox with a custom diagnostic interval.
    #[must_use]
    pub fn with_warn_interval(
        my_rank: Rank,
        partition: ArenaHandle<Partition>,
        ack_warn_interval_ms: u64,
    ) -> Self {
        Self {
            my_rank,
            partition,
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            ack_warn_interval_ms,
            closing: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Number of requests currently awaiting acknowledgment.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().values().map(Vec::len).sum()
    }

    /// Number of cached remote aliases.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Fetch a point, routing by ownership.
    ///
    /// - `owner_rank == my_rank`: read the owned partition, no traffic.
    /// - cached alias: returned without messaging.
    /// - otherwise: send a [`FetchRequest`] to the owner's inbox over
    ///   `request_comm`, suspend until the ack router signals the reply
    ///   channel, then alias the buffer staged in the owner's inbox
    ///   (resolved through the shared arena via `directory`).
    ///
    /// # Errors
    ///
    /// - `InvalidRank` if `owner_rank` is outside the group.
    /// - `IndexOutOfRange` on an out-of-bounds local read.
    /// - `ChannelClosed` if the ack router stops while the request is in
    ///   flight.
    ///
    /// A reply that never arrives is not recovered here; the wait only
    /// emits periodic diagnostics (accepted fault model for co-scheduled
    /// jobs; there is no timeout failure).
    pub async fn fetch(
        &self,
        arena: &Arena,
        request_comm: &dyn Communicator,
        directory: &ArenaArray<ArenaHandle<Inbox>>,
        owner_rank: Rank,
        point_id: PointId,
    ) -> Result<PointRef> {
        if owner_rank == self.my_rank {
            let partition = arena.get(self.partition)?;
            return partition.get(point_id);
        }

        if owner_rank.as_usize() >= directory.len() {
            return Err(StoreError::InvalidRank {
                rank: owner_rank,
                group_size: directory.len() as u32,
            });
        }

        if let Some(cached) = self.cache.lock().get(&(owner_rank, point_id)) {
            tracing::trace!(owner = %owner_rank, point = %point_id, "Fetch served from cache");
            return Ok(cached.clone());
        }

        // Register the in-flight entry before sending so the ack cannot
        // race past the waiter.
        let (tx, rx) = oneshot::channel();
        self.in_flight
            .lock()
            .entry((owner_rank, point_id))
            .or_default()
            .push(tx);

        if let Err(e) = request_comm
            .send_value(
                owner_rank,
                MessageTag::RequestPoint,
                &FetchRequest::new(self.my_rank, point_id),
            )
            .await
        {
            // The request never left; drop the waiter we just registered.
            let mut in_flight = self.in_flight.lock();
            if let Some(waiters) = in_flight.get_mut(&(owner_rank, point_id)) {
                waiters.pop();
                if waiters.is_empty() {
                    in_flight.remove(&(owner_rank, point_id));
                }
            }
            drop(in_flight);
            return Err(e);
        }

        self.wait_for_ack(rx, owner_rank, point_id).await?;

        // The point is now staged in the owner's inbox; alias it through
        // the shared arena.
        let owner_inbox = directory
            .get(owner_rank.as_usize())
            .copied()
            .ok_or(StoreError::InvalidRank {
                rank: owner_rank,
                group_size: directory.len() as u32,
            })?;
        let inbox = arena.get(owner_inbox)?;
        let point = inbox
            .get_point(self.my_rank, point_id)
            .ok_or(StoreError::ChannelClosed { peer: owner_rank })?;

        self.cache
            .lock()
            .insert((owner_rank, point_id), point.clone());
        Ok(point)
    }

    /// Suspend until the ack router signals the reply channel, logging a
    /// diagnostic at every configured interval while the request is
    /// outstanding.
    async fn wait_for_ack(
        &self,
        mut rx: oneshot::Receiver<AckToken>,
        owner_rank: Rank,
        point_id: PointId,
    ) -> Result<AckToken> {
        let interval = Duration::from_millis(self.ack_warn_interval_ms.max(1));
        let mut waited = 0u32;
        loop {
            match tokio::time::timeout(interval, &mut rx).await {
                Ok(Ok(token)) => return Ok(token),
                Ok(Err(_)) => return Err(StoreError::ChannelClosed { peer: owner_rank }),
                Err(_) => {
                    waited += 1;
                    tracing::warn!(
                        owner = %owner_rank,
                        point = %point_id,
                        waited_ms = u64::from(waited) * self.ack_warn_interval_ms,
                        "Still waiting for point acknowledgment"
                    );
                }
            }
        }
    }

    /// Signal the ack-router loop to stop.
    ///
    /// Pending waiters are dropped, which fails their fetches with
    /// `ChannelClosed`.
    pub fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.in_flight.lock().clear();
    }

    /// Run the ack-router loop bound to the communicator triple.
    ///
    /// Receives acknowledgment tokens from any owner over the inbox-group
    /// communicator and wakes the matching in-flight waiter. The
    /// outbox-group communicator is the one `fetch` sends requests on; the
    /// computation-group communicator carries only the consumer's traffic.
    ///
    /// # Errors
    ///
    /// Propagates communicator failures; those are fatal to the job.
    pub async fn run(
        &self,
        _outbox_group: &dyn Communicator,
        inbox_group: &dyn Communicator,
        _computation_group: &dyn Communicator,
    ) -> Result<()> {
        tracing::debug!(rank = %self.my_rank, "Outbox routing acknowledgments");
        loop {
            let mut shutdown = std::pin::pin!(self.shutdown.notified());
            shutdown.as_mut().enable();
            if self.closing.load(Ordering::SeqCst) {
                return Ok(());
            }
            let (owner, token) = tokio::select! {
                _ = &mut shutdown => return Ok(()),
                received = inbox_group.recv_any_value::<AckToken>(MessageTag::ReceivePoint) => received?,
            };
            self.route_ack(owner, token);
        }
    }

    /// Wake one waiter for an acknowledged `(owner, point)` pair.
    fn route_ack(&self, owner: Rank, token: AckToken) {
        let mut in_flight = self.in_flight.lock();
        let Some(waiters) = in_flight
            .get_mut(&(owner, token.point_id))
            .filter(|w| !w.is_empty())
        else {
            tracing::warn!(owner = %owner, point = %token.point_id, "Unmatched acknowledgment");
            return;
        };
        // One ack per request: wake the oldest waiter.
        let waiter = waiters.remove(0);
        if waiters.is_empty() {
            in_flight.remove(&(owner, token.point_id));
        }
        if waiter.send(token).is_err() {
            tracing::warn!(owner = %owner, point = %token.point_id, "Waiter gone before ack");
        }
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("rank", &self.my_rank)
            .field("in_flight", &self.in_flight_count())
            .field("cached", &self.cached_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;
    use crate::table::MemorySource;
    use crate::types::TableId;

    fn outbox_fixture() -> (Arena, Outbox) {
        let arena = Arena::create(TableId::new(), &ArenaConfig::for_testing());
        let partition =
            Partition::load(&MemorySource::new(vec![1.0, 2.0, 3.0, 4.0], 2)).unwrap();
        let handle = arena.construct(partition).unwrap();
        (arena, Outbox::new(Rank::new(0), handle))
    }

    fn directory(
        arena: &Arena,
        handles: Vec<ArenaHandle<Inbox>>,
    ) -> std::sync::Arc<ArenaArray<ArenaHandle<Inbox>>> {
        let handle = arena.construct_array(handles).unwrap();
        arena.get(handle).unwrap()
    }

    #[tokio::test]
    async fn own_rank_fetch_reads_partition_directly() {
        let (arena, outbox) = outbox_fixture();
        let directory = directory(&arena, vec![]);
        let comms = crate::comm::MemoryGroup::create(1);

        let point = outbox
            .fetch(&arena, &comms[0], &directory, Rank::new(0), PointId::new(1))
            .await
            .unwrap();
        assert_eq!(point.as_slice(), &[3.0, 4.0]);
        assert_eq!(outbox.cached_count(), 0);
    }

    #[tokio::test]
    async fn own_rank_out_of_range_fails() {
        let (arena, outbox) = outbox_fixture();
        let directory = directory(&arena, vec![]);
        let comms = crate::comm::MemoryGroup::create(1);

        let err = outbox
            .fetch(&arena, &comms[0], &directory, Rank::new(0), PointId::new(2))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E103");
    }

    #[tokio::test]
    async fn rank_outside_directory_is_fatal() {
        let (arena, outbox) = outbox_fixture();
        let directory = directory(&arena, vec![ArenaHandle::NULL]);
        let comms = crate::comm::MemoryGroup::create(1);

        let err = outbox
            .fetch(&arena, &comms[0], &directory, Rank::new(3), PointId::new(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRank { .. }));
    }

    #[test]
    fn route_ack_wakes_oldest_waiter_first() {
        let (_, outbox) = outbox_fixture();
        let key = (Rank::new(1), PointId::new(4));

        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        outbox.in_flight.lock().insert(key, vec![tx_a, tx_b]);

        outbox.route_ack(Rank::new(1), AckToken::new(PointId::new(4)));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert_eq!(outbox.in_flight_count(), 1);

        outbox.route_ack(Rank::new(1), AckToken::new(PointId::new(4)));
        assert!(rx_b.try_recv().is_ok());
        assert_eq!(outbox.in_flight_count(), 0);
    }

    #[test]
    fn unmatched_ack_is_ignored() {
        let (_, outbox) = outbox_fixture();
        outbox.route_ack(Rank::new(2), AckToken::new(PointId::new(9)));
        assert_eq!(outbox.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_fails_pending_fetches() {
        let (_, outbox) = outbox_fixture();
        let key = (Rank::new(1), PointId::new(0));
        let (tx, rx) = oneshot::channel();
        outbox.in_flight.lock().insert(key, vec![tx]);

        outbox.shutdown();
        let err = outbox
            .wait_for_ack(rx, Rank::new(1), PointId::new(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ChannelClosed { .. }));
    }
}
