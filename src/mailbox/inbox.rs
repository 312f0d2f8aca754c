//! Server-side mailbox: answers point-fetch requests for locally owned
//! points.

use super::message::{AckToken, FetchRequest};
use crate::arena::Arena;
use crate::comm::{Communicator, CommunicatorExt, MessageTag};
use crate::error::{Result, StoreError};
use crate::table::{Partition, PointRef};
use crate::types::{ArenaHandle, PointId, Rank};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::sync::Notify;

/// Observable state of the serve loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxState {
    /// Not serving; the loop is not running.
    Idle,
    /// The serve loop is processing requests.
    Serving,
}

const STATE_IDLE: u8 = 0;
const STATE_SERVING: u8 = 1;

/// The server half of the point-fetch protocol.
///
/// Lives in the shared arena so that requesters can alias-read its staging
/// buffer through their copy of the inbox handle. During steady-state
/// serving the inbox only appends to and removes from its own staging map;
/// it never constructs or destroys arena objects.
pub struct Inbox {
    /// Handle to the partition this inbox serves from.
    partition: ArenaHandle<Partition>,
    /// Retained reply buffer: staged points keyed by requester and id.
    /// Entries stay until the requester releases them via `unlock_point`.
    staged: Mutex<HashMap<(Rank, PointId), PointRef>>,
    state: AtomicU8,
    closing: AtomicBool,
    shutdown: Notify,
}

impl Inbox {
    /// Create an inbox serving from the given partition.
    #[must_use]
    pub fn new(partition: ArenaHandle<Partition>) -> Self {
        Self {
            partition,
            staged: Mutex::new(HashMap::new()),
            state: AtomicU8::new(STATE_IDLE),
            closing: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Current serve-loop state.
    #[must_use]
    pub fn state(&self) -> InboxState {
        match self.state.load(Ordering::Acquire) {
            STATE_SERVING => InboxState::Serving,
            _ => InboxState::Idle,
        }
    }

    /// Number of currently staged replies.
    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.staged.lock().len()
    }

    /// Alias-read a staged reply.
    ///
    /// Returns `None` if nothing is staged under that key; the requester
    /// must have observed the acknowledgment first.
    #[must_use]
    pub fn get_point(&self, requesting_rank: Rank, point_id: PointId) -> Option<PointRef> {
        self.staged.lock().get(&(requesting_rank, point_id)).cloned()
    }

    /// Release a staged reply once the requester is done with its alias.
    ///
    /// This is what keeps the staging buffer from growing without bound.
    /// Releasing an absent key is harmless: the same key staged twice emits
    /// two acknowledgments but holds one entry.
    pub fn unlock_point(&self, requesting_rank: Rank, point_id: PointId) {
        if self.staged.lock().remove(&(requesting_rank, point_id)).is_some() {
            tracing::trace!(requester = %requesting_rank, point = %point_id, "Unlocked point");
        }
    }

    /// Signal the serve loop to stop after the request in hand.
    pub fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Run the serve loop bound to the communicator triple.
    ///
    /// Receives fetch requests from any sender over the outbox-group
    /// communicator, stages the requested point, and acknowledges over the
    /// inbox-group communicator. The computation-group communicator is
    /// bound but carries only the consumer's own traffic.
    ///
    /// # Errors
    ///
    /// Returns (fatally) on a protocol violation: a request for a point
    /// this rank does not own means routing went wrong upstream.
    pub async fn run(
        &self,
        arena: &Arena,
        outbox_group: &dyn Communicator,
        inbox_group: &dyn Communicator,
        _computation_group: &dyn Communicator,
    ) -> Result<()> {
        let partition = arena.get(self.partition)?;
        self.state.store(STATE_SERVING, Ordering::Release);
        tracing::debug!(rank = %inbox_group.rank(), "Inbox serving");

        let result = self
            .serve_loop(&partition, outbox_group, inbox_group)
            .await;

        self.state.store(STATE_IDLE, Ordering::Release);
        tracing::debug!(rank = %inbox_group.rank(), "Inbox idle");
        result
    }

    async fn serve_loop(
        &self,
        partition: &Partition,
        outbox_group: &dyn Communicator,
        inbox_group: &dyn Communicator,
    ) -> Result<()> {
        loop {
            // Register for the shutdown wakeup before reading the flag so a
            // signal between the two is never missed.
            let mut shutdown = std::pin::pin!(self.shutdown.notified());
            shutdown.as_mut().enable();
            if self.closing.load(Ordering::SeqCst) {
                return Ok(());
            }
            let received = tokio::select! {
                _ = &mut shutdown => return Ok(()),
                received = outbox_group.recv_any_value::<FetchRequest>(MessageTag::RequestPoint) => received?,
            };
            let (src, request) = received;
            self.serve_one(partition, inbox_group, src, request).await?;
        }
    }

    /// Serve a single request: bounds-check, stage, acknowledge.
    async fn serve_one(
        &self,
        partition: &Partition,
        inbox_group: &dyn Communicator,
        src: Rank,
        request: FetchRequest,
    ) -> Result<()> {
        tracing::trace!(
            requester = %request.requesting_rank,
            point = %request.point_id,
            "Serving fetch request"
        );

        if request.point_id.as_usize() >= partition.n_entries() {
            tracing::error!(
                requester = %request.requesting_rank,
                point = %request.point_id,
                entry_count = partition.n_entries(),
                "Fetch request for a point this rank does not own"
            );
            return Err(StoreError::PointNotOwned {
                requesting_rank: request.requesting_rank,
                point_id: request.point_id,
                entry_count: partition.n_entries(),
            });
        }

        // Stage an alias of the owned point; the bounds check above makes
        // this lookup infallible.
        let point = partition.get(request.point_id)?;
        self.staged
            .lock()
            .insert((request.requesting_rank, request.point_id), point);

        // Acknowledge with a token; the requester alias-reads the staged
        // entry itself. The ack goes to the transport sender, not the rank
        // embedded in the request.
        inbox_group
            .send_value(src, MessageTag::ReceivePoint, &AckToken::new(request.point_id))
            .await
    }
}

impl std::fmt::Debug for Inbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("state", &self.state())
            .field("staged", &self.staged_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;
    use crate::comm::MemoryGroup;
    use crate::table::MemorySource;
    use crate::types::TableId;

    fn arena_with_partition(points: Vec<f64>, attrs: usize) -> (Arena, ArenaHandle<Partition>) {
        let arena = Arena::create(TableId::new(), &ArenaConfig::for_testing());
        let partition = Partition::load(&MemorySource::new(points, attrs)).unwrap();
        let handle = arena.construct(partition).unwrap();
        (arena, handle)
    }

    #[test]
    fn starts_idle_and_empty() {
        let (_, handle) = arena_with_partition(vec![1.0, 2.0], 2);
        let inbox = Inbox::new(handle);
        assert_eq!(inbox.state(), InboxState::Idle);
        assert_eq!(inbox.staged_count(), 0);
        assert!(inbox.get_point(Rank::new(0), PointId::new(0)).is_none());
    }

    #[tokio::test]
    async fn serves_and_stages_a_point() {
        let (arena, handle) = arena_with_partition(vec![1.0, 2.0, 3.0, 4.0], 2);
        let inbox = Inbox::new(handle);
        let partition = arena.get(handle).unwrap();

        let ack_comms = MemoryGroup::create(2);
        inbox
            .serve_one(
                &partition,
                &ack_comms[0],
                Rank::new(1),
                FetchRequest::new(Rank::new(1), PointId::new(1)),
            )
            .await
            .unwrap();

        // Ack went out to the requester.
        let (src, token): (Rank, AckToken) = ack_comms[1]
            .recv_any_value(MessageTag::ReceivePoint)
            .await
            .unwrap();
        assert_eq!(src, Rank::new(0));
        assert_eq!(token.point_id, PointId::new(1));

        // And the point is staged for aliasing.
        let staged = inbox.get_point(Rank::new(1), PointId::new(1)).unwrap();
        assert_eq!(staged.as_slice(), &[3.0, 4.0]);
    }

    #[tokio::test]
    async fn request_for_unowned_point_is_fatal() {
        let (arena, handle) = arena_with_partition(vec![1.0, 2.0], 2);
        let inbox = Inbox::new(handle);
        let partition = arena.get(handle).unwrap();

        let ack_comms = MemoryGroup::create(2);
        let err = inbox
            .serve_one(
                &partition,
                &ack_comms[0],
                Rank::new(1),
                FetchRequest::new(Rank::new(1), PointId::new(1)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E102");
        assert!(err.is_fatal());
        assert_eq!(inbox.staged_count(), 0);
    }

    #[test]
    fn unlock_releases_staging() {
        let (_, handle) = arena_with_partition(vec![1.0, 2.0], 2);
        let inbox = Inbox::new(handle);
        inbox
            .staged
            .lock()
            .insert((Rank::new(1), PointId::new(0)), PointRef::from_values(vec![1.0, 2.0]));

        inbox.unlock_point(Rank::new(1), PointId::new(0));
        assert_eq!(inbox.staged_count(), 0);

        // Idempotent.
        inbox.unlock_point(Rank::new(1), PointId::new(0));
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (arena, handle) = arena_with_partition(vec![1.0, 2.0], 2);
        let arena = std::sync::Arc::new(arena);
        let inbox = std::sync::Arc::new(Inbox::new(handle));

        let request_comms = MemoryGroup::create(1);
        let ack_comms = MemoryGroup::create(1);
        let compute_comms = MemoryGroup::create(1);

        let loop_inbox = std::sync::Arc::clone(&inbox);
        let loop_arena = std::sync::Arc::clone(&arena);
        let server = tokio::spawn(async move {
            loop_inbox
                .run(
                    &loop_arena,
                    &request_comms[0],
                    &ack_comms[0],
                    &compute_comms[0],
                )
                .await
        });

        tokio::task::yield_now().await;
        assert_eq!(inbox.state(), InboxState::Serving);

        inbox.shutdown();
        server.await.unwrap().unwrap();
        assert_eq!(inbox.state(), InboxState::Idle);
    }
}
