//! The distributed table facade.

use crate::arena::{Arena, ArenaArray};
use crate::comm::{Communicator, CommunicatorExt};
use crate::error::{Result, StoreError};
use crate::index::{IndexBuilder, IndexNode, Metric};
use crate::mailbox::{Inbox, Outbox};
use crate::table::{Partition, PointRef, PointSource};
use crate::types::{ArenaHandle, PointId, Rank};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Configuration for table initialization.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Milliseconds between diagnostics while a point fetch awaits its
    /// acknowledgment.
    pub ack_warn_interval_ms: u64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            ack_warn_interval_ms: crate::mailbox::DEFAULT_ACK_WARN_INTERVAL_MS,
        }
    }
}

impl TableConfig {
    /// Create a configuration with short intervals for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            ack_warn_interval_ms: 50,
        }
    }

    /// Set the acknowledgment diagnostic interval.
    #[must_use]
    pub fn with_ack_warn_interval_ms(mut self, ms: u64) -> Self {
        self.ack_warn_interval_ms = ms;
        self
    }
}

/// One rank's view of the partitioned point set.
///
/// Combines the locally owned [`Partition`], both mailbox halves, the
/// gathered per-rank bookkeeping, and the spatial index into a single
/// facade: callers ask for any point by `(owner_rank, point_id)` and the
/// table routes the access, locally or over the wire.
///
/// # Lifecycle
///
/// `init` is a collective: every rank in the gather group must call it
/// concurrently. It loads the owned partition, places partition and
/// mailboxes in the shared arena, and all-gathers two arrays: the per-rank
/// entry counts and the mailbox directory of inbox handles. The directory
/// is what lets a requester alias-read a reply staged in a remote rank's
/// inbox through the shared arena.
///
/// Teardown releases arena objects in a fixed order: inbox, outbox,
/// entry-count array, mailbox directory, owned partition, then the index
/// tree. The mailboxes go first so no serve loop can touch a partition
/// that is already gone.
pub struct DistributedTable {
    arena: Arc<Arena>,
    my_rank: Rank,
    group_size: u32,
    n_entries: usize,
    n_attributes: usize,
    partition: ArenaHandle<Partition>,
    inbox: ArenaHandle<Inbox>,
    outbox: ArenaHandle<Outbox>,
    entry_counts: ArenaHandle<ArenaArray<usize>>,
    directory: ArenaHandle<ArenaArray<ArenaHandle<Inbox>>>,
    root: Mutex<Option<Arc<IndexNode>>>,
    destroyed: AtomicBool,
}

impl DistributedTable {
    /// Initialize this rank's table. Collective over `gather_comm`.
    ///
    /// The spatial index is left unbuilt; see [`DistributedTable::index_data`].
    ///
    /// # Errors
    ///
    /// Source load failures, arena exhaustion, and communicator failures
    /// are all fatal to initialization.
    pub async fn init(
        arena: Arc<Arena>,
        source: &dyn PointSource,
        gather_comm: &dyn Communicator,
        config: &TableConfig,
    ) -> Result<Self> {
        let my_rank = gather_comm.rank();
        let group_size = gather_comm.size();

        let partition = Partition::load(source)?;
        let n_entries = partition.n_entries();
        let n_attributes = partition.n_attributes();
        let partition = arena.construct(partition)?;

        let inbox = arena.construct(Inbox::new(partition))?;
        let outbox = arena.construct(Outbox::with_warn_interval(
            my_rank,
            partition,
            config.ack_warn_interval_ms,
        ))?;

        let counts = gather_comm.all_gather(&n_entries).await?;
        let entry_counts = arena.construct_array(counts)?;

        let handles = gather_comm.all_gather(&inbox).await?;
        let directory = arena.construct_array(handles)?;

        tracing::info!(
            rank = %my_rank,
            group_size,
            n_entries,
            n_attributes,
            table_id = %arena.table_id(),
            "Initialized distributed table"
        );

        Ok(Self {
            arena,
            my_rank,
            group_size,
            n_entries,
            n_attributes,
            partition,
            inbox,
            outbox,
            entry_counts,
            directory,
            root: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    /// This rank within the gather group.
    #[must_use]
    pub fn rank(&self) -> Rank {
        self.my_rank
    }

    /// Number of ranks sharing the table.
    #[must_use]
    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    /// Number of points owned by this rank.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.n_entries
    }

    /// Number of attributes per point, uniform across the whole table.
    #[must_use]
    pub fn n_attributes(&self) -> usize {
        self.n_attributes
    }

    /// Number of points owned by an arbitrary rank, answered from the
    /// gathered entry-count array without messaging.
    ///
    /// # Errors
    ///
    /// `InvalidRank` if `rank` is outside the group.
    pub fn entry_count_of(&self, rank: Rank) -> Result<usize> {
        let counts = self.arena.get(self.entry_counts)?;
        counts
            .get(rank.as_usize())
            .copied()
            .ok_or(StoreError::InvalidRank {
                rank,
                group_size: self.group_size,
            })
    }

    /// Fetch a point by `(owner_rank, point_id)`, routing by ownership.
    ///
    /// Locally owned points are read straight from the partition; remote
    /// points go through the outbox protocol and come back as aliases of
    /// the owner's staged reply. Either way the returned values are exactly
    /// the owner's partition values.
    ///
    /// # Errors
    ///
    /// `InvalidRank`, `IndexOutOfRange`, or a communicator failure. A call
    /// either yields the point or fails fatally, never stale data.
    pub async fn get(
        &self,
        request_comm: &dyn Communicator,
        owner_rank: Rank,
        point_id: PointId,
    ) -> Result<PointRef> {
        // Routing is validated here against the gathered entry counts, so a
        // bad point id fails on the requester instead of arriving at the
        // owner's inbox as a protocol violation.
        let entry_count = self.entry_count_of(owner_rank)?;
        if point_id.as_usize() >= entry_count {
            return Err(StoreError::IndexOutOfRange {
                point_id,
                entry_count,
            });
        }
        let outbox = self.arena.get(self.outbox)?;
        let directory = self.arena.get(self.directory)?;
        outbox
            .fetch(&self.arena, request_comm, &directory, owner_rank, point_id)
            .await
    }

    /// Release a previously fetched remote point from the owner's staging
    /// buffer, resolved through the mailbox directory.
    ///
    /// # Errors
    ///
    /// `InvalidRank` if `owner_rank` is outside the group; `StaleHandle` if
    /// the owner's inbox has been torn down.
    pub fn unlock_point(&self, owner_rank: Rank, point_id: PointId) -> Result<()> {
        let directory = self.arena.get(self.directory)?;
        let handle = directory
            .get(owner_rank.as_usize())
            .copied()
            .ok_or(StoreError::InvalidRank {
                rank: owner_rank,
                group_size: self.group_size,
            })?;
        let inbox = self.arena.get(handle)?;
        inbox.unlock_point(self.my_rank, point_id);
        Ok(())
    }

    /// Check whether the spatial index has been built.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.root.lock().is_some()
    }

    /// Build the spatial index over the owned partition via the external
    /// builder. Replaces any previous tree.
    ///
    /// # Errors
    ///
    /// `IndexBuild` if the builder fails; the table stays unindexed.
    pub fn index_data(
        &self,
        builder: &dyn IndexBuilder,
        metric: &dyn Metric,
        sample_probability: f64,
    ) -> Result<()> {
        let partition = self.arena.get(self.partition)?;
        let root = builder.build(&partition, metric, sample_probability)?;
        tracing::info!(
            rank = %self.my_rank,
            n_entries = self.n_entries,
            sample_probability,
            "Built spatial index"
        );
        *self.root.lock() = Some(root);
        Ok(())
    }

    /// The root of the spatial tree.
    ///
    /// # Errors
    ///
    /// `Unindexed` before a successful [`DistributedTable::index_data`],
    /// the one catchable error in the taxonomy.
    pub fn root(&self) -> Result<Arc<IndexNode>> {
        self.root.lock().clone().ok_or(StoreError::Unindexed)
    }

    /// Run the inbox serve loop bound to the communicator triple.
    ///
    /// Typically spawned once per rank and left running for the job's
    /// lifetime; exits on [`DistributedTable::shutdown`] or a fatal
    /// protocol violation.
    ///
    /// # Errors
    ///
    /// See [`Inbox::run`].
    pub async fn run_inbox(
        &self,
        outbox_group: &dyn Communicator,
        inbox_group: &dyn Communicator,
        computation_group: &dyn Communicator,
    ) -> Result<()> {
        let inbox = self.arena.get(self.inbox)?;
        inbox
            .run(&self.arena, outbox_group, inbox_group, computation_group)
            .await
    }

    /// Run the outbox acknowledgment router bound to the communicator
    /// triple.
    ///
    /// # Errors
    ///
    /// See [`Outbox::run`].
    pub async fn run_outbox(
        &self,
        outbox_group: &dyn Communicator,
        inbox_group: &dyn Communicator,
        computation_group: &dyn Communicator,
    ) -> Result<()> {
        let outbox = self.arena.get(self.outbox)?;
        outbox
            .run(outbox_group, inbox_group, computation_group)
            .await
    }

    /// Signal both mailbox loops to stop.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the mailboxes have already been torn down.
    pub fn shutdown(&self) -> Result<()> {
        self.arena.get(self.inbox)?.shutdown();
        self.arena.get(self.outbox)?.shutdown();
        Ok(())
    }

    /// Persist the table to disk.
    ///
    /// Intentionally a no-op: the table is reconstructed from its point
    /// source on every run, and the interface slot is kept so callers can
    /// hold a uniform table API.
    ///
    /// # Errors
    ///
    /// None currently.
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::debug!(rank = %self.my_rank, path = %path.display(), "save is a no-op");
        Ok(())
    }

    /// Tear down this rank's arena objects, in order: inbox, outbox,
    /// entry-count array, mailbox directory, owned partition, index tree.
    ///
    /// After this call every handle the table published is stale; in
    /// particular a remote rank resolving this rank's inbox through its
    /// directory gets `StaleHandle` instead of a half-dead mailbox.
    /// Idempotent: a second call does nothing.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if an arena slot was released out from under the
    /// table.
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(rank = %self.my_rank, "Tearing down distributed table");
        self.arena.destroy(self.inbox)?;
        self.arena.destroy(self.outbox)?;
        self.arena.destroy(self.entry_counts)?;
        self.arena.destroy(self.directory)?;
        self.arena.destroy(self.partition)?;
        *self.root.lock() = None;
        Ok(())
    }
}

impl Drop for DistributedTable {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::warn!(rank = %self.my_rank, error = %e, "Teardown failure in drop");
        }
    }
}

impl std::fmt::Debug for DistributedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedTable")
            .field("rank", &self.my_rank)
            .field("group_size", &self.group_size)
            .field("n_entries", &self.n_entries)
            .field("n_attributes", &self.n_attributes)
            .field("indexed", &self.is_indexed())
            .finish()
    }
}
