//! Shared fixtures for integration tests.

#![allow(dead_code)]

use pointstore::prelude::*;
use std::sync::{Arc, Once};
use tokio::task::JoinHandle;

static TRACING: Once = Once::new();

/// Install the test tracing subscriber once per process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic attribute value for `(rank, point, attr)`.
pub fn value_of(rank: u32, point: u32, attr: u32) -> f64 {
    f64::from(rank * 100 + point * 10 + attr)
}

/// One rank's flat row-major value block.
pub fn partition_values(rank: u32, n_points: u32, n_attributes: u32) -> Vec<f64> {
    let mut values = Vec::with_capacity((n_points * n_attributes) as usize);
    for point in 0..n_points {
        for attr in 0..n_attributes {
            values.push(value_of(rank, point, attr));
        }
    }
    values
}

/// A range-splitting tree builder: splits the point id range in half until
/// ranges fit the leaf size, bounding each node by its covered points.
pub struct RangeSplitBuilder {
    pub leaf_size: usize,
}

impl RangeSplitBuilder {
    fn node(&self, partition: &Partition, begin: usize, count: usize) -> Result<Arc<IndexNode>> {
        let mut region = Region::empty(partition.n_attributes());
        for i in begin..begin + count {
            region.expand_to(&partition.get(PointId::new(i as u32))?);
        }
        if count <= self.leaf_size {
            return Ok(Arc::new(IndexNode::leaf(region, begin, count)));
        }
        let half = count / 2;
        let left = self.node(partition, begin, half)?;
        let right = self.node(partition, begin + half, count - half)?;
        Ok(Arc::new(IndexNode::internal(region, begin, count, left, right)))
    }
}

impl IndexBuilder for RangeSplitBuilder {
    fn build(
        &self,
        partition: &Partition,
        _metric: &dyn Metric,
        _sample_probability: f64,
    ) -> Result<Arc<IndexNode>> {
        self.node(partition, 0, partition.n_entries())
    }
}

/// One rank of a running test cluster: its table, the communicator its
/// fetches go out on, and the spawned mailbox loops.
pub struct ClusterRank {
    pub table: Arc<DistributedTable>,
    pub request_comm: MemoryComm,
    inbox_task: JoinHandle<Result<()>>,
    outbox_task: JoinHandle<Result<()>>,
}

/// A whole in-process cluster: shared arena, one table per rank, inbox and
/// outbox loops running on every rank.
pub struct Cluster {
    pub arena: Arc<Arena>,
    pub ranks: Vec<ClusterRank>,
}

impl Cluster {
    /// Initialize and launch a cluster with the given per-rank partitions.
    pub async fn launch(partitions: Vec<Vec<f64>>, n_attributes: usize) -> Self {
        init_tracing();
        let size = partitions.len() as u32;
        let arena = Arc::new(Arena::create(TableId::new(), &ArenaConfig::default()));

        let gather = MemoryGroup::create(size);
        let outbox_comms = MemoryGroup::create(size);
        let inbox_comms = MemoryGroup::create(size);
        let compute_comms = MemoryGroup::create(size);

        // The init gather is collective, so every rank runs concurrently.
        let mut init_tasks = Vec::new();
        for (comm, values) in gather.into_iter().zip(partitions) {
            let arena = Arc::clone(&arena);
            init_tasks.push(tokio::spawn(async move {
                let source = MemorySource::new(values, n_attributes);
                DistributedTable::init(arena, &source, &comm, &TableConfig::for_testing()).await
            }));
        }
        let mut tables = Vec::new();
        for task in init_tasks {
            tables.push(Arc::new(task.await.unwrap().unwrap()));
        }

        let mut ranks = Vec::new();
        for (i, table) in tables.into_iter().enumerate() {
            let inbox_task = {
                let table = Arc::clone(&table);
                let ob = outbox_comms[i].clone();
                let ib = inbox_comms[i].clone();
                let cg = compute_comms[i].clone();
                tokio::spawn(async move { table.run_inbox(&ob, &ib, &cg).await })
            };
            let outbox_task = {
                let table = Arc::clone(&table);
                let ob = outbox_comms[i].clone();
                let ib = inbox_comms[i].clone();
                let cg = compute_comms[i].clone();
                tokio::spawn(async move { table.run_outbox(&ob, &ib, &cg).await })
            };
            ranks.push(ClusterRank {
                table,
                request_comm: outbox_comms[i].clone(),
                inbox_task,
                outbox_task,
            });
        }

        Self { arena, ranks }
    }

    /// Fetch `(owner, point)` from the perspective of rank `from`.
    pub async fn get(&self, from: usize, owner: u32, point: u32) -> Result<PointRef> {
        self.ranks[from]
            .table
            .get(
                &self.ranks[from].request_comm,
                Rank::new(owner),
                PointId::new(point),
            )
            .await
    }

    /// Stop every mailbox loop and return the tables for post-run checks.
    pub async fn shutdown(self) -> Vec<Arc<DistributedTable>> {
        for rank in &self.ranks {
            rank.table.shutdown().unwrap();
        }
        let mut tables = Vec::new();
        for rank in self.ranks {
            rank.inbox_task.await.unwrap().unwrap();
            rank.outbox_task.await.unwrap().unwrap();
            tables.push(rank.table);
        }
        tables
    }
}
