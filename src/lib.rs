//! Distributed point table.
//!
//! This crate partitions a large point dataset across cooperating ranks,
//! builds one logical spatial index over the union of all partitions, and
//! lets any rank transparently fetch a point it does not own by issuing an
//! asynchronous request to the owning rank.
//!
//! # Key Components
//!
//! - **Arena**: shared slot-table storage; every cross-rank-visible object
//!   lives behind a stable [`ArenaHandle`](types::ArenaHandle)
//! - **Partition**: the immutable slice of the global point set owned and
//!   served by one rank
//! - **Inbox/Outbox**: server-side and client-side halves of the
//!   point-fetch mailbox protocol
//! - **DistributedTable**: the facade combining ownership routing, spatial
//!   index exposure, and lifecycle
//!
//! # Example
//!
//! ```ignore
//! use pointstore::prelude::*;
//!
//! let arena = Arc::new(Arena::create(TableId::new(), &ArenaConfig::default())?);
//! let source = MemorySource::new(points, 3);
//! let table = DistributedTable::init(arena, &source, &comm, &TableConfig::default()).await?;
//!
//! // Fetch a point regardless of which rank owns it.
//! let point = table.get(&request_comm, Rank::new(0), PointId::new(7)).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod comm;
pub mod error;
pub mod index;
pub mod mailbox;
pub mod prelude;
pub mod table;
pub mod types;

// Re-export key types at crate root for convenience
pub use arena::{Arena, ArenaArray, ArenaConfig};
pub use comm::{Communicator, CommunicatorExt, MemoryComm, MemoryGroup, MessageTag};
pub use error::{Result, StoreError};
pub use index::{EuclideanMetric, IndexBuilder, IndexNode, Metric, Region, StatSlot};
pub use mailbox::{AckToken, FetchRequest, Inbox, InboxState, Outbox};
pub use table::{DistributedTable, MemorySource, Partition, PointRef, PointSource, TableConfig};
pub use types::{ArenaHandle, PointId, Rank, TableId};
