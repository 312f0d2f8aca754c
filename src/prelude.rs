//! Prelude for convenient imports.
//!
//! This module re-exports the most commonly used types and traits.
//!
//! # Example
//!
//! ```ignore
//! use pointstore::prelude::*;
//! ```

// Core types
pub use crate::types::{ArenaHandle, PointId, Rank, TableId};

// Error handling
pub use crate::error::{Result, StoreError};

// Arena
pub use crate::arena::{Arena, ArenaArray, ArenaConfig};

// Communicator boundary
pub use crate::comm::{Communicator, CommunicatorExt, MemoryComm, MemoryGroup, MessageTag};

// Table layer
pub use crate::table::{
    DistributedTable, LoadedPartition, MemorySource, Partition, PointRef, PointSource, TableConfig,
};

// Mailbox protocol
pub use crate::mailbox::{AckToken, FetchRequest, Inbox, InboxState, Outbox};

// Spatial index boundary
pub use crate::index::{EuclideanMetric, IndexBuilder, IndexNode, Metric, Region, StatSlot};
