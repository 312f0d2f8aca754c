//! Error types for the distributed point table.
//!
//! All errors carry a stable code and the identifiers needed to locate the
//! failing rank or handle. Most conditions in this core indicate routing or
//! partitioning bugs rather than recoverable runtime states and are fatal;
//! the exception is [`StoreError::Unindexed`], which a consumer may probe
//! for before the spatial index is built.

use crate::types::{PointId, Rank};
use thiserror::Error;

/// The main error type for point-store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    // =========================================================================
    // Arena Errors (E001-E099)
    // =========================================================================
    /// The arena slot budget is exhausted.
    ///
    /// The arena is sized for the whole job at startup; there is no dynamic
    /// growth, so this terminates the process.
    #[error("E001: Arena capacity exceeded: {live} live objects, capacity {capacity}")]
    ArenaCapacity {
        /// Number of live objects currently in the arena.
        live: usize,
        /// Maximum number of objects the arena can hold.
        capacity: usize,
    },

    /// A handle refers to a slot that was destroyed or never allocated.
    #[error("E002: Stale arena handle: slot {index} generation {generation}")]
    StaleHandle {
        /// The slot index of the stale handle.
        index: u32,
        /// The generation recorded in the handle.
        generation: u32,
    },

    /// A handle resolved to an object of a different type.
    #[error("E003: Arena handle type mismatch at slot {index}: expected {expected}")]
    HandleType {
        /// The slot index that was resolved.
        index: u32,
        /// The type the caller expected to find.
        expected: &'static str,
    },

    // =========================================================================
    // Addressing Errors (E101-E199)
    // =========================================================================
    /// A rank outside the communicator group was addressed.
    #[error("E101: Invalid rank {rank}: group size is {group_size}")]
    InvalidRank {
        /// The out-of-group rank.
        rank: Rank,
        /// The size of the communicator group.
        group_size: u32,
    },

    /// A fetch request arrived for a point the receiving rank does not own.
    ///
    /// Routing is the outbox's responsibility; a mis-routed request is a
    /// protocol violation upstream, not a recoverable condition.
    #[error(
        "E102: Rank {requesting_rank} requested {point_id} which is outside this \
         partition of {entry_count} points"
    )]
    PointNotOwned {
        /// The rank that issued the mis-routed request.
        requesting_rank: Rank,
        /// The requested point id.
        point_id: PointId,
        /// The entry count of the receiving partition.
        entry_count: usize,
    },

    /// A point id outside the partition bounds was dereferenced locally.
    #[error("E103: {point_id} out of range: partition holds {entry_count} points")]
    IndexOutOfRange {
        /// The out-of-range point id.
        point_id: PointId,
        /// The entry count of the partition.
        entry_count: usize,
    },

    // =========================================================================
    // Index Errors (E201-E299)
    // =========================================================================
    /// A spatial-index accessor was called before `index_data` succeeded.
    ///
    /// This is the one catchable condition in the taxonomy: consumers may
    /// legitimately probe `is_indexed()` first.
    #[error("E201: Spatial index accessed before index_data")]
    Unindexed,

    /// The external index builder failed to construct the tree.
    #[error("E202: Index construction failed: {cause}")]
    IndexBuild {
        /// Reason reported by the builder.
        cause: String,
    },

    // =========================================================================
    // Communicator Errors (E301-E399)
    // =========================================================================
    /// A communicator channel closed while a send or receive was pending.
    #[error("E301: Channel to {peer} closed")]
    ChannelClosed {
        /// The peer whose channel closed.
        peer: Rank,
    },

    /// A wire payload failed to encode or decode.
    #[error("E302: Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Get the error code (e.g., "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ArenaCapacity { .. } => "E001",
            Self::StaleHandle { .. } => "E002",
            Self::HandleType { .. } => "E003",
            Self::InvalidRank { .. } => "E101",
            Self::PointNotOwned { .. } => "E102",
            Self::IndexOutOfRange { .. } => "E103",
            Self::Unindexed => "E201",
            Self::IndexBuild { .. } => "E202",
            Self::ChannelClosed { .. } => "E301",
            Self::Serialization(_) => "E302",
        }
    }

    /// Check if this error is process-fatal.
    ///
    /// Everything except [`StoreError::Unindexed`] indicates a bug in
    /// routing, partitioning, or sizing and terminates the job.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Unindexed)
    }

    /// Check if this error is an addressing error (bad rank or routing).
    #[must_use]
    pub fn is_addressing(&self) -> bool {
        matches!(self, Self::InvalidRank { .. } | Self::PointNotOwned { .. })
    }
}

/// Result type alias using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
