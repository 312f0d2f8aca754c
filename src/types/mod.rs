//! Core type definitions.
//!
//! Strongly-typed identifiers and the arena handle type used for every
//! cross-rank-visible reference.

mod handle;
mod ids;

pub use handle::ArenaHandle;
pub use ids::{PointId, Rank, TableId};
