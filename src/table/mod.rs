//! Table layer: the owned partition and the distributed facade.

mod distributed;
mod partition;

pub use distributed::{DistributedTable, TableConfig};
pub use partition::{LoadedPartition, MemorySource, Partition, PointRef, PointSource};
