//! The local partition: the slice of the global point set owned by one rank.

use crate::error::{Result, StoreError};
use crate::types::PointId;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A loaded shard of points, as produced by a [`PointSource`].
pub struct LoadedPartition {
    /// Point values, row-major: entry `i` occupies
    /// `[i * n_attributes, (i + 1) * n_attributes)`.
    pub values: Vec<f64>,
    /// Number of attributes per point, shared across the whole table.
    pub n_attributes: usize,
}

/// Source of this rank's shard of points.
///
/// File formats and parsing live behind this boundary; the table only needs
/// the loaded values and their shape.
pub trait PointSource: Sync {
    /// Load the partition owned by this rank.
    ///
    /// # Errors
    ///
    /// Implementations report load failures through [`StoreError`]; any
    /// failure here is fatal to initialization.
    fn load_partition(&self) -> Result<LoadedPartition>;
}

/// A point source backed by rows already in memory.
///
/// The in-crate source for tests and single-host jobs, in the same spirit
/// as an in-memory queue backend.
pub struct MemorySource {
    values: Vec<f64>,
    n_attributes: usize,
}

impl MemorySource {
    /// Create a source from a flat row-major value block.
    ///
    /// # Panics
    ///
    /// Panics if `values.len()` is not a multiple of `n_attributes`; that is
    /// a malformed fixture, not a runtime condition.
    #[must_use]
    pub fn new(values: Vec<f64>, n_attributes: usize) -> Self {
        assert!(n_attributes > 0);
        assert_eq!(values.len() % n_attributes, 0);
        Self {
            values,
            n_attributes,
        }
    }

    /// Create a source from per-point rows.
    #[must_use]
    pub fn from_rows(rows: Vec<Vec<f64>>, n_attributes: usize) -> Self {
        let mut values = Vec::with_capacity(rows.len() * n_attributes);
        for row in &rows {
            assert_eq!(row.len(), n_attributes);
            values.extend_from_slice(row);
        }
        Self::new(values, n_attributes)
    }
}

impl PointSource for MemorySource {
    fn load_partition(&self) -> Result<LoadedPartition> {
        Ok(LoadedPartition {
            values: self.values.clone(),
            n_attributes: self.n_attributes,
        })
    }
}

/// The ordered set of points owned by one rank.
///
/// Immutable after load: points are created once when the partition is
/// loaded, never mutated, and destroyed only when the partition is torn
/// down. Reads hand out [`PointRef`] aliases into the shared block, no
/// copies.
pub struct Partition {
    values: Arc<[f64]>,
    n_attributes: usize,
    n_entries: usize,
}

impl Partition {
    /// Build the partition from a source's loaded shard.
    ///
    /// # Errors
    ///
    /// Propagates the source's load failure.
    pub fn load(source: &dyn PointSource) -> Result<Self> {
        let loaded = source.load_partition()?;
        let n_entries = loaded.values.len() / loaded.n_attributes;
        tracing::debug!(
            n_entries,
            n_attributes = loaded.n_attributes,
            "Loaded partition"
        );
        Ok(Self {
            values: loaded.values.into(),
            n_attributes: loaded.n_attributes,
            n_entries,
        })
    }

    /// Number of points in this partition.
    #[must_use]
    pub fn n_entries(&self) -> usize {
        self.n_entries
    }

    /// Number of attributes per point.
    #[must_use]
    pub fn n_attributes(&self) -> usize {
        self.n_attributes
    }

    /// Get a point by id, as a no-copy alias into the partition block.
    ///
    /// # Errors
    ///
    /// `IndexOutOfRange` if `point_id` is not in `[0, n_entries)`. Never
    /// clamped: an out-of-range id is a programming error upstream.
    pub fn get(&self, point_id: PointId) -> Result<PointRef> {
        if point_id.as_usize() >= self.n_entries {
            return Err(StoreError::IndexOutOfRange {
                point_id,
                entry_count: self.n_entries,
            });
        }
        Ok(PointRef {
            block: Arc::clone(&self.values),
            start: point_id.as_usize() * self.n_attributes,
            len: self.n_attributes,
        })
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("n_entries", &self.n_entries)
            .field("n_attributes", &self.n_attributes)
            .finish()
    }
}

/// A non-owning alias of one point's attribute vector.
///
/// Points physically live in a partition block or an inbox staging entry;
/// a `PointRef` is a cheap handle onto that storage. Cloning shares the
/// underlying block.
#[derive(Clone)]
pub struct PointRef {
    block: Arc<[f64]>,
    start: usize,
    len: usize,
}

impl PointRef {
    /// Build an alias over a standalone value block. Used by the inbox when
    /// staging and by tests.
    #[must_use]
    pub fn from_values(values: Vec<f64>) -> Self {
        let len = values.len();
        Self {
            block: values.into(),
            start: 0,
            len,
        }
    }

    /// The point's attribute values.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.block[self.start..self.start + self.len]
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the point has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for PointRef {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        self.as_slice()
    }
}

impl PartialEq for PointRef {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl fmt::Debug for PointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_points() -> Partition {
        let source = MemorySource::new(vec![0.0, 0.1, 1.0, 1.1, 2.0, 2.1], 2);
        Partition::load(&source).unwrap()
    }

    #[test]
    fn load_records_shape() {
        let partition = three_points();
        assert_eq!(partition.n_entries(), 3);
        assert_eq!(partition.n_attributes(), 2);
    }

    #[test]
    fn get_aliases_without_copy() {
        let partition = three_points();
        let point = partition.get(PointId::new(1)).unwrap();
        assert_eq!(point.as_slice(), &[1.0, 1.1]);
        assert_eq!(point.len(), 2);

        // Clones alias the same block.
        let again = partition.get(PointId::new(1)).unwrap();
        assert_eq!(point, again);
    }

    #[test]
    fn first_out_of_range_id_fails() {
        let partition = three_points();
        let err = partition.get(PointId::new(3)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::IndexOutOfRange {
                entry_count: 3,
                ..
            }
        ));
        assert_eq!(err.code(), "E103");
    }

    #[test]
    fn empty_partition() {
        let source = MemorySource::new(vec![], 4);
        let partition = Partition::load(&source).unwrap();
        assert_eq!(partition.n_entries(), 0);
        assert!(partition.get(PointId::new(0)).is_err());
    }

    #[test]
    fn from_rows_flattens() {
        let source = MemorySource::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]], 2);
        let partition = Partition::load(&source).unwrap();
        assert_eq!(partition.get(PointId::new(1)).unwrap().as_slice(), &[3.0, 4.0]);
    }

    #[test]
    fn point_ref_deref() {
        let point = PointRef::from_values(vec![1.0, 2.0, 3.0]);
        assert_eq!(point.iter().sum::<f64>(), 6.0);
        assert!(!point.is_empty());
    }
}
