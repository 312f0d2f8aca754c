//! Spatial index collaborator boundary.
//!
//! The table stores and exposes one spatial tree over its owned partition,
//! but tree construction and traversal are delegated: an external
//! [`IndexBuilder`] produces the tree, the table only holds the root and
//! hands out node accessors. Everything here is the vocabulary of that
//! boundary, not an indexing algorithm.

use crate::error::Result;
use crate::table::Partition;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An axis-aligned bounding box over attribute space.
#[derive(Clone, PartialEq)]
pub struct Region {
    lo: Vec<f64>,
    hi: Vec<f64>,
}

impl Region {
    /// Create an empty region of the given dimensionality.
    ///
    /// Empty means inverted bounds: expanding with the first point snaps
    /// both bounds to it.
    #[must_use]
    pub fn empty(dim: usize) -> Self {
        Self {
            lo: vec![f64::INFINITY; dim],
            hi: vec![f64::NEG_INFINITY; dim],
        }
    }

    /// Create a region from explicit bounds.
    ///
    /// # Panics
    ///
    /// Panics if the bound vectors differ in length; that is a malformed
    /// builder, not a runtime condition.
    #[must_use]
    pub fn from_bounds(lo: Vec<f64>, hi: Vec<f64>) -> Self {
        assert_eq!(lo.len(), hi.len());
        Self { lo, hi }
    }

    /// Dimensionality of the region.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.lo.len()
    }

    /// Lower bound per dimension.
    #[must_use]
    pub fn lo(&self) -> &[f64] {
        &self.lo
    }

    /// Upper bound per dimension.
    #[must_use]
    pub fn hi(&self) -> &[f64] {
        &self.hi
    }

    /// Grow the region to cover a point.
    pub fn expand_to(&mut self, point: &[f64]) {
        debug_assert_eq!(point.len(), self.dim());
        for (d, &value) in point.iter().enumerate() {
            if value < self.lo[d] {
                self.lo[d] = value;
            }
            if value > self.hi[d] {
                self.hi[d] = value;
            }
        }
    }

    /// Check whether a point lies inside the region (bounds inclusive).
    #[must_use]
    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.dim()
            && point
                .iter()
                .enumerate()
                .all(|(d, &v)| self.lo[d] <= v && v <= self.hi[d])
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("lo", &self.lo)
            .field("hi", &self.hi)
            .finish()
    }
}

/// Distance function over attribute vectors.
pub trait Metric: Send + Sync {
    /// Squared distance between two points.
    fn distance_sq(&self, a: &[f64], b: &[f64]) -> f64;

    /// Distance between two points.
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.distance_sq(a, b).sqrt()
    }
}

/// The standard L2 metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMetric;

impl Metric for EuclideanMetric {
    fn distance_sq(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }
}

/// An opaque per-node statistic slot.
///
/// Traversal algorithms attach their own summaries (centroids, pruning
/// bounds) to tree nodes; the table neither reads nor interprets them. The
/// slot is type-erased and interior-mutable so a shared tree can carry
/// mutable statistics.
#[derive(Default)]
pub struct StatSlot {
    value: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl StatSlot {
    /// Create an unset slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a statistic has been attached.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Attach a statistic, replacing any previous one.
    pub fn set<T: Any + Send + Sync>(&self, value: T) {
        *self.value.lock() = Some(Box::new(value));
    }

    /// Read the statistic under the slot lock.
    ///
    /// Returns `None` if the slot is unset or holds a different type.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.value.lock();
        guard.as_ref().and_then(|v| v.downcast_ref::<T>()).map(f)
    }

    /// Clear the slot.
    pub fn clear(&self) {
        *self.value.lock() = None;
    }
}

impl fmt::Debug for StatSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatSlot")
            .field("set", &self.is_set())
            .finish()
    }
}

/// One node of the spatial tree.
///
/// Nodes cover the contiguous point range `[begin, begin + count)` of the
/// owned partition. An internal node's children partition its range.
pub struct IndexNode {
    region: Region,
    begin: usize,
    count: usize,
    stat: StatSlot,
    left: Option<Arc<IndexNode>>,
    right: Option<Arc<IndexNode>>,
}

impl IndexNode {
    /// Create a leaf covering `[begin, begin + count)`.
    #[must_use]
    pub fn leaf(region: Region, begin: usize, count: usize) -> Self {
        Self {
            region,
            begin,
            count,
            stat: StatSlot::new(),
            left: None,
            right: None,
        }
    }

    /// Create an internal node over two children.
    #[must_use]
    pub fn internal(
        region: Region,
        begin: usize,
        count: usize,
        left: Arc<IndexNode>,
        right: Arc<IndexNode>,
    ) -> Self {
        Self {
            region,
            begin,
            count,
            stat: StatSlot::new(),
            left: Some(left),
            right: Some(right),
        }
    }

    /// The node's bounding region.
    #[must_use]
    pub fn bound(&self) -> &Region {
        &self.region
    }

    /// First point id covered by this node.
    #[must_use]
    pub fn begin(&self) -> usize {
        self.begin
    }

    /// Number of points covered by this node.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// The node's statistic slot.
    #[must_use]
    pub fn stat(&self) -> &StatSlot {
        &self.stat
    }

    /// Check whether the node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Left child, if any.
    #[must_use]
    pub fn left(&self) -> Option<&Arc<IndexNode>> {
        self.left.as_ref()
    }

    /// Right child, if any.
    #[must_use]
    pub fn right(&self) -> Option<&Arc<IndexNode>> {
        self.right.as_ref()
    }
}

impl fmt::Debug for IndexNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexNode")
            .field("begin", &self.begin)
            .field("count", &self.count)
            .field("leaf", &self.is_leaf())
            .finish()
    }
}

/// External tree construction.
///
/// Implementations own splitting strategy, leaf sizing, and any sampling;
/// the table hands them the partition and stores whatever root they return.
pub trait IndexBuilder: Send + Sync {
    /// Build a tree over the partition.
    ///
    /// `sample_probability` in `(0, 1]` asks the builder to construct the
    /// tree from a sample of that fraction of the points; `1.0` means all
    /// of them. How (and whether) sampling is honored is up to the builder.
    ///
    /// # Errors
    ///
    /// `IndexBuild` if construction fails.
    fn build(
        &self,
        partition: &Partition,
        metric: &dyn Metric,
        sample_probability: f64,
    ) -> Result<Arc<IndexNode>>;
}
