//! Slot-table arena implementation.

use crate::error::{Result, StoreError};
use crate::types::{ArenaHandle, TableId};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::Arc;

/// Default arena capacity: 4096 objects.
pub const DEFAULT_ARENA_CAPACITY: usize = 4096;

/// Configuration for arena creation.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Maximum number of live objects the arena can hold.
    pub capacity: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_ARENA_CAPACITY,
        }
    }
}

impl ArenaConfig {
    /// Create a small configuration for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self { capacity: 64 }
    }

    /// Set a custom capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// One slot in the arena lookup table.
struct Slot {
    /// Generation of the current occupant; incremented on every reuse so
    /// stale handles never resolve.
    generation: u32,
    value: Option<Arc<dyn Any + Send + Sync>>,
}

/// The shared arena.
///
/// A fixed-capacity table of type-erased slots. `construct` places an object
/// and returns a typed [`ArenaHandle`]; `get` resolves a handle back to a
/// shared reference; `destroy` releases the slot (the object is dropped when
/// the last outstanding alias goes away).
pub struct Arena {
    table_id: TableId,
    slots: RwLock<Vec<Slot>>,
    free: Mutex<Vec<u32>>,
    capacity: usize,
}

impl Arena {
    /// Create an arena for the given table.
    #[must_use]
    pub fn create(table_id: TableId, config: &ArenaConfig) -> Self {
        tracing::debug!(table_id = %table_id, capacity = config.capacity, "Created arena");
        Self {
            table_id,
            slots: RwLock::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            capacity: config.capacity,
        }
    }

    /// Get the table ID this arena belongs to.
    #[must_use]
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Get the maximum number of live objects.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of live objects.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|s| s.value.is_some())
            .count()
    }

    /// Allocate and place one object, returning a typed handle.
    ///
    /// # Errors
    ///
    /// `ArenaCapacity` if the slot budget is exhausted. Fatal: the arena is
    /// sized for the whole job at startup.
    pub fn construct<T: Send + Sync + 'static>(&self, value: T) -> Result<ArenaHandle<T>> {
        let boxed: Arc<dyn Any + Send + Sync> = Arc::new(value);
        let mut slots = self.slots.write();

        if let Some(index) = self.free.lock().pop() {
            let slot = &mut slots[index as usize];
            slot.generation += 1;
            slot.value = Some(boxed);
            return Ok(ArenaHandle::from_raw(index, slot.generation));
        }

        if slots.len() >= self.capacity {
            return Err(StoreError::ArenaCapacity {
                live: slots.len(),
                capacity: self.capacity,
            });
        }

        let index = slots.len() as u32;
        slots.push(Slot {
            generation: 1,
            value: Some(boxed),
        });
        Ok(ArenaHandle::from_raw(index, 1))
    }

    /// Allocate a fixed-length array of objects.
    ///
    /// The array is immutable once constructed; this is how per-rank
    /// bookkeeping gathered at initialization (entry counts, the mailbox
    /// directory) is published.
    ///
    /// # Errors
    ///
    /// `ArenaCapacity` if the slot budget is exhausted.
    pub fn construct_array<T: Send + Sync + 'static>(
        &self,
        items: Vec<T>,
    ) -> Result<ArenaHandle<ArenaArray<T>>> {
        self.construct(ArenaArray { items })
    }

    /// Resolve a handle to a shared reference.
    ///
    /// # Errors
    ///
    /// - `StaleHandle` if the handle is null, out of range, or its slot was
    ///   destroyed or reused since allocation.
    /// - `HandleType` if the slot holds an object of a different type.
    pub fn get<T: Send + Sync + 'static>(&self, handle: ArenaHandle<T>) -> Result<Arc<T>> {
        let slots = self.slots.read();
        let slot = slots
            .get(handle.index() as usize)
            .filter(|s| s.generation == handle.generation() && !handle.is_null())
            .ok_or_else(|| StoreError::StaleHandle {
                index: handle.index(),
                generation: handle.generation(),
            })?;

        let value = slot.value.as_ref().ok_or(StoreError::StaleHandle {
            index: handle.index(),
            generation: handle.generation(),
        })?;

        Arc::clone(value)
            .downcast::<T>()
            .map_err(|_| StoreError::HandleType {
                index: handle.index(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Release the slot behind a handle.
    ///
    /// The object's destructor runs when the last outstanding alias drops;
    /// the slot itself becomes reusable immediately and any copy of the
    /// handle is stale from this point on. Releasing is idempotent per
    /// handle: a second call reports `StaleHandle`.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the handle does not refer to a live slot.
    pub fn destroy<T>(&self, handle: ArenaHandle<T>) -> Result<()> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(handle.index() as usize)
            .filter(|s| s.generation == handle.generation() && !handle.is_null())
            .ok_or_else(|| StoreError::StaleHandle {
                index: handle.index(),
                generation: handle.generation(),
            })?;

        if slot.value.take().is_none() {
            return Err(StoreError::StaleHandle {
                index: handle.index(),
                generation: handle.generation(),
            });
        }

        self.free.lock().push(handle.index());
        Ok(())
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("table_id", &self.table_id)
            .field("live", &self.live_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// A fixed-length immutable array placed in the arena.
pub struct ArenaArray<T> {
    items: Vec<T>,
}

impl<T> ArenaArray<T> {
    /// Get the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the array is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get an element by index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Iterate over the elements.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// View the array as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_arena() -> Arena {
        Arena::create(TableId::new(), &ArenaConfig::for_testing())
    }

    #[test]
    fn construct_and_get() {
        let arena = test_arena();
        let handle = arena.construct(42u64).unwrap();
        assert!(!handle.is_null());
        assert_eq!(*arena.get(handle).unwrap(), 42);
        assert_eq!(arena.live_count(), 1);
    }

    #[test]
    fn null_handle_is_stale() {
        let arena = test_arena();
        let err = arena.get(ArenaHandle::<u64>::NULL).unwrap_err();
        assert_eq!(err.code(), "E002");
    }

    #[test]
    fn destroy_invalidates_handle() {
        let arena = test_arena();
        let handle = arena.construct("data".to_string()).unwrap();
        arena.destroy(handle).unwrap();

        let err = arena.get(handle).unwrap_err();
        assert!(matches!(err, StoreError::StaleHandle { .. }));

        // Second destroy also reports staleness.
        assert!(arena.destroy(handle).is_err());
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn slot_reuse_bumps_generation() {
        let arena = test_arena();
        let first = arena.construct(1u32).unwrap();
        arena.destroy(first).unwrap();

        let second = arena.construct(2u32).unwrap();
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());

        // The old handle must not resolve to the new occupant.
        assert!(arena.get(first).is_err());
        assert_eq!(*arena.get(second).unwrap(), 2);
    }

    #[test]
    fn type_mismatch() {
        let arena = test_arena();
        let handle = arena.construct(1u32).unwrap();
        // Forge a handle of the wrong type at the same slot.
        let forged: ArenaHandle<String> = ArenaHandle::from_raw(handle.index(), handle.generation());
        let err = arena.get(forged).unwrap_err();
        assert_eq!(err.code(), "E003");
    }

    #[test]
    fn capacity_is_enforced() {
        let arena = Arena::create(TableId::new(), &ArenaConfig::default().with_capacity(2));
        arena.construct(0u8).unwrap();
        arena.construct(1u8).unwrap();
        let err = arena.construct(2u8).unwrap_err();
        assert!(matches!(err, StoreError::ArenaCapacity { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn freed_slots_do_not_count_against_capacity() {
        let arena = Arena::create(TableId::new(), &ArenaConfig::default().with_capacity(1));
        let handle = arena.construct(0u8).unwrap();
        arena.destroy(handle).unwrap();
        // Reuses the freed slot instead of failing.
        arena.construct(1u8).unwrap();
    }

    #[test]
    fn alias_survives_destroy() {
        let arena = test_arena();
        let handle = arena.construct(vec![1.0f64, 2.0]).unwrap();
        let alias = arena.get(handle).unwrap();
        arena.destroy(handle).unwrap();
        // The slot is gone but the outstanding alias still reads.
        assert_eq!(alias.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn arrays() {
        let arena = test_arena();
        let handle = arena.construct_array(vec![10u64, 20, 30]).unwrap();
        let array = arena.get(handle).unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array.get(1), Some(&20));
        assert_eq!(array.get(3), None);
        assert_eq!(array.as_slice(), &[10, 20, 30]);
    }
}
