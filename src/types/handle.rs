//! Typed handles into the shared arena.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// A relative reference into the shared arena.
///
/// `ArenaHandle<T>` identifies an object of type `T` by slot index and
/// generation rather than by address, so the same handle value is meaningful
/// on every rank that shares the arena's backing region. Resolution goes
/// through a single arena lookup ([`Arena::get`](crate::arena::Arena::get));
/// the generation catches use of a handle whose slot has been destroyed or
/// reused.
#[derive(Serialize, Deserialize)]
#[serde(rename = "ArenaHandle")]
pub struct ArenaHandle<T> {
    index: u32,
    generation: u32,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> ArenaHandle<T> {
    /// The null sentinel. Generation zero is never allocated.
    pub const NULL: Self = Self {
        index: 0,
        generation: 0,
        _marker: PhantomData,
    };

    /// Create a null handle.
    #[must_use]
    pub const fn null() -> Self {
        Self::NULL
    }

    /// Create a handle from raw parts. Used by the arena on allocation.
    #[must_use]
    pub(crate) const fn from_raw(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Get the slot index.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Get the generation stamped at allocation.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Check if this is the null sentinel.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.generation == 0
    }
}

// Manual impls so `T` does not need to satisfy the derived bounds.

impl<T> Clone for ArenaHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaHandle<T> {}

impl<T> PartialEq for ArenaHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for ArenaHandle<T> {}

impl<T> std::hash::Hash for ArenaHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Default for ArenaHandle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> fmt::Debug for ArenaHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaHandle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> fmt::Display for ArenaHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "handle<{}>@null", std::any::type_name::<T>())
        } else {
            write!(
                f,
                "handle<{}>@{}g{}",
                std::any::type_name::<T>(),
                self.index,
                self.generation
            )
        }
    }
}
