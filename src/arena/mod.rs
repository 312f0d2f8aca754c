//! Shared arena backing every cross-rank-visible object.
//!
//! One arena exists per process, constructed once at startup and sized for
//! the whole job. Tables, partitions, mailboxes, and per-rank bookkeeping
//! arrays are all placed inside it, and every reference between them is an
//! [`ArenaHandle`], a stable `(slot, generation)` pair resolved through a
//! single lookup table, never a raw address. Handles therefore mean the same
//! thing on every rank sharing the region, which is what lets a requester
//! alias-read a reply staged by a remote rank's inbox.
//!
//! # Lifecycle
//!
//! Arena mutation (construct/destroy) happens only on each rank's own
//! initialization and teardown paths; steady-state serving never allocates.
//! Allocation failure is fatal; there is no dynamic growth.

mod slots;

pub use slots::{Arena, ArenaArray, ArenaConfig};
