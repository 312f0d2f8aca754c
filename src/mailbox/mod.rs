//! The point-fetch mailbox protocol.
//!
//! Each rank carries both halves of a fixed two-message exchange:
//!
//! - the [`Inbox`] serves fetch requests for points this rank owns;
//! - the [`Outbox`] issues fetch requests on behalf of local computation,
//!   tracks in-flight requests, and caches responses.
//!
//! A fetch sends [`FetchRequest`] outbox → inbox, the owner stages the
//! point in its retained reply buffer, and an [`AckToken`] (a token, not
//! the payload) comes back inbox → outbox. The requester then alias-reads
//! the staged buffer directly through the shared arena, so the bulk data is
//! never copied a second time.

mod inbox;
mod message;
mod outbox;

pub use inbox::{Inbox, InboxState};
pub use message::{AckToken, FetchRequest};
pub use outbox::Outbox;

pub(crate) use outbox::DEFAULT_ACK_WARN_INTERVAL_MS;
