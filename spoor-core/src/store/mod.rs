//! Persistent event queue
//!
//! This module provides the durable queue layer using SQLite with:
//! - Schema migrations
//! - Capacity-bounded, FIFO-ordered append
//! - A small key-value table for tracker state (visitor id, opt-out)
//!
//! All queue operations are serialized through a single connection so
//! concurrent enqueue and dispatch activity can never corrupt sequence
//! ordering or the capacity check.

pub mod queue;
pub mod schema;

pub use queue::SqliteEventStore;

use crate::error::Result;
use crate::types::{QueuedEvent, TrackedEvent};

/// Capability interface the dispatcher needs from durable storage.
///
/// Any embedded durable store can sit behind this; the shipped
/// implementation is [`SqliteEventStore`].
pub trait EventStore: Send + Sync {
    /// Append an event with a fresh sequence number, committing durably
    /// before returning. Returns `false` without mutating anything when
    /// the queue is at capacity.
    fn enqueue(&self, event: &TrackedEvent) -> Result<bool>;

    /// Up to `limit` oldest events, in sequence order, without removing
    /// them. Supports retry-safe read-then-confirm.
    fn peek_batch(&self, limit: usize) -> Result<Vec<QueuedEvent>>;

    /// Delete exactly the given sequence numbers. Idempotent: removing
    /// an already-removed sequence is a no-op, not an error. Returns
    /// the number of records actually deleted.
    fn remove_batch(&self, seqs: &[i64]) -> Result<usize>;

    /// Delete all queued events. Returns the number removed.
    fn clear(&self) -> Result<usize>;

    /// Current queue size.
    fn count(&self) -> Result<u64>;
}
