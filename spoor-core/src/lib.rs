//! # spoor-core
//!
//! Core library for spoor - a buffered analytics tracker for Rust
//! applications.
//!
//! Events are persisted locally in SQLite until they are dispatched and
//! accepted by the collection server, so tracking survives process
//! restarts, backgrounding and network failure. Delivery is
//! at-least-once: a batch is removed from the queue only after the
//! server confirmed it.
//!
//! ## Architecture
//!
//! A tracking call flows through the sampling/opt-out gate, gets
//! stamped with the durable visitor id and the current session id, and
//! lands in the persistent queue. Independently, the dispatch scheduler
//! (timer-driven or manual) runs batch dispatch cycles: read a bounded
//! batch oldest-first, encode it (single hit or bulk), send it, then
//! remove it on success or retain it for the next cycle on failure.
//!
//! ## Example
//!
//! ```rust,no_run
//! use spoor_core::{Tracker, TrackerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> spoor_core::Result<()> {
//! let mut config = TrackerConfig::new("https://stats.example.com", "7");
//! config.app_name = Some("demo".to_string());
//!
//! let tracker = Tracker::new(config)?;
//! tracker.send_view("settings")?;
//! tracker.send_event("ui", "tap", Some("save-button"))?;
//!
//! // The dispatch timer delivers pending events; this forces a cycle now.
//! tracker.dispatch().await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::{BulkEncoding, Config, TrackerConfig};
pub use dispatch::{DispatchStats, HttpTransport, SchedulerState, TrackerRequest, Transport};
pub use error::{Error, Result};
pub use store::{EventStore, SqliteEventStore};
pub use tracker::Tracker;
pub use types::*;

// Public modules
pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod logging;
pub mod sampling;
pub mod store;
pub mod tracker;
pub mod types;
