//! Batched event delivery
//!
//! The scheduler decides when a dispatch cycle may start; the
//! dispatcher pulls bounded batches from the queue, encodes them and
//! hands them to the transport, removing records only after the server
//! accepted them. A failed request leaves its batch untouched so the
//! next cycle retries the same oldest records first.
//!
//! Delivery is at-least-once: a crash between a successful request and
//! the removal commit re-sends that batch on the next launch.

mod dispatcher;
mod encoder;
mod scheduler;
mod transport;

pub use dispatcher::{DispatchStats, Dispatcher};
pub use scheduler::{DispatchScheduler, SchedulerState};
pub use transport::{HttpTransport, TrackerRequest, Transport};

pub(crate) use dispatcher::DispatchSettings;
pub(crate) use encoder::{encode_bulk, encode_query};
