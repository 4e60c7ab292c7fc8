//! Batch dispatcher
//!
//! Runs one delivery cycle at a time (enforced by the scheduler): read
//! a bounded batch, encode it, invoke the transport, then remove the
//! delivered records or retain the batch for the next cycle.

use std::sync::{Arc, Mutex};

use super::transport::{TrackerRequest, Transport};
use super::{encode_bulk, encode_query};
use crate::config::BulkEncoding;
use crate::error::Result;
use crate::store::EventStore;
use crate::types::QueuedEvent;

/// Counters kept across dispatch cycles.
#[derive(Debug, Default, Clone)]
pub struct DispatchStats {
    /// Events confirmed delivered (or logged, in debug mode)
    pub events_sent: usize,
    /// Requests handed to the transport
    pub requests_made: usize,
    /// Requests the transport failed or the server rejected
    pub request_failures: usize,
    /// Delivery cycles run
    pub cycles_run: usize,
}

/// Settings the dispatcher needs from the tracker configuration.
pub(crate) struct DispatchSettings {
    pub site_id: String,
    pub authentication_token: Option<String>,
    pub bulk_encoding: BulkEncoding,
    pub events_per_request: usize,
    pub max_batches_per_cycle: Option<u32>,
    pub debug: bool,
}

pub struct Dispatcher {
    store: Arc<dyn EventStore>,
    transport: Arc<dyn Transport>,
    settings: DispatchSettings,
    stats: Mutex<DispatchStats>,
}

impl Dispatcher {
    pub(crate) fn new(
        store: Arc<dyn EventStore>,
        transport: Arc<dyn Transport>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            transport,
            settings,
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    /// Current dispatch statistics
    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().unwrap().clone()
    }

    /// Run one delivery cycle: drain batches oldest-first until the
    /// queue is empty, a request fails, or the per-cycle batch cap is
    /// hit. Returns the number of events delivered this cycle.
    pub async fn run_cycle(&self) -> Result<usize> {
        self.stats.lock().unwrap().cycles_run += 1;

        let mut delivered = 0usize;
        let mut batches = 0u32;

        loop {
            let batch = self.store.peek_batch(self.settings.events_per_request)?;
            if batch.is_empty() {
                break;
            }

            if self.settings.debug {
                self.deliver_debug(&batch)?;
                delivered += batch.len();
            } else if batch.len() == 1 || self.settings.authentication_token.is_some() {
                if !self.deliver(&batch).await? {
                    break;
                }
                delivered += batch.len();
            } else {
                // Bulk mode needs the authentication token; without it
                // the batch goes out as sequential single-event requests
                let (sent, completed) = self.deliver_sequential(&batch).await?;
                delivered += sent;
                if !completed {
                    break;
                }
            }

            batches += 1;
            if let Some(max) = self.settings.max_batches_per_cycle {
                if batches >= max {
                    break;
                }
            }
        }

        if delivered > 0 {
            tracing::debug!(delivered, batches, "Dispatch cycle complete");
        }
        Ok(delivered)
    }

    /// Send one batch as a single hit or a bulk request. Returns true
    /// when the batch was accepted and removed, false when it was
    /// retained for retry.
    async fn deliver(&self, batch: &[QueuedEvent]) -> Result<bool> {
        let request = if batch.len() == 1 {
            TrackerRequest::Single {
                query: encode_query(&batch[0], &self.settings.site_id),
            }
        } else {
            let token = self
                .settings
                .authentication_token
                .as_deref()
                .unwrap_or_default();
            TrackerRequest::Bulk {
                body: encode_bulk(
                    batch,
                    &self.settings.site_id,
                    token,
                    self.settings.bulk_encoding,
                ),
            }
        };

        self.stats.lock().unwrap().requests_made += 1;

        match self.transport.send(&request).await {
            Ok(()) => {
                self.remove(batch)?;
                self.stats.lock().unwrap().events_sent += batch.len();
                Ok(true)
            }
            Err(e) => {
                self.stats.lock().unwrap().request_failures += 1;
                tracing::warn!(
                    error = %e,
                    events = batch.len(),
                    "Dispatch failed, batch retained for retry"
                );
                Ok(false)
            }
        }
    }

    /// Bulk fallback: one request per event, removing each on success.
    /// Returns (events sent, whether the whole batch completed).
    async fn deliver_sequential(&self, batch: &[QueuedEvent]) -> Result<(usize, bool)> {
        let mut sent = 0usize;
        for queued in batch {
            let request = TrackerRequest::Single {
                query: encode_query(queued, &self.settings.site_id),
            };

            self.stats.lock().unwrap().requests_made += 1;

            match self.transport.send(&request).await {
                Ok(()) => {
                    self.store.remove_batch(&[queued.seq])?;
                    self.stats.lock().unwrap().events_sent += 1;
                    sent += 1;
                }
                Err(e) => {
                    self.stats.lock().unwrap().request_failures += 1;
                    tracing::warn!(
                        error = %e,
                        seq = queued.seq,
                        "Dispatch failed, remaining events retained for retry"
                    );
                    return Ok((sent, false));
                }
            }
        }
        Ok((sent, true))
    }

    /// Debug mode: log the encoded hits instead of sending them, then
    /// treat the batch as delivered so the queue never grows unboundedly.
    fn deliver_debug(&self, batch: &[QueuedEvent]) -> Result<()> {
        for queued in batch {
            tracing::info!(
                seq = queued.seq,
                kind = %queued.event.kind,
                query = %encode_query(queued, &self.settings.site_id),
                "Debug dispatch (not sent)"
            );
        }
        self.remove(batch)?;
        self.stats.lock().unwrap().events_sent += batch.len();
        Ok(())
    }

    fn remove(&self, batch: &[QueuedEvent]) -> Result<usize> {
        let seqs: Vec<i64> = batch.iter().map(|queued| queued.seq).collect();
        self.store.remove_batch(&seqs)
    }
}
