//! Dispatch scheduling
//!
//! One repeating timer drives periodic dispatch; manual dispatch shares
//! the same entry point. Exactly one cycle runs at a time; a trigger
//! that lands while a cycle is in flight reports `false` instead of
//! queueing a second concurrent cycle. The next periodic tick is
//! measured from cycle completion, not from the previous tick's
//! schedule, so a long suspension never produces a catch-up burst.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::dispatcher::Dispatcher;
use crate::error::{Error, Result};

/// Scheduler state, readable for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No timer, or the timer is disabled (manual dispatch only)
    Idle,
    /// Timer running, will fire at the next interval
    Armed,
    /// A dispatch cycle is in progress
    Dispatching,
}

const STATE_IDLE: u8 = 0;
const STATE_ARMED: u8 = 1;
const STATE_DISPATCHING: u8 = 2;

pub struct DispatchScheduler {
    inner: Arc<SchedulerInner>,
    // Dropping the sender stops the timer task
    stop: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

struct SchedulerInner {
    dispatcher: Arc<Dispatcher>,
    cycle_lock: tokio::sync::Mutex<()>,
    state: AtomicU8,
    /// State between cycles: Armed for non-negative intervals (periodic
    /// timer or enqueue-triggered), Idle for manual-only dispatch
    resting_state: u8,
}

impl DispatchScheduler {
    /// Build the scheduler. A positive interval arms a periodic timer
    /// (requires a runtime handle); zero and negative intervals arm
    /// nothing here. Zero-interval dispatch is triggered by the
    /// tracker after each enqueue, negative means manual only.
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        interval_secs: i64,
        runtime: Option<&tokio::runtime::Handle>,
    ) -> Result<Self> {
        let periodic = interval_secs > 0;
        let resting_state = if interval_secs >= 0 {
            STATE_ARMED
        } else {
            STATE_IDLE
        };
        let inner = Arc::new(SchedulerInner {
            dispatcher,
            cycle_lock: tokio::sync::Mutex::new(()),
            state: AtomicU8::new(resting_state),
            resting_state,
        });

        let (stop, mut stop_rx) = watch::channel(false);

        let timer = if periodic {
            let runtime = runtime.ok_or_else(|| {
                Error::Config(
                    "a tokio runtime is required for a periodic dispatch interval".to_string(),
                )
            })?;
            let interval = Duration::from_secs(interval_secs as u64);
            let inner = inner.clone();
            Some(runtime.spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            let _ = inner.try_run_cycle().await;
                        }
                        _ = stop_rx.changed() => break,
                    }
                }
            }))
        } else {
            None
        };

        Ok(Self {
            inner,
            stop,
            timer: Mutex::new(timer),
        })
    }

    /// Request a dispatch cycle and wait for it to finish. Returns
    /// `false` when another cycle was already in flight (the request is
    /// coalesced, not queued).
    pub async fn dispatch(&self) -> Result<bool> {
        self.inner.try_run_cycle().await
    }

    /// Fire a dispatch cycle in the background (zero-interval mode).
    pub(crate) fn spawn_dispatch(&self, runtime: &tokio::runtime::Handle) {
        let inner = self.inner.clone();
        runtime.spawn(async move {
            let _ = inner.try_run_cycle().await;
        });
    }

    pub fn state(&self) -> SchedulerState {
        match self.inner.state.load(Ordering::SeqCst) {
            STATE_ARMED => SchedulerState::Armed,
            STATE_DISPATCHING => SchedulerState::Dispatching,
            _ => SchedulerState::Idle,
        }
    }

    /// Stop the timer and wait for any in-flight cycle to finish. A
    /// cycle is the unit of work: it is never cancelled midway.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(true);
        let timer = self.timer.lock().unwrap().take();
        if let Some(handle) = timer {
            let _ = handle.await;
        }
        // Waits for a manual or enqueue-triggered cycle still running
        let _guard = self.inner.cycle_lock.lock().await;
        self.inner.state.store(STATE_IDLE, Ordering::SeqCst);
    }
}

impl SchedulerInner {
    async fn try_run_cycle(&self) -> Result<bool> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            tracing::debug!("Dispatch already in progress, request coalesced");
            return Ok(false);
        };

        self.state.store(STATE_DISPATCHING, Ordering::SeqCst);
        let result = self.dispatcher.run_cycle().await;
        // Re-arm measured from completion
        self.state.store(self.resting_state, Ordering::SeqCst);

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(error = %e, "Dispatch cycle failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BulkEncoding;
    use crate::dispatch::dispatcher::DispatchSettings;
    use crate::dispatch::transport::{TrackerRequest, Transport};
    use crate::store::{EventStore, SqliteEventStore};
    use crate::types::{EventKind, TrackedEvent};
    use async_trait::async_trait;
    use chrono::Utc;

    /// Transport that holds every request for a fixed delay.
    struct SlowTransport {
        delay: Duration,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        async fn send(&self, _request: &TrackerRequest) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    fn make_event() -> TrackedEvent {
        TrackedEvent {
            created_at: Utc::now(),
            visitor_id: "0123456789abcdef".to_string(),
            session_id: "session-1".to_string(),
            new_visit: false,
            kind: EventKind::Screen,
            params: vec![("action_name".to_string(), "screen/home".to_string())],
        }
    }

    fn make_scheduler(
        store: Arc<SqliteEventStore>,
        transport: Arc<dyn Transport>,
        interval_secs: i64,
    ) -> DispatchScheduler {
        let dispatcher = Arc::new(Dispatcher::new(
            store,
            transport,
            DispatchSettings {
                site_id: "7".to_string(),
                authentication_token: Some("t".to_string()),
                bulk_encoding: BulkEncoding::Current,
                events_per_request: 20,
                max_batches_per_cycle: None,
                debug: false,
            },
        ));
        DispatchScheduler::new(
            dispatcher,
            interval_secs,
            Some(&tokio::runtime::Handle::current()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_manual_only_scheduler_is_idle() {
        let store = Arc::new(SqliteEventStore::open_in_memory(100).unwrap());
        store.enqueue(&make_event()).unwrap();
        let scheduler = make_scheduler(
            store.clone(),
            Arc::new(SlowTransport {
                delay: Duration::from_millis(0),
            }),
            -1,
        );

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.dispatch().await.unwrap());
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_coalesced() {
        let store = Arc::new(SqliteEventStore::open_in_memory(100).unwrap());
        store.enqueue(&make_event()).unwrap();
        let scheduler = Arc::new(make_scheduler(
            store,
            Arc::new(SlowTransport {
                delay: Duration::from_millis(300),
            }),
            -1,
        ));

        let background = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.dispatch().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(scheduler.state(), SchedulerState::Dispatching);
        // Second trigger while the first is in flight: rejected, not queued
        assert!(!scheduler.dispatch().await.unwrap());
        assert!(background.await.unwrap());
    }

    #[tokio::test]
    async fn test_periodic_timer_dispatches() {
        let store = Arc::new(SqliteEventStore::open_in_memory(100).unwrap());
        store.enqueue(&make_event()).unwrap();
        let scheduler = make_scheduler(
            store.clone(),
            Arc::new(SlowTransport {
                delay: Duration::from_millis(0),
            }),
            1,
        );

        assert_eq!(scheduler.state(), SchedulerState::Armed);

        // The first tick lands after ~1s
        let mut waited = 0u64;
        while store.count().unwrap() > 0 && waited < 5_000 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            waited += 100;
        }
        assert_eq!(store.count().unwrap(), 0);

        scheduler.shutdown().await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }
}
