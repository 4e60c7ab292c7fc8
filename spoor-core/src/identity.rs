//! Visitor identity and session assignment
//!
//! The visitor id is generated once per installation and persisted in
//! the queue database; it survives restarts and upgrades, and is only
//! regenerated when the underlying storage is gone (reinstall). The
//! session id lives in memory: every process start begins a fresh
//! session, and further rollovers happen on explicit restart requests
//! or when the inactivity gap exceeds the configured timeout.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::store::SqliteEventStore;

const VISITOR_ID_KEY: &str = "visitor_id";

/// Identity fields stamped on an event that passed the sampling gate.
#[derive(Debug, Clone)]
pub struct SessionStamp {
    /// The active session id
    pub session_id: String,
    /// True when this stamp opened a new session
    pub is_new_session: bool,
}

struct SessionState {
    id: String,
    last_activity: DateTime<Utc>,
}

/// Owns the durable visitor identifier and the current session.
pub struct IdentityManager {
    visitor_id: String,
    session_timeout: Duration,
    restart_requested: AtomicBool,
    session: Mutex<Option<SessionState>>,
}

impl IdentityManager {
    /// Load the visitor id from the store, generating and persisting
    /// one if absent. `force_restart` pre-arms a session restart for
    /// the first stamped event (the one-shot `session_start` option).
    pub fn open(
        store: &SqliteEventStore,
        session_timeout: Duration,
        force_restart: bool,
    ) -> Result<Self> {
        let visitor_id = match store.state_get(VISITOR_ID_KEY)? {
            Some(id) => id,
            None => {
                let id = generate_visitor_id();
                store.state_put(VISITOR_ID_KEY, &id)?;
                tracing::info!(visitor_id = %id, "Generated new visitor id");
                id
            }
        };

        Ok(Self {
            visitor_id,
            session_timeout,
            restart_requested: AtomicBool::new(force_restart),
            session: Mutex::new(None),
        })
    }

    /// The durable per-installation identifier.
    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }

    /// Request that the next stamped event starts a new session.
    pub fn request_restart(&self) {
        self.restart_requested.store(true, Ordering::SeqCst);
    }

    /// Return the active session id for an event observed at `now`,
    /// rolling the session over when a restart was requested, no
    /// session exists yet, or the inactivity gap exceeds the timeout.
    /// Every call advances last-activity: any tracked event counts as
    /// activity.
    pub fn stamp(&self, now: DateTime<Utc>) -> SessionStamp {
        let force = self.restart_requested.swap(false, Ordering::SeqCst);
        let mut session = self.session.lock().unwrap();

        let rollover = match session.as_ref() {
            None => true,
            Some(state) => force || now - state.last_activity > self.session_timeout,
        };

        if rollover {
            let id = generate_session_id();
            tracing::debug!(session_id = %id, "Starting new session");
            *session = Some(SessionState {
                id: id.clone(),
                last_activity: now,
            });
            SessionStamp {
                session_id: id,
                is_new_session: true,
            }
        } else {
            let state = session.as_mut().unwrap();
            state.last_activity = now;
            SessionStamp {
                session_id: state.id.clone(),
                is_new_session: false,
            }
        }
    }
}

/// 16 hex characters, the wire format for visitor ids.
fn generate_visitor_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(timeout_secs: i64, force_restart: bool) -> IdentityManager {
        let store = SqliteEventStore::open_in_memory(100).unwrap();
        IdentityManager::open(&store, Duration::seconds(timeout_secs), force_restart).unwrap()
    }

    #[test]
    fn test_visitor_id_format() {
        let id = generate_visitor_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_visitor_id_stable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let first = {
            let store = SqliteEventStore::open(&path, 100).unwrap();
            let identity =
                IdentityManager::open(&store, Duration::seconds(120), false).unwrap();
            identity.visitor_id().to_string()
        };

        let store = SqliteEventStore::open(&path, 100).unwrap();
        let identity = IdentityManager::open(&store, Duration::seconds(120), false).unwrap();
        assert_eq!(identity.visitor_id(), first);
    }

    #[test]
    fn test_first_stamp_opens_session() {
        let identity = manager(120, false);
        let stamp = identity.stamp(Utc::now());
        assert!(stamp.is_new_session);
    }

    #[test]
    fn test_session_stable_within_timeout() {
        let identity = manager(120, false);
        let start = Utc::now();

        let first = identity.stamp(start);
        let second = identity.stamp(start + Duration::seconds(30));
        let third = identity.stamp(start + Duration::seconds(60));

        assert!(first.is_new_session);
        assert!(!second.is_new_session);
        assert!(!third.is_new_session);
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.session_id, third.session_id);
    }

    #[test]
    fn test_session_rolls_over_after_gap() {
        let identity = manager(120, false);
        let start = Utc::now();

        let first = identity.stamp(start);
        let second = identity.stamp(start + Duration::seconds(121));

        assert!(second.is_new_session);
        assert_ne!(first.session_id, second.session_id);
    }

    #[test]
    fn test_activity_extends_session() {
        let identity = manager(120, false);
        let start = Utc::now();

        let first = identity.stamp(start);
        // Each event lands inside the window measured from the previous one
        let second = identity.stamp(start + Duration::seconds(100));
        let third = identity.stamp(start + Duration::seconds(200));

        assert_eq!(first.session_id, third.session_id);
        assert!(!third.is_new_session);
        let _ = second;
    }

    #[test]
    fn test_forced_restart_is_one_shot() {
        let identity = manager(120, true);
        let start = Utc::now();

        let first = identity.stamp(start);
        assert!(first.is_new_session);

        let second = identity.stamp(start + Duration::seconds(1));
        assert!(!second.is_new_session);

        identity.request_restart();
        let third = identity.stamp(start + Duration::seconds(2));
        assert!(third.is_new_session);
        assert_ne!(second.session_id, third.session_id);
    }
}
