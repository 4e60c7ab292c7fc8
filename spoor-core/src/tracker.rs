//! Tracker context object
//!
//! The public surface of the library: one explicitly constructed
//! context the host application passes to its call sites. Tracking
//! calls build an event's wire fields, run it through the sampling
//! gate, stamp identity and hand it to the durable queue; they return
//! as soon as the event is queued (or rejected) and never block on
//! network I/O.

use chrono::Utc;
use std::sync::{Arc, Mutex};

use crate::config::TrackerConfig;
use crate::dispatch::{
    DispatchScheduler, DispatchSettings, DispatchStats, Dispatcher, HttpTransport, SchedulerState,
    Transport,
};
use crate::error::{Error, Result};
use crate::identity::IdentityManager;
use crate::sampling::SamplingGate;
use crate::store::{EventStore, SqliteEventStore};
use crate::types::{CustomVariables, EventKind, TrackedEvent};

/// Separator for hierarchical action paths.
const PATH_SEPARATOR: &str = "/";

/// Exception descriptions are capped at this many characters.
const MAX_EXCEPTION_DESCRIPTION: usize = 50;

const OPT_OUT_KEY: &str = "opt_out";

/// A buffered analytics tracker.
///
/// Construct once with [`Tracker::new`] and share by reference (or
/// `Arc`) across the application. Events are persisted locally until
/// the dispatch timer, an enqueue in zero-interval mode, or a manual
/// [`Tracker::dispatch`] call delivers them.
///
/// Must be created inside a tokio runtime unless
/// `dispatch_interval_secs` is negative (manual dispatch only).
pub struct Tracker {
    config: TrackerConfig,
    store: Arc<SqliteEventStore>,
    identity: IdentityManager,
    gate: SamplingGate,
    dispatcher: Arc<Dispatcher>,
    scheduler: DispatchScheduler,
    location: Mutex<Option<(f64, f64)>>,
    runtime: Option<tokio::runtime::Handle>,
}

impl Tracker {
    /// Create a tracker with the default SQLite store and HTTP
    /// transport. The queue database lives at the configured
    /// `database_path`, or the XDG data dir when unset.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;

        let db_path = config
            .database_path
            .clone()
            .unwrap_or_else(crate::config::Config::database_path);
        let store = Arc::new(SqliteEventStore::open(&db_path, config.max_queued_events)?);
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::with_store_and_transport(config, store, transport)
    }

    /// Create a tracker over an explicit store and transport, for tests
    /// and embedders that bring their own collaborators.
    pub fn with_store_and_transport(
        config: TrackerConfig,
        store: Arc<SqliteEventStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Handle::try_current().ok();
        if config.dispatch_interval_secs >= 0 && runtime.is_none() {
            return Err(Error::Config(
                "a tokio runtime is required unless dispatch_interval_secs is negative"
                    .to_string(),
            ));
        }

        // Opt-out is sticky: a value persisted at runtime wins over the
        // configured default
        let opt_out = match store.state_get(OPT_OUT_KEY)? {
            Some(value) => value == "1",
            None => config.opt_out,
        };
        let gate = SamplingGate::new(config.sample_rate, opt_out);

        let identity = IdentityManager::open(
            &store,
            chrono::Duration::seconds(config.session_timeout_secs as i64),
            config.session_start,
        )?;

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone() as Arc<dyn EventStore>,
            transport,
            DispatchSettings {
                site_id: config.site_id.clone(),
                authentication_token: config.authentication_token.clone(),
                bulk_encoding: config.bulk_encoding,
                events_per_request: config.events_per_request,
                max_batches_per_cycle: config.max_batches_per_cycle,
                debug: config.debug,
            },
        ));
        let scheduler = DispatchScheduler::new(
            dispatcher.clone(),
            config.dispatch_interval_secs,
            runtime.as_ref(),
        )?;

        tracing::info!(
            site_id = %config.site_id,
            dispatch_interval_secs = config.dispatch_interval_secs,
            debug = config.debug,
            "Tracker created"
        );

        Ok(Self {
            config,
            store,
            identity,
            gate,
            dispatcher,
            scheduler,
            location: Mutex::new(None),
            runtime,
        })
    }

    // ============================================
    // Tracking calls
    // ============================================

    /// Track a single screen view. Returns true if the event was
    /// queued for dispatching.
    pub fn send_view(&self, screen: &str) -> Result<bool> {
        self.send_views(&[screen])
    }

    /// Track a hierarchical screen view, e.g. `["settings",
    /// "register"]`. Segments are joined with `/` at encode time.
    pub fn send_views(&self, screen_path: &[&str]) -> Result<bool> {
        let params = self.action_params(EventKind::Screen, screen_path);
        self.queue_event(EventKind::Screen, params)
    }

    /// Track an event (as opposed to a screen view), addressed as
    /// category/action and an optional label.
    pub fn send_event(&self, category: &str, action: &str, label: Option<&str>) -> Result<bool> {
        let mut segments = vec![category, action];
        if let Some(label) = label {
            segments.push(label);
        }
        let params = self.action_params(EventKind::Event, &segments);
        self.queue_event(EventKind::Event, params)
    }

    /// Track a caught exception or error. The description is truncated
    /// to 50 characters.
    pub fn send_exception(&self, description: &str, is_fatal: bool) -> Result<bool> {
        let description: String = description.chars().take(MAX_EXCEPTION_DESCRIPTION).collect();
        let severity = if is_fatal { "fatal" } else { "caught" };
        let params = self.action_params(EventKind::Exception, &[severity, &description]);
        self.queue_event(EventKind::Exception, params)
    }

    /// Track an interaction with a social network, e.g.
    /// `("like", "picture-42", "facebook")`.
    pub fn send_social(&self, action: &str, target: &str, network: &str) -> Result<bool> {
        let params = self.action_params(EventKind::Social, &[network, action, target]);
        self.queue_event(EventKind::Social, params)
    }

    /// Track a goal conversion with its monetary value.
    pub fn send_goal(&self, goal_id: u32, revenue: u64) -> Result<bool> {
        let mut params = vec![
            ("idgoal".to_string(), goal_id.to_string()),
            ("revenue".to_string(), revenue.to_string()),
        ];
        self.push_common_params(&mut params);
        self.queue_event(EventKind::Goal, params)
    }

    /// Track a search performed in the application.
    pub fn send_search(
        &self,
        keyword: &str,
        category: Option<&str>,
        hit_count: Option<u64>,
    ) -> Result<bool> {
        let mut params = vec![("search".to_string(), keyword.to_string())];
        if let Some(category) = category {
            params.push(("search_cat".to_string(), category.to_string()));
        }
        if let Some(hit_count) = hit_count {
            params.push(("search_count".to_string(), hit_count.to_string()));
        }
        self.push_common_params(&mut params);
        self.queue_event(EventKind::Search, params)
    }

    // ============================================
    // Dispatch control
    // ============================================

    /// Manually start a dispatch of all pending events and wait for
    /// the cycle to finish. Returns false when a cycle was already in
    /// flight.
    pub async fn dispatch(&self) -> Result<bool> {
        self.scheduler.dispatch().await
    }

    /// Delete all pending events.
    pub fn delete_queued_events(&self) -> Result<()> {
        let removed = self.store.clear()?;
        tracing::info!(removed, "Deleted queued events");
        Ok(())
    }

    /// Number of events currently queued.
    pub fn queued_event_count(&self) -> Result<u64> {
        self.store.count()
    }

    /// Current scheduler state.
    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Dispatch statistics accumulated since construction.
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Stop the dispatch timer and wait for any in-flight cycle to
    /// finish. Pending events stay queued for the next launch.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        tracing::info!("Tracker shut down");
    }

    // ============================================
    // Identity and privacy
    // ============================================

    /// The durable per-installation visitor id.
    pub fn visitor_id(&self) -> &str {
        self.identity.visitor_id()
    }

    /// Force a new session when the next event is queued.
    pub fn start_new_session(&self) {
        self.identity.request_restart();
    }

    /// Opt out of tracking. Persisted across restarts.
    pub fn set_opt_out(&self, opt_out: bool) -> Result<()> {
        self.gate.set_opt_out(opt_out);
        self.store
            .state_put(OPT_OUT_KEY, if opt_out { "1" } else { "0" })?;
        tracing::info!(opt_out, "Opt-out updated");
        Ok(())
    }

    pub fn opt_out(&self) -> bool {
        self.gate.opt_out()
    }

    /// Record the latest position supplied by the host. Only stamped
    /// on events when `include_location` is configured; the tracker
    /// never reads sensors itself.
    pub fn update_location(&self, latitude: f64, longitude: f64) {
        *self.location.lock().unwrap() = Some((latitude, longitude));
    }

    // ============================================
    // Internals
    // ============================================

    /// Gate, stamp and persist one event. The boolean only reports
    /// admission into the queue, never delivery outcome.
    fn queue_event(&self, kind: EventKind, params: Vec<(String, String)>) -> Result<bool> {
        if !self.gate.should_enqueue() {
            tracing::trace!(kind = %kind, "Event rejected by sampling gate");
            return Ok(false);
        }

        let now = Utc::now();
        let stamp = self.identity.stamp(now);
        let event = TrackedEvent {
            created_at: now,
            visitor_id: self.identity.visitor_id().to_string(),
            session_id: stamp.session_id,
            new_visit: stamp.is_new_session,
            kind,
            params,
        };

        if !self.store.enqueue(&event)? {
            tracing::warn!(
                kind = %kind,
                max = self.config.max_queued_events,
                "Event queue full, event dropped"
            );
            return Ok(false);
        }

        if self.config.dispatch_interval_secs == 0 {
            if let Some(runtime) = &self.runtime {
                self.scheduler.spawn_dispatch(runtime);
            }
        }
        Ok(true)
    }

    /// Build the wire fields for a path-addressed event: the action
    /// path (prefixed by kind unless prefixing is off), a synthesized
    /// url, and the common fields.
    fn action_params(&self, kind: EventKind, segments: &[&str]) -> Vec<(String, String)> {
        let action = build_action_path(
            self.config.prefixing_enabled.then(|| kind.prefix()).flatten(),
            segments,
        );
        let mut params = vec![
            ("action_name".to_string(), action.clone()),
            (
                "url".to_string(),
                format!("http://{}/{}", self.host_name(), action),
            ),
        ];
        self.push_common_params(&mut params);
        params
    }

    /// Fields every event carries: custom variables and, when enabled,
    /// the last host-supplied position.
    fn push_common_params(&self, params: &mut Vec<(String, String)>) {
        let vars = self.custom_variables();
        if !vars.is_empty() {
            params.push(("_cvar".to_string(), vars.to_json()));
        }
        if self.config.include_location {
            if let Some((latitude, longitude)) = *self.location.lock().unwrap() {
                params.push(("lat".to_string(), format!("{:.6}", latitude)));
                params.push(("long".to_string(), format!("{:.6}", longitude)));
            }
        }
    }

    fn custom_variables(&self) -> CustomVariables {
        let mut vars = CustomVariables::default();
        vars.set(1, "Platform", std::env::consts::OS);
        if let Some(name) = &self.config.app_name {
            vars.set(2, "App name", name);
        }
        if let Some(version) = &self.config.app_version {
            vars.set(3, "App version", version);
        }
        vars
    }

    fn host_name(&self) -> &str {
        self.config.app_name.as_deref().unwrap_or("app")
    }
}

/// Join non-empty path segments, prepending the kind prefix if any.
fn build_action_path(prefix: Option<&str>, segments: &[&str]) -> String {
    let mut path: Vec<&str> = Vec::with_capacity(segments.len() + 1);
    if let Some(prefix) = prefix {
        path.push(prefix);
    }
    path.extend(segments.iter().filter(|segment| !segment.is_empty()).copied());
    path.join(PATH_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_action_path() {
        assert_eq!(
            build_action_path(Some("screen"), &["settings", "register"]),
            "screen/settings/register"
        );
        assert_eq!(
            build_action_path(None, &["settings", "register"]),
            "settings/register"
        );
        assert_eq!(build_action_path(Some("event"), &["ui", "", "tap"]), "event/ui/tap");
        assert_eq!(build_action_path(None, &[]), "");
    }
}
