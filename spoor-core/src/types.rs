//! Core domain types for spoor
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Visitor** | An installation of the host application, identified by a durable random id |
//! | **Session** | A bounded run of activity; its id rolls over after inactivity exceeds a timeout |
//! | **TrackedEvent** | One analytics hit, immutable once enqueued |
//! | **QueuedEvent** | The durable form of a TrackedEvent: payload plus its enqueue sequence |
//! | **Dispatch cycle** | One execution of batch-read, encode, send, remove-or-retain |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================
// Event kinds
// ============================================

/// What a tracked event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A screen view, possibly hierarchical ("settings/register")
    Screen,
    /// A category/action/label event
    Event,
    /// A caught exception or error
    Exception,
    /// A social network interaction
    Social,
    /// A goal conversion
    Goal,
    /// A search performed in the application
    Search,
}

impl EventKind {
    /// Returns the identifier used in queue storage
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Screen => "screen",
            EventKind::Event => "event",
            EventKind::Exception => "exception",
            EventKind::Social => "social",
            EventKind::Goal => "goal",
            EventKind::Search => "search",
        }
    }

    /// Action-path prefix applied when prefixing is enabled.
    ///
    /// Goals and searches are not path-addressed and carry no prefix.
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            EventKind::Screen => Some("screen"),
            EventKind::Event => Some("event"),
            EventKind::Exception => Some("exception"),
            EventKind::Social => Some("social"),
            EventKind::Goal | EventKind::Search => None,
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "screen" => Ok(EventKind::Screen),
            "event" => Ok(EventKind::Event),
            "exception" => Ok(EventKind::Exception),
            "social" => Ok(EventKind::Social),
            "goal" => Ok(EventKind::Goal),
            "search" => Ok(EventKind::Search),
            _ => Err(format!("unknown event kind: {}", s)),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Events
// ============================================

/// An analytics event as handed to the queue. Immutable once enqueued.
///
/// `params` holds the ordered kind-specific wire fields built by the
/// tracking call (action path, event category, custom variables, ...);
/// the dispatcher adds the site-level fields shared by every hit at
/// encode time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedEvent {
    /// When the event was generated by the application
    pub created_at: DateTime<Utc>,
    /// Durable per-installation identifier
    pub visitor_id: String,
    /// Session the event belongs to
    pub session_id: String,
    /// True on the first event of a fresh session
    pub new_visit: bool,
    /// Event kind
    pub kind: EventKind,
    /// Ordered kind-specific wire fields
    pub params: Vec<(String, String)>,
}

/// The durable form of a [`TrackedEvent`].
///
/// `seq` is assigned at enqueue time, strictly increasing and never
/// reused within a queue lifetime; it defines delivery order.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Enqueue sequence number
    pub seq: i64,
    /// The event payload
    pub event: TrackedEvent,
}

// ============================================
// Custom variables
// ============================================

/// Visit-scope custom variables bound to fixed small indices.
///
/// Index 1 carries the platform, 2 the application name and 3 the
/// application version; hosts may add further indices up to 5.
#[derive(Debug, Clone, Default)]
pub struct CustomVariables {
    vars: BTreeMap<u8, (String, String)>,
}

impl CustomVariables {
    /// Bind a name/value pair to an index, replacing any previous binding.
    pub fn set(&mut self, index: u8, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(index, (name.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Serialize to the wire shape: `{"1":["Platform","linux"],...}`
    pub fn to_json(&self) -> String {
        let mut obj = serde_json::Map::new();
        for (index, (name, value)) in &self.vars {
            obj.insert(
                index.to_string(),
                serde_json::json!([name, value]),
            );
        }
        serde_json::Value::Object(obj).to_string()
    }
}
