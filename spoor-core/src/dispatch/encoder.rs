//! Wire encoding for queued events
//!
//! Single hits are key-value query strings; batches use one of two JSON
//! bulk shapes selected at tracker construction. The event-specific
//! fields were fixed at enqueue time; this module adds the site-level
//! fields shared by every hit.

use rand::Rng;
use serde_json::json;

use crate::config::BulkEncoding;
use crate::types::QueuedEvent;

/// Tracking API version reported with every hit.
const API_VERSION: &str = "1";

/// Ordered wire parameters for one event, site-level fields included.
fn hit_params(queued: &QueuedEvent, site_id: &str) -> Vec<(String, String)> {
    let event = &queued.event;
    let mut params: Vec<(String, String)> = vec![
        ("idsite".to_string(), site_id.to_string()),
        ("rec".to_string(), "1".to_string()),
        ("apiv".to_string(), API_VERSION.to_string()),
        ("_id".to_string(), event.visitor_id.clone()),
        // Creation time, not send time: queued events keep their
        // original timestamp on the wire
        (
            "cdt".to_string(),
            event.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ),
    ];
    if event.new_visit {
        params.push(("new_visit".to_string(), "1".to_string()));
    }
    params.extend(event.params.iter().cloned());
    // Cache buster keeps intermediaries from collapsing identical hits
    params.push((
        "r".to_string(),
        format!("{:08}", rand::thread_rng().gen_range(0..100_000_000u32)),
    ));
    params
}

/// Encode one event as a query-string hit: `?k=v&k=v&...`
pub fn encode_query(queued: &QueuedEvent, site_id: &str) -> String {
    let encoded: Vec<String> = hit_params(queued, site_id)
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect();
    format!("?{}", encoded.join("&"))
}

/// Encode a batch under the configured bulk shape. Bulk payloads carry
/// the authentication token.
pub fn encode_bulk(
    batch: &[QueuedEvent],
    site_id: &str,
    token: &str,
    encoding: BulkEncoding,
) -> serde_json::Value {
    match encoding {
        BulkEncoding::Current => json!({
            "requests": batch
                .iter()
                .map(|queued| encode_query(queued, site_id))
                .collect::<Vec<_>>(),
            "token_auth": token,
        }),
        BulkEncoding::Legacy => json!({
            "events": batch
                .iter()
                .map(|queued| {
                    let mut object = serde_json::Map::new();
                    for (key, value) in hit_params(queued, site_id) {
                        object.insert(key, serde_json::Value::String(value));
                    }
                    serde_json::Value::Object(object)
                })
                .collect::<Vec<_>>(),
            "token_auth": token,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, TrackedEvent};
    use chrono::{TimeZone, Utc};

    fn make_queued(seq: i64, new_visit: bool) -> QueuedEvent {
        QueuedEvent {
            seq,
            event: TrackedEvent {
                created_at: Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 45).unwrap(),
                visitor_id: "0123456789abcdef".to_string(),
                session_id: "session-1".to_string(),
                new_visit,
                kind: EventKind::Screen,
                params: vec![
                    ("action_name".to_string(), "screen/settings".to_string()),
                    ("url".to_string(), "http://demo/screen/settings".to_string()),
                ],
            },
        }
    }

    #[test]
    fn test_query_contains_site_and_event_fields() {
        let query = encode_query(&make_queued(1, false), "7");

        assert!(query.starts_with("?idsite=7&rec=1&apiv=1"));
        assert!(query.contains("_id=0123456789abcdef"));
        assert!(query.contains("cdt=2024-05-17%2012%3A30%3A45"));
        assert!(query.contains("action_name=screen%2Fsettings"));
        assert!(!query.contains("new_visit"));
    }

    #[test]
    fn test_query_marks_new_visit() {
        let query = encode_query(&make_queued(1, true), "7");
        assert!(query.contains("new_visit=1"));
    }

    #[test]
    fn test_current_bulk_shape() {
        let batch = [make_queued(1, false), make_queued(2, false)];
        let body = encode_bulk(&batch, "7", "secret-token", BulkEncoding::Current);

        let requests = body["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].as_str().unwrap().starts_with("?idsite=7"));
        assert_eq!(body["token_auth"], "secret-token");
    }

    #[test]
    fn test_legacy_bulk_shape() {
        let batch = [make_queued(1, false)];
        let body = encode_bulk(&batch, "7", "secret-token", BulkEncoding::Legacy);

        let events = body["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["idsite"], "7");
        assert_eq!(events[0]["action_name"], "screen/settings");
        assert_eq!(body["token_auth"], "secret-token");
    }
}
