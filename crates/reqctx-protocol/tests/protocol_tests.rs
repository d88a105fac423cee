//! Protocol layer tests: error codes, records, carryover key set.

use std::sync::Arc;

use reqctx_protocol::*;
use serde_json::json;

// ─────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────

#[test]
fn error_codes_are_stable() {
    assert_eq!(ContextErrorCode::NoRequestBound.code(), -33001);
    assert_eq!(ContextErrorCode::SessionNotFound.code(), -33003);
    assert_eq!(ContextErrorCode::ShuttingDown.code(), -33021);
    assert_eq!(ContextErrorCode::Custom(-1).code(), -1);
}

#[test]
fn error_code_from_code_maps_known_and_custom() {
    assert_eq!(ContextErrorCode::from_code(-33003), ContextErrorCode::SessionNotFound);
    assert_eq!(ContextErrorCode::from_code(-33020), ContextErrorCode::NotRunning);
    assert_eq!(ContextErrorCode::from_code(42), ContextErrorCode::Custom(42));
}

#[test]
fn session_not_found_body_carries_id() {
    let err = ContextError::SessionNotFound { id: 7 };
    assert_eq!(err.error_code(), ContextErrorCode::SessionNotFound);
    let body = err.to_body();
    assert_eq!(body.code, -33003);
    assert_eq!(body.message, "session not found: 7");
    assert_eq!(body.data, Some(json!({ "sessionId": 7 })));
}

#[test]
fn error_body_omits_missing_data() {
    let body = ContextError::NoSession.to_body();
    let value = serde_json::to_value(&body).unwrap();
    assert!(value.get("data").is_none());
    assert_eq!(value["code"], -33002);
}

#[test]
fn io_errors_convert() {
    let err: ContextError = std::io::Error::other("disk gone").into();
    assert_eq!(err.error_code(), ContextErrorCode::Io);
    assert!(err.to_string().contains("disk gone"));
}

// ─────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────

#[test]
fn session_state_serializes_in_upper_case() {
    assert_eq!(serde_json::to_value(SessionState::Active).unwrap(), json!("ACTIVE"));
    assert_eq!(serde_json::to_value(SessionState::Inactive).unwrap(), json!("INACTIVE"));
    let parsed: SessionState = serde_json::from_value(json!("WAITING")).unwrap();
    assert_eq!(parsed, SessionState::Waiting);
    assert_eq!(SessionState::default(), SessionState::Undefined);
    assert_eq!(SessionState::Finished.to_string(), "FINISHED");
}

#[test]
fn activity_serializes_camel_case() {
    let now = chrono::Utc::now();
    let activity = Activity {
        session_id: 3,
        kind: ActivityKind::PageRequest,
        name: None,
        start_timestamp: now,
        end_timestamp: now,
        text: Some("{}".into()),
        user: Some(User::new("u1", "alice")),
    };
    let value = serde_json::to_value(&activity).unwrap();
    assert_eq!(value["sessionId"], 3);
    assert_eq!(value["kind"], "pageRequest");
    assert_eq!(value["user"]["name"], "alice");
    assert!(value.get("name").is_none());
    assert!(value.get("startTimestamp").is_some());
}

// ─────────────────────────────────────────────────────────────────────
// Carryover keys
// ─────────────────────────────────────────────────────────────────────

#[test]
fn marker_key_prefixes_underscore() {
    assert_eq!(marker_key("notice"), "_notice");
    assert_eq!(marker_key(""), "_");
}

#[test]
fn carryover_keys_deduplicate() {
    let keys = CarryoverKeys::new();
    assert!(keys.is_empty());
    assert!(keys.insert("a"));
    assert!(!keys.insert("a"));
    assert!(keys.insert("b"));
    assert_eq!(keys.len(), 2);
    assert!(keys.contains("a"));
    assert_eq!(keys.snapshot(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn carryover_keys_shared_across_threads() {
    let keys = Arc::new(CarryoverKeys::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let keys = keys.clone();
            std::thread::spawn(move || {
                for j in 0..50 {
                    keys.insert(format!("k{i}-{j}"));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(keys.len(), 400);
}

// ─────────────────────────────────────────────────────────────────────
// InboundRequest defaults
// ─────────────────────────────────────────────────────────────────────

struct StubRequest;

impl InboundRequest for StubRequest {
    fn context_path(&self) -> &str {
        "/app"
    }
    fn uri(&self) -> &str {
        "/app/view/home"
    }
    fn parameters(&self) -> Vec<(String, String)> {
        vec![
            ("q".into(), "first".into()),
            ("q".into(), "second".into()),
            ("page".into(), "2".into()),
        ]
    }
    fn remote_addr(&self) -> Option<String> {
        Some("10.0.0.1".into())
    }
    fn session(&self) -> Result<Arc<dyn SessionAttributeStore>> {
        Err(ContextError::NoSession)
    }
}

#[test]
fn inbound_request_defaults() {
    let req = StubRequest;
    assert_eq!(req.scheme(), "http");
    assert_eq!(req.parameter("q").as_deref(), Some("first"));
    assert_eq!(req.parameter("page").as_deref(), Some("2"));
    assert_eq!(req.parameter("missing"), None);
    assert_eq!(req.remote_host().as_deref(), Some("10.0.0.1"));
    assert!(req.session().is_err());
}
