//! Carrying a value from the current request into exactly the next one.
//!
//! A pushed value is stored under its key together with a marker under
//! `"_" + key`, and the key joins the session's carryover set. The next
//! request's start hook removes the marker. At any end hook, a key whose
//! marker is gone has had its extra request and is purged along with its
//! value. Markers still present mean the value has not yet been served.

use reqctx_protocol::{SessionAttributeStore, marker_key};
use serde_json::Value;
use tracing::info;

/// Value stored under the marker key.
pub const MARKER_VALUE: Value = Value::Bool(true);

/// Store `value` for the next request on `session`.
pub fn push(session: &dyn SessionAttributeStore, key: &str, value: Value) {
    session.carryover_keys().insert(key);
    session.set_attribute(key, value);
    session.set_attribute(&marker_key(key), MARKER_VALUE);
}

/// Start-of-request pass: remove the marker of every carried key that still has one.
/// Returns the keys whose marker was consumed.
pub fn consume_markers(session: &dyn SessionAttributeStore) -> Vec<String> {
    let keys = session.carryover_keys().lock();
    let mut consumed = Vec::new();
    for key in keys.iter() {
        let marker = marker_key(key);
        if session.attribute(&marker).is_some() {
            info!("Removing session key marker for {key}");
            session.remove_attribute(&marker);
            consumed.push(key.clone());
        }
    }
    consumed
}

/// End-of-request pass: purge every carried key whose marker is gone.
/// Returns the purged keys.
pub fn collect_stale(session: &dyn SessionAttributeStore) -> Vec<String> {
    let mut keys = session.carryover_keys().lock();
    let mut purged = Vec::new();
    keys.retain(|key| {
        if session.attribute(&marker_key(key)).is_some() {
            return true;
        }
        info!("Removing carried session key {key}");
        session.remove_attribute(key);
        purged.push(key.clone());
        false
    });
    purged
}
