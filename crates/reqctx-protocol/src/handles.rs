//! Contracts for the collaborators the engine talks to: the inbound request,
//! the outbound response, and the session-scoped attribute store.
//!
//! The engine never constructs these itself. A hosting server supplies
//! implementations (see the transport crate for the HTTP ones) and tests
//! supply in-memory fakes.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;

use crate::error::Result;

/// Read-only view of the request currently being served.
pub trait InboundRequest: Send + Sync {
    /// Path prefix the application is mounted under (may be empty).
    fn context_path(&self) -> &str;

    /// Request URI without the query string.
    fn uri(&self) -> &str;

    fn scheme(&self) -> &str {
        "http"
    }

    /// Request parameters in the order they were received.
    fn parameters(&self) -> Vec<(String, String)>;

    fn parameter(&self, name: &str) -> Option<String> {
        self.parameters()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    fn remote_addr(&self) -> Option<String>;

    fn remote_host(&self) -> Option<String> {
        self.remote_addr()
    }

    /// The session this request belongs to, creating one if the host allows it.
    fn session(&self) -> Result<Arc<dyn SessionAttributeStore>>;
}

/// Write side of the request currently being served.
pub trait OutboundResponse: Send + Sync {
    /// Instruct the client to load `location` instead.
    fn send_redirect(&self, location: &str) -> std::io::Result<()>;
}

/// Session-scoped key/value store with redirect bookkeeping.
///
/// Shared by every request on one browser session, possibly from several
/// workers at once, so implementations must be internally synchronized.
pub trait SessionAttributeStore: Send + Sync {
    /// External (host-assigned) session identifier.
    fn id(&self) -> &str;

    fn attribute(&self, key: &str) -> Option<Value>;

    fn set_attribute(&self, key: &str, value: Value);

    fn remove_attribute(&self, key: &str) -> Option<Value>;

    fn attribute_names(&self) -> Vec<String>;

    fn is_redirected(&self) -> bool;

    fn set_redirected(&self, redirected: bool);

    fn was_just_redirected(&self) -> bool;

    fn set_just_redirected(&self, just_redirected: bool);

    /// Keys currently being carried from one request into the next.
    fn carryover_keys(&self) -> &CarryoverKeys;
}

/// Set of carryover keys for one session, guarded by its own lock.
#[derive(Debug, Default)]
pub struct CarryoverKeys {
    keys: Mutex<BTreeSet<String>>,
}

impl CarryoverKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the set. Hold the guard for the whole of a scan-and-modify pass.
    pub fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.keys.lock()
    }

    pub fn insert(&self, key: impl Into<String>) -> bool {
        self.keys.lock().insert(key.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.keys.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

/// Shadow key used to detect whether a carried value has been picked up.
pub fn marker_key(key: &str) -> String {
    format!("_{key}")
}
