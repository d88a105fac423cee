//! In-memory session attribute stores and the table that owns them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use reqctx_protocol::{CarryoverKeys, SessionAttributeStore};
use serde_json::Value;
use tracing::{debug, info};

use crate::monitor::age_limit;

/// Attribute store for a single browser session.
#[derive(Debug)]
pub struct MemorySessionStore {
    id: String,
    created_at: DateTime<Utc>,
    last_access: Mutex<DateTime<Utc>>,
    attributes: DashMap<String, Value>,
    redirected: AtomicBool,
    just_redirected: AtomicBool,
    carryover: CarryoverKeys,
}

impl MemorySessionStore {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_access: Mutex::new(now),
            attributes: DashMap::new(),
            redirected: AtomicBool::new(false),
            just_redirected: AtomicBool::new(false),
            carryover: CarryoverKeys::new(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        *self.last_access.lock()
    }

    /// Mark the store as used by a request now.
    pub fn touch(&self) {
        *self.last_access.lock() = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl SessionAttributeStore for MemorySessionStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.get(key).map(|v| v.value().clone())
    }

    fn set_attribute(&self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    fn remove_attribute(&self, key: &str) -> Option<Value> {
        self.attributes.remove(key).map(|(_, v)| v)
    }

    fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn is_redirected(&self) -> bool {
        self.redirected.load(Ordering::Acquire)
    }

    fn set_redirected(&self, redirected: bool) {
        self.redirected.store(redirected, Ordering::Release);
    }

    fn was_just_redirected(&self) -> bool {
        self.just_redirected.load(Ordering::Acquire)
    }

    fn set_just_redirected(&self, just_redirected: bool) {
        self.just_redirected.store(just_redirected, Ordering::Release);
    }

    fn carryover_keys(&self) -> &CarryoverKeys {
        &self.carryover
    }
}

/// Process-wide table of session stores keyed by external session id.
///
/// Lookups and inserts go through `DashMap` shards, so requests on different
/// sessions never contend on a single lock. Stores leave the table through
/// [`invalidate`](Self::invalidate) (logout) or [`sweep_idle`](Self::sweep_idle).
#[derive(Debug, Default)]
pub struct SessionStoreRegistry {
    stores: DashMap<String, Arc<MemorySessionStore>>,
}

impl SessionStoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store under a freshly generated id.
    pub fn create(&self) -> Arc<MemorySessionStore> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let store = Arc::new(MemorySessionStore::new(id.clone()));
        self.stores.insert(id.clone(), store.clone());
        debug!("Session store created: {id}");
        store
    }

    pub fn get(&self, id: &str) -> Option<Arc<MemorySessionStore>> {
        self.stores.get(id).map(|e| e.value().clone())
    }

    /// Resolve `id` if it names a live store, otherwise create a new one.
    /// The flag is `true` when a new store was created. Either way the
    /// returned store counts as accessed now.
    pub fn resolve(&self, id: Option<&str>) -> (Arc<MemorySessionStore>, bool) {
        match id.and_then(|id| self.get(id)) {
            Some(store) => {
                store.touch();
                (store, false)
            }
            None => (self.create(), true),
        }
    }

    /// Drop stores not accessed for more than `max_idle_secs` before `now`.
    /// A limit too large to represent never expires anything.
    pub fn sweep_idle(&self, max_idle_secs: u64, now: DateTime<Utc>) -> usize {
        let Some(max_idle) = age_limit(max_idle_secs) else {
            return 0;
        };
        let mut removed = 0;
        self.stores.retain(|_, store| {
            let keep = now - store.last_access() <= max_idle;
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            info!("Expired {removed} idle session stores");
        }
        removed
    }

    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self.stores.remove(id).is_some();
        if removed {
            debug!("Session store invalidated: {id}");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
