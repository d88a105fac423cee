//! Per-worker request context.
//!
//! A [`RequestContext`] holds everything private to the request a worker is
//! serving: the request and response handles, the authenticated user, the
//! node path being rendered, request-scoped attributes, and lifecycle
//! listeners. Contexts are handed out by the registry and are only touched
//! by their own worker under normal operation; the locks make them `Sync`
//! so they can live behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use reqctx_protocol::{InboundRequest, OutboundResponse, SessionAttributeStore, User};
use serde_json::Value;
use tracing::{debug, warn};

use crate::carryover;
use crate::lifecycle::{DispatchReport, LifecycleListener, ListenerList};
use crate::worker::WorkerId;

pub const DEFAULT_VIEW_PREFIX: &str = "/view";

pub struct RequestContext {
    worker: WorkerId,
    view_prefix: String,
    request: RwLock<Option<Arc<dyn InboundRequest>>>,
    response: RwLock<Option<Arc<dyn OutboundResponse>>>,
    current_user: RwLock<Option<User>>,
    current_node_path: RwLock<Option<String>>,
    attributes: RwLock<HashMap<String, Value>>,
    listeners: ListenerList,
}

impl RequestContext {
    pub fn new(worker: WorkerId) -> Self {
        Self::with_view_prefix(worker, DEFAULT_VIEW_PREFIX)
    }

    pub fn with_view_prefix(worker: WorkerId, view_prefix: impl Into<String>) -> Self {
        Self {
            worker,
            view_prefix: view_prefix.into(),
            request: RwLock::new(None),
            response: RwLock::new(None),
            current_user: RwLock::new(None),
            current_node_path: RwLock::new(None),
            attributes: RwLock::new(HashMap::new()),
            listeners: ListenerList::new(),
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    // ── Handles ───────────────────────────────────────────────────────────

    pub fn set_request(&self, request: Arc<dyn InboundRequest>) {
        *self.request.write() = Some(request);
    }

    pub fn request(&self) -> Option<Arc<dyn InboundRequest>> {
        self.request.read().clone()
    }

    pub fn set_response(&self, response: Arc<dyn OutboundResponse>) {
        *self.response.write() = Some(response);
    }

    pub fn response(&self) -> Option<Arc<dyn OutboundResponse>> {
        self.response.read().clone()
    }

    /// Session of the bound request. `None` when no request is bound or the
    /// request cannot produce a session.
    pub fn session(&self) -> Option<Arc<dyn SessionAttributeStore>> {
        let request = self.request()?;
        match request.session() {
            Ok(session) => Some(session),
            Err(e) => {
                debug!("{}: no session available: {e}", self.worker);
                None
            }
        }
    }

    // ── Identity and rendering state ──────────────────────────────────────

    pub fn set_current_user(&self, user: Option<User>) {
        *self.current_user.write() = user;
    }

    pub fn current_user(&self) -> Option<User> {
        self.current_user.read().clone()
    }

    pub fn set_current_node_path(&self, path: Option<String>) {
        *self.current_node_path.write() = path;
    }

    pub fn current_node_path(&self) -> Option<String> {
        self.current_node_path.read().clone()
    }

    // ── Request attributes ────────────────────────────────────────────────

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.attributes.write().insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.read().get(key).cloned()
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        self.attributes.write().remove(key)
    }

    // ── Listeners ─────────────────────────────────────────────────────────

    pub fn register_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.register(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn listener_names(&self) -> Vec<String> {
        self.listeners.names()
    }

    // ── Redirect and carryover ────────────────────────────────────────────

    /// Absolute URL of `node_path` under the bound request's context path.
    pub fn absolute_node_path(&self, node_path: &str) -> Option<String> {
        let request = self.request()?;
        Some(absolute_node_path(
            request.context_path(),
            &self.view_prefix,
            node_path,
        ))
    }

    /// Redirect the client to the view of `node_path`.
    ///
    /// Needs both a request and a response bound. Once the redirect is sent,
    /// marks the session as just redirected so the next request's start hook
    /// keeps the redirected flag. A failed send leaves the flags untouched.
    /// Returns the target URL, or `None` if nothing was sent.
    pub fn redirect(&self, node_path: &str) -> Option<String> {
        let (request, response) = match (self.request(), self.response()) {
            (Some(req), Some(resp)) => (req, resp),
            _ => return None,
        };
        let url = absolute_node_path(request.context_path(), &self.view_prefix, node_path);

        match response.send_redirect(&url) {
            Ok(()) => {
                if let Some(session) = self.session() {
                    session.set_redirected(true);
                    session.set_just_redirected(true);
                }
                Some(url)
            }
            Err(e) => {
                warn!("Exception while trying to redirect to {url}: {e}");
                None
            }
        }
    }

    /// Make `value` readable as a session attribute on the next request.
    /// Returns `false` when there is no session to carry it in.
    pub fn push_to_next_request(&self, key: &str, value: Value) -> bool {
        match self.session() {
            Some(session) => {
                carryover::push(session.as_ref(), key, value);
                true
            }
            None => false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    pub fn on_request_start(&self) -> DispatchReport {
        if let Some(session) = self.session() {
            if session.was_just_redirected() {
                session.set_just_redirected(false);
            } else {
                session.set_redirected(false);
            }
            carryover::consume_markers(session.as_ref());
        }
        self.listeners.dispatch_start()
    }

    pub fn on_request_end(&self) -> DispatchReport {
        let report = self.listeners.dispatch_end();
        if let Some(session) = self.session() {
            carryover::collect_stale(session.as_ref());
        }
        report
    }

    /// Reset every request-scoped field. Listeners still registered are dropped.
    pub fn clear(&self) {
        *self.request.write() = None;
        *self.response.write() = None;
        *self.current_user.write() = None;
        *self.current_node_path.write() = None;
        self.attributes.write().clear();
        self.listeners.clear();
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("worker", &self.worker)
            .field("has_request", &self.request.read().is_some())
            .field("current_user", &*self.current_user.read())
            .field("current_node_path", &*self.current_node_path.read())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// `<context_path><view_prefix><node_path>` with every `&` in the node path escaped.
pub fn absolute_node_path(context_path: &str, view_prefix: &str, node_path: &str) -> String {
    format!("{context_path}{view_prefix}{}", node_path.replace('&', "%26"))
}
