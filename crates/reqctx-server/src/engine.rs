//! Context engine: the service object a hosting server constructs once and
//! shares with every request.
//!
//! Owns the request context registry and the session monitor, brackets each
//! request with the start/end hooks, and forwards listener dispatch reports
//! to an optional observability hook.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use reqctx_protocol::{
    Activity, ContextError, InboundRequest, OutboundResponse, Result, SessionState,
};
use reqctx_services::{
    MemoryActivityLog, MemorySessionStorage, Session, SessionMonitor,
};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::lifecycle::DispatchReport;
use crate::registry::RequestContextRegistry;
use crate::worker::WorkerId;

/// Receives the outcome of every dispatch phase.
pub type DispatchHook = Arc<dyn Fn(WorkerId, &DispatchReport) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Running,
    Shutdown,
}

pub struct ContextEngine {
    config: EngineConfig,
    registry: Arc<RequestContextRegistry>,
    monitor: Arc<SessionMonitor>,
    state: RwLock<EngineState>,
    dispatch_hook: RwLock<Option<DispatchHook>>,
}

impl ContextEngine {
    pub fn new(config: EngineConfig, monitor: SessionMonitor) -> Self {
        let registry = RequestContextRegistry::with_view_prefix(config.view_prefix.clone());
        Self {
            config,
            registry: Arc::new(registry),
            monitor: Arc::new(monitor),
            state: RwLock::new(EngineState::Uninitialized),
            dispatch_hook: RwLock::new(None),
        }
    }

    /// Engine whose session list and activity log live only in memory.
    pub fn in_memory(config: EngineConfig) -> Self {
        let monitor = SessionMonitor::new(
            Arc::new(MemorySessionStorage::new()),
            Arc::new(MemoryActivityLog::new()),
        )
        .with_retention(config.retention.clone());
        Self::new(config, monitor)
    }

    pub fn set_dispatch_hook(&self, hook: DispatchHook) {
        *self.dispatch_hook.write() = Some(hook);
    }

    /// Load persisted sessions and start accepting requests.
    pub fn start(&self) {
        let mut state = self.state.write();
        if *state == EngineState::Running {
            return;
        }
        self.monitor.init();
        *state = EngineState::Running;
        info!(
            "Context engine started ({} sessions known)",
            self.monitor.len()
        );
    }

    /// Persist sessions and refuse further requests.
    pub fn shutdown(&self) {
        let mut state = self.state.write();
        if *state == EngineState::Shutdown {
            return;
        }
        *state = EngineState::Shutdown;
        if let Err(e) = self.monitor.persist() {
            warn!("Failed to persist sessions at shutdown: {e}");
        }
        info!("Context engine shutdown complete");
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RequestContextRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<SessionMonitor> {
        &self.monitor
    }

    /// Context of the calling worker.
    pub fn current(&self) -> Arc<RequestContext> {
        self.registry.current()
    }

    // ── Request bracketing ────────────────────────────────────────────────

    /// Bind `request`/`response` to `worker` and run the start hook.
    pub fn begin_request(
        &self,
        worker: WorkerId,
        request: Arc<dyn InboundRequest>,
        response: Arc<dyn OutboundResponse>,
    ) -> Result<Arc<RequestContext>> {
        match self.state() {
            EngineState::Running => {}
            EngineState::Uninitialized => return Err(ContextError::NotRunning),
            EngineState::Shutdown => return Err(ContextError::ShuttingDown),
        }

        let ctx = self.registry.context_for(worker);
        ctx.set_request(request);
        ctx.set_response(response);
        let report = ctx.on_request_start();
        self.report(worker, &report);
        Ok(ctx)
    }

    /// Run the end hook for `worker`, then clear and retire its context.
    pub fn end_request(&self, worker: WorkerId) -> Option<DispatchReport> {
        let ctx = self.registry.get(worker)?;
        let report = ctx.on_request_end();
        self.report(worker, &report);
        ctx.clear();
        self.registry.retire(worker);
        Some(report)
    }

    /// Start hook for the calling worker, for hosts that manage binding themselves.
    pub fn on_request_start(&self) -> DispatchReport {
        let ctx = self.current();
        let report = ctx.on_request_start();
        self.report(ctx.worker(), &report);
        report
    }

    /// End hook for the calling worker. The context stays registered.
    pub fn on_request_end(&self) -> DispatchReport {
        let ctx = self.current();
        let report = ctx.on_request_end();
        self.report(ctx.worker(), &report);
        report
    }

    fn report(&self, worker: WorkerId, report: &DispatchReport) {
        if !report.is_clean() {
            debug!(
                "{worker}: {} of {} listeners failed during {:?}",
                report.failures.len(),
                report.invoked,
                report.phase
            );
        }
        let hook = self.dispatch_hook.read().clone();
        if let Some(hook) = hook {
            hook(worker, report);
        }
    }

    // ── Session monitor facade ────────────────────────────────────────────

    /// Register a login for the external session `uid`, attributed to the
    /// calling worker's current user.
    pub fn register_user_session(&self, uid: &str) -> u64 {
        let user = self.current().current_user();
        self.monitor.register(uid, user)
    }

    pub fn unregister_user_session(&self, id: u64) -> Result<()> {
        self.monitor.unregister(id)
    }

    pub fn set_session_state(&self, id: u64, state: SessionState) -> Result<()> {
        self.monitor.set_state(id, state)
    }

    pub fn log_activity(&self, session_id: u64, action: &str) -> Activity {
        let user = self.current().current_user();
        self.monitor.log_activity(session_id, action, user)
    }

    /// Log a page request using the calling worker's bound request.
    pub fn log_page_request(&self, session_id: u64, action: &str) -> Activity {
        let ctx = self.current();
        let request = ctx.request();
        self.monitor
            .log_page_request(session_id, action, ctx.current_user(), request.as_deref())
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.monitor.sessions()
    }

    pub fn session_by_uid(&self, uid: &str) -> i64 {
        self.monitor.session_by_uid(uid)
    }

    pub fn evict_inactive_sessions(&self) -> usize {
        self.monitor.evict_inactive(Utc::now())
    }
}
