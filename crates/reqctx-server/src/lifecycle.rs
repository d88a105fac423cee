//! Request lifecycle listeners and their dispatch.
//!
//! Listeners run in registration order. The start phase leaves the list
//! intact; the end phase removes each listener right after invoking it, so a
//! listener lives for one request unless it is registered again.
//!
//! Both phases hold the list lock for their whole iteration. A listener must
//! not register another listener on the same context from inside a hook.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Error a listener reports from one of its hooks.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ListenerError(String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Callback invoked at request boundaries.
pub trait LifecycleListener: Send + Sync {
    /// Listener name, reported in dispatch failures.
    fn name(&self) -> &str;

    /// Called at the start of every request while registered.
    fn on_request_start(&self) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Called once at the end of the request; the listener is then dropped.
    fn on_request_end(&self) -> Result<(), ListenerError> {
        Ok(())
    }
}

type Hook = Box<dyn Fn() -> Result<(), ListenerError> + Send + Sync>;

/// Listener built from closures.
pub struct FnListener {
    name: String,
    start: Option<Hook>,
    end: Option<Hook>,
}

impl FnListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            end: None,
        }
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.start = Some(Box::new(f));
        self
    }

    pub fn on_end<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.end = Some(Box::new(f));
        self
    }
}

impl LifecycleListener for FnListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_request_start(&self) -> Result<(), ListenerError> {
        self.start.as_ref().map_or(Ok(()), |f| f())
    }

    fn on_request_end(&self) -> Result<(), ListenerError> {
        self.end.as_ref().map_or(Ok(()), |f| f())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "camelCase")]
pub enum FailureKind {
    Error(String),
    Panicked(String),
}

/// One listener hook that did not complete normally.
#[derive(Debug, Clone, Serialize)]
pub struct ListenerFailure {
    pub listener: String,
    pub phase: Phase,
    pub kind: FailureKind,
}

/// Outcome of one dispatch phase.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub phase: Phase,
    pub invoked: usize,
    pub failures: Vec<ListenerFailure>,
}

impl DispatchReport {
    pub fn empty(phase: Phase) -> Self {
        Self {
            phase,
            invoked: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered listener list guarded by a single lock.
#[derive(Default)]
pub struct ListenerList {
    listeners: Mutex<Vec<Arc<dyn LifecycleListener>>>,
}

impl ListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.listeners.lock().iter().map(|l| l.name().to_string()).collect()
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    /// Invoke every listener's start hook. The list is left unchanged.
    pub fn dispatch_start(&self) -> DispatchReport {
        let listeners = self.listeners.lock();
        let mut report = DispatchReport::empty(Phase::Start);
        for listener in listeners.iter() {
            report.invoked += 1;
            if let Some(kind) = invoke(listener.as_ref(), Phase::Start) {
                report.failures.push(ListenerFailure {
                    listener: listener.name().to_string(),
                    phase: Phase::Start,
                    kind,
                });
            }
        }
        report
    }

    /// Invoke every listener's end hook, removing each one after its call.
    pub fn dispatch_end(&self) -> DispatchReport {
        let mut listeners = self.listeners.lock();
        let mut report = DispatchReport::empty(Phase::End);
        for listener in listeners.drain(..) {
            report.invoked += 1;
            if let Some(kind) = invoke(listener.as_ref(), Phase::End) {
                report.failures.push(ListenerFailure {
                    listener: listener.name().to_string(),
                    phase: Phase::End,
                    kind,
                });
            }
        }
        report
    }
}

fn invoke(listener: &dyn LifecycleListener, phase: Phase) -> Option<FailureKind> {
    let outcome = catch_unwind(AssertUnwindSafe(|| match phase {
        Phase::Start => listener.on_request_start(),
        Phase::End => listener.on_request_end(),
    }));
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(FailureKind::Error(e.to_string())),
        Err(payload) => Some(FailureKind::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}
