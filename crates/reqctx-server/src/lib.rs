//! Request context engine.
//!
//! Gives each worker serving a request private storage for that request's
//! state, runs lifecycle listeners at request boundaries, carries values from
//! one request into the next on the same session, and fronts the session
//! monitor for login and activity tracking.

pub mod carryover;
pub mod config;
pub mod context;
pub mod engine;
pub mod lifecycle;
pub mod registry;
pub mod worker;

pub use config::EngineConfig;
pub use context::{RequestContext, absolute_node_path};
pub use engine::{ContextEngine, DispatchHook, EngineState};
pub use lifecycle::{
    DispatchReport, FailureKind, FnListener, LifecycleListener, ListenerError, ListenerFailure,
    Phase,
};
pub use registry::{RequestContextRegistry, WorkerGuard};
pub use worker::WorkerId;
