//! Collaborator implementations used by the context engine.
//!
//! Session attribute stores, activity log sinks, session-list persistence,
//! and the [`SessionMonitor`] that tracks login sessions.

pub mod activity_log;
pub mod monitor;
pub mod session_store;
pub mod storage;

pub use activity_log::{ActivityLog, JsonlActivityLog, MemoryActivityLog};
pub use monitor::{RetentionPolicy, SESSION_ID_KEY, Session, SessionMonitor};
pub use session_store::{MemorySessionStore, SessionStoreRegistry};
pub use storage::{JsonFileSessionStorage, MemorySessionStorage, SessionStorage};
