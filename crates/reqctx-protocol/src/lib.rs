//! Request context protocol types.
//!
//! Leaf crate shared by every layer: error codes, user/session/activity
//! records, and the traits a hosting server implements so the engine can
//! read the inbound request, write the response, and reach the session store.

pub mod error;
pub mod handles;
pub mod model;

pub use error::{ContextError, ContextErrorCode, ErrorBody, Result};
pub use handles::{
    CarryoverKeys, InboundRequest, OutboundResponse, SessionAttributeStore, marker_key,
};
pub use model::{Activity, ActivityKind, SessionState, User};
