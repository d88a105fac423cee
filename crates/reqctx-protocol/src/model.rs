//! Shared records: authenticated users, session states, activity events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated principal attached to a request or a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Login session state.
///
/// Only `Active` and `Inactive` are reached by registration and logout.
/// The remaining states are representable so that an operator can set them,
/// but nothing in the engine moves a session into or out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Undefined,
    Active,
    Inactive,
    Waiting,
    Closed,
    Started,
    Finished,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Waiting => "WAITING",
            Self::Closed => "CLOSED",
            Self::Started => "STARTED",
            Self::Finished => "FINISHED",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What produced an activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    Activity,
    PageRequest,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activity => "Activity",
            Self::PageRequest => "PageRequest",
        }
    }
}

/// A single entry in a session's activity log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub session_id: u64,
    pub kind: ActivityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}
