//! Context engine error types and their stable numeric codes.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Stable error codes, reported alongside the message when an error crosses
/// the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextErrorCode {
    NoRequestBound,
    NoSession,
    SessionNotFound,
    SessionUnavailable,
    Storage,
    Serialization,
    Io,
    NotRunning,
    ShuttingDown,

    Custom(i32),
}

impl ContextErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::NoRequestBound => -33001,
            Self::NoSession => -33002,
            Self::SessionNotFound => -33003,
            Self::SessionUnavailable => -33004,
            Self::Storage => -33010,
            Self::Serialization => -33011,
            Self::Io => -33012,
            Self::NotRunning => -33020,
            Self::ShuttingDown => -33021,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            -33001 => Self::NoRequestBound,
            -33002 => Self::NoSession,
            -33003 => Self::SessionNotFound,
            -33004 => Self::SessionUnavailable,
            -33010 => Self::Storage,
            -33011 => Self::Serialization,
            -33012 => Self::Io,
            -33020 => Self::NotRunning,
            -33021 => Self::ShuttingDown,
            c => Self::Custom(c),
        }
    }
}

/// Errors raised by the context engine and its collaborators.
///
/// Steady-state absence (no request bound, no session) is normally reported
/// as `None` by accessors; these variants exist for the call sites that need
/// to say *why* something is missing.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("no request is bound to the current worker")]
    NoRequestBound,

    #[error("the current request has no session")]
    NoSession,

    #[error("session not found: {id}")]
    SessionNotFound { id: u64 },

    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("context engine is not running")]
    NotRunning,

    #[error("context engine is shutting down")]
    ShuttingDown,
}

impl ContextError {
    pub fn error_code(&self) -> ContextErrorCode {
        match self {
            Self::NoRequestBound => ContextErrorCode::NoRequestBound,
            Self::NoSession => ContextErrorCode::NoSession,
            Self::SessionNotFound { .. } => ContextErrorCode::SessionNotFound,
            Self::SessionUnavailable(_) => ContextErrorCode::SessionUnavailable,
            Self::Storage(_) => ContextErrorCode::Storage,
            Self::Serialization(_) => ContextErrorCode::Serialization,
            Self::Io(_) => ContextErrorCode::Io,
            Self::NotRunning => ContextErrorCode::NotRunning,
            Self::ShuttingDown => ContextErrorCode::ShuttingDown,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Wire form of the error, as rendered in HTTP error bodies.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.error_code().code(),
            message: self.to_string(),
            data: match self {
                Self::SessionNotFound { id } => Some(json!({ "sessionId": id })),
                _ => None,
            },
        }
    }
}

/// Serialized error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

pub type Result<T> = std::result::Result<T, ContextError>;
