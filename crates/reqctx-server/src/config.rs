//! Engine configuration.
//!
//! Read from a JSON file that may contain `//` and `/* */` comments. Missing
//! fields fall back to their defaults.

use std::path::Path;

use reqctx_protocol::{ContextError, Result};
use reqctx_services::RetentionPolicy;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::DEFAULT_VIEW_PREFIX;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Path prefix the application is mounted under.
    pub context_path: String,
    /// Segment between the context path and a node path in view URLs.
    pub view_prefix: String,
    /// Cookie carrying the external session id.
    pub session_cookie: String,
    pub retention: RetentionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_path: String::new(),
            view_prefix: DEFAULT_VIEW_PREFIX.into(),
            session_cookie: "RCXSESSION".into(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(&strip_jsonc_comments(content))?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ContextError::storage(format!("read config {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&content)?;
        info!("Loaded engine config from {}", path.display());
        Ok(config)
    }
}

/// Remove `//` line comments and `/* */` block comments outside string literals.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            match ch {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        let next = chars.peek().copied();
        match (ch, next) {
            ('"', _) => {
                in_string = true;
                out.push(ch);
            }
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(ch),
        }
    }

    out
}
