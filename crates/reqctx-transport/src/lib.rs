//! reqctx Transport Layer
//!
//! Hosts the context engine behind HTTP. The transport layer handles:
//! - Worker identity per request
//! - Session resolution from a cookie
//! - Request start/end bracketing and page-request logging
//! - Turning recorded redirects into `302` responses

pub mod handles;
pub mod server;

pub use handles::{HttpRequestHandle, HttpResponseHandle, cookie_value};
pub use server::{TransportConfig, TransportServer, USER_KEY, router};
