//! HTTP implementations of the request and response handles.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, Request};
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use parking_lot::Mutex;
use reqctx_protocol::{
    ContextError, InboundRequest, OutboundResponse, Result, SessionAttributeStore,
};
use reqctx_services::MemorySessionStore;

/// Snapshot of an inbound HTTP request, taken before the handler runs.
#[derive(Debug)]
pub struct HttpRequestHandle {
    context_path: String,
    uri: String,
    scheme: String,
    parameters: Vec<(String, String)>,
    remote_addr: Option<String>,
    session: Option<Arc<MemorySessionStore>>,
}

impl HttpRequestHandle {
    pub fn from_request(
        req: &Request,
        context_path: impl Into<String>,
        session: Option<Arc<MemorySessionStore>>,
    ) -> Self {
        let parameters = Query::<Vec<(String, String)>>::try_from_uri(req.uri())
            .map(|Query(params)| params)
            .unwrap_or_default();
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let scheme = req.uri().scheme_str().unwrap_or("http").to_string();

        Self {
            context_path: context_path.into(),
            uri: req.uri().path().to_string(),
            scheme,
            parameters,
            remote_addr,
            session,
        }
    }
}

impl InboundRequest for HttpRequestHandle {
    fn context_path(&self) -> &str {
        &self.context_path
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn parameters(&self) -> Vec<(String, String)> {
        self.parameters.clone()
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }

    fn session(&self) -> Result<Arc<dyn SessionAttributeStore>> {
        self.session
            .clone()
            .map(|s| s as Arc<dyn SessionAttributeStore>)
            .ok_or(ContextError::NoSession)
    }
}

/// Records the redirect a handler asked for; the middleware turns it into a `302`.
#[derive(Debug, Default)]
pub struct HttpResponseHandle {
    location: Mutex<Option<String>>,
}

impl HttpResponseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_redirect(&self) -> Option<String> {
        self.location.lock().take()
    }

    pub fn redirect_location(&self) -> Option<String> {
        self.location.lock().clone()
    }
}

impl OutboundResponse for HttpResponseHandle {
    fn send_redirect(&self, location: &str) -> std::io::Result<()> {
        let mut slot = self.location.lock();
        if let Some(existing) = slot.as_deref() {
            return Err(std::io::Error::other(format!(
                "response already committed to a redirect to {existing}"
            )));
        }
        *slot = Some(location.to_string());
        Ok(())
    }
}

/// Value of cookie `name` from the request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}
