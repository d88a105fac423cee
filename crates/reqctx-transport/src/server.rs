//! HTTP transport server using Axum.
//!
//! Every request passes through [`bind_request_context`], which gives it a
//! fresh worker identity, resolves its session from a cookie, and brackets
//! the handler with the engine's start and end hooks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use reqctx_protocol::{ContextError, InboundRequest, SessionAttributeStore, User};
use reqctx_server::{ContextEngine, WorkerId};
use reqctx_services::{MemorySessionStore, SESSION_ID_KEY, SessionStoreRegistry};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::handles::{HttpRequestHandle, HttpResponseHandle, cookie_value};

/// Session attribute holding the logged-in user.
pub const USER_KEY: &str = "user";

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Enable CORS
    pub enable_cors: bool,
    /// Log every request at info level instead of debug
    pub verbose_logging: bool,
    /// Session stores unused for longer than this are dropped; `None` keeps them
    pub session_idle_secs: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 7080,
            hostname: "127.0.0.1".into(),
            enable_cors: false,
            verbose_logging: false,
            session_idle_secs: Some(1800),
        }
    }
}

/// Shared state for the transport server.
struct AppState {
    engine: Arc<ContextEngine>,
    stores: Arc<SessionStoreRegistry>,
    config: TransportConfig,
}

/// Build the application router around `engine`.
pub fn router(
    config: TransportConfig,
    engine: Arc<ContextEngine>,
    stores: Arc<SessionStoreRegistry>,
) -> Router {
    let enable_cors = config.enable_cors;
    let state = Arc::new(AppState {
        engine,
        stores,
        config,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/view", get(view_root_handler))
        .route("/view/{*path}", get(view_handler))
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
        .route("/flash", post(flash_handler))
        .route("/sessions", get(sessions_handler))
        .route("/sessions/lookup", get(session_lookup_handler))
        .route("/sessions/evict", post(evict_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bind_request_context,
        ))
        .with_state(state);

    if enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Owns the listener task and its shutdown channel.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Idle session store sweeper
    sweeper: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
}

impl TransportServer {
    /// Bind and start serving. The engine should already be started.
    pub async fn start(
        config: TransportConfig,
        engine: Arc<ContextEngine>,
        stores: Arc<SessionStoreRegistry>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!("reqctx transport listening on http://{}:{}", config.hostname, actual_port);

        let sweeper = config
            .session_idle_secs
            .map(|idle| spawn_store_sweeper(stores.clone(), idle));

        let app = router(config, engine, stores);
        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            sweeper,
            port: actual_port,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        info!("reqctx transport server stopped");
    }
}

/// Sweep idle session stores once a minute, or once per idle period if shorter.
fn spawn_store_sweeper(
    stores: Arc<SessionStoreRegistry>,
    idle_secs: u64,
) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(idle_secs.clamp(1, 60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            stores.sweep_idle(idle_secs, Utc::now());
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Request bracketing
// ─────────────────────────────────────────────────────────────────────────────

async fn bind_request_context(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let engine = state.engine.clone();
    let cookie_name = engine.config().session_cookie.clone();

    let cookie = cookie_value(req.headers(), &cookie_name);
    let (session, created) = state.stores.resolve(cookie.as_deref());

    let request_handle = Arc::new(HttpRequestHandle::from_request(
        &req,
        engine.config().context_path.clone(),
        Some(session.clone()),
    ));
    let response_handle = Arc::new(HttpResponseHandle::new());

    if state.config.verbose_logging {
        info!("{} {} (session {})", req.method(), req.uri(), session.id());
    } else {
        debug!("{} {} (session {})", req.method(), req.uri(), session.id());
    }

    let worker = WorkerId::next();
    let mut response = worker
        .scope(async {
            // Retires the context even if the handler unwinds.
            let _guard = engine.registry().bind(worker);

            let ctx = match engine.begin_request(
                worker,
                request_handle.clone(),
                response_handle.clone(),
            ) {
                Ok(ctx) => ctx,
                Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, &e),
            };
            ctx.set_current_user(session_user(session.as_ref()));

            let response = next.run(req).await;

            if let Some(session_id) = monitor_session_id(session.as_ref()) {
                engine.log_page_request(session_id, request_handle.uri());
            }
            engine.end_request(worker);
            response
        })
        .await;

    if let Some(location) = response_handle.take_redirect() {
        response = redirect_response(&location);
    }

    if created {
        let cookie = format!("{cookie_name}={}; Path=/; HttpOnly", session.id());
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!("Invalid session cookie value: {e}"),
        }
    }

    response
}

fn session_user(session: &MemorySessionStore) -> Option<User> {
    session
        .attribute(USER_KEY)
        .and_then(|v| serde_json::from_value(v).ok())
}

fn monitor_session_id(session: &dyn SessionAttributeStore) -> Option<u64> {
    session.attribute(SESSION_ID_KEY).and_then(|v| v.as_u64())
}

fn redirect_response(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(e) => {
            warn!("Exception while trying to redirect to {location}: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn error_response(status: StatusCode, error: &ContextError) -> Response {
    (status, Json(json!({ "error": error.to_body() }))).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "activeContexts": state.engine.registry().len(),
        "sessionStores": state.stores.len(),
        "sessions": state.engine.monitor().len(),
    }))
}

async fn view_root_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    render_view(&state.engine, "/".to_string(), &params)
}

async fn view_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    render_view(&state.engine, format!("/{path}"), &params)
}

/// Echo what a renderer would see: node path, user, redirect flag, and the
/// session attributes named in `?read=a,b`.
fn render_view(
    engine: &ContextEngine,
    node_path: String,
    params: &HashMap<String, String>,
) -> Json<Value> {
    let ctx = engine.current();
    ctx.set_current_node_path(Some(node_path.clone()));

    let session = ctx.session();
    let mut attributes = serde_json::Map::new();
    if let (Some(session), Some(read)) = (&session, params.get("read")) {
        for key in read.split(',').map(str::trim).filter(|k| !k.is_empty()) {
            attributes.insert(
                key.to_string(),
                session.attribute(key).unwrap_or(Value::Null),
            );
        }
    }

    Json(json!({
        "nodePath": ctx.current_node_path(),
        "user": ctx.current_user(),
        "redirected": session.as_ref().map(|s| s.is_redirected()).unwrap_or(false),
        "attributes": attributes,
    }))
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(name) = params.get("user").filter(|n| !n.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing user parameter" })),
        )
            .into_response();
    };

    let ctx = state.engine.current();
    let Some(session) = ctx.session() else {
        return error_response(StatusCode::BAD_REQUEST, &ContextError::NoSession);
    };

    let user = User::new(uuid::Uuid::new_v4().to_string(), name.clone());
    match serde_json::to_value(&user) {
        Ok(value) => session.set_attribute(USER_KEY, value),
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &ContextError::from(e));
        }
    }
    ctx.set_current_user(Some(user.clone()));

    let session_id = state.engine.register_user_session(session.id());
    session.set_attribute(SESSION_ID_KEY, json!(session_id));
    state.engine.log_activity(session_id, "login");

    Json(json!({ "sessionId": session_id, "user": user })).into_response()
}

async fn logout_handler(State(state): State<Arc<AppState>>) -> Response {
    let ctx = state.engine.current();
    let Some(session) = ctx.session() else {
        return error_response(StatusCode::BAD_REQUEST, &ContextError::NoSession);
    };
    let Some(session_id) = monitor_session_id(session.as_ref()) else {
        return error_response(StatusCode::BAD_REQUEST, &ContextError::NoSession);
    };

    state.engine.log_activity(session_id, "logout");
    if let Err(e) = state.engine.unregister_user_session(session_id) {
        return error_response(StatusCode::NOT_FOUND, &e);
    }
    session.remove_attribute(SESSION_ID_KEY);
    session.remove_attribute(USER_KEY);
    ctx.set_current_user(None);
    // The cookie now names no store; the next request gets a fresh one.
    state.stores.invalidate(session.id());

    Json(json!({ "sessionId": session_id, "loggedOut": true })).into_response()
}

async fn flash_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (Some(key), Some(value)) = (params.get("key"), params.get("value")) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "key and value are required" })),
        )
            .into_response();
    };

    let ctx = state.engine.current();
    let pushed = ctx.push_to_next_request(key, Value::String(value.clone()));
    let target = params.get("to").cloned().unwrap_or_else(|| "/".to_string());
    let location = ctx.redirect(&target);

    Json(json!({ "pushed": pushed, "location": location })).into_response()
}

async fn sessions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "sessions": state.engine.sessions() }))
}

async fn session_lookup_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let uid = params.get("uid").map(String::as_str).unwrap_or("");
    Json(json!({ "id": state.engine.session_by_uid(uid) }))
}

async fn evict_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stores_expired = state
        .config
        .session_idle_secs
        .map(|idle| state.stores.sweep_idle(idle, Utc::now()))
        .unwrap_or(0);
    Json(json!({
        "evicted": state.engine.evict_inactive_sessions(),
        "storesExpired": stores_expired,
    }))
}
