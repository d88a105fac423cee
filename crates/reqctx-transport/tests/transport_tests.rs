//! Transport tests: the router driven in-process through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use reqctx_protocol::{ActivityKind, SessionState};
use reqctx_server::{ContextEngine, EngineConfig};
use reqctx_services::SessionStoreRegistry;
use reqctx_transport::{TransportConfig, router};
use serde_json::Value;
use tower::ServiceExt;

struct Harness {
    app: Router,
    engine: Arc<ContextEngine>,
    stores: Arc<SessionStoreRegistry>,
}

fn harness_with(config: EngineConfig, start: bool) -> Harness {
    let engine = Arc::new(ContextEngine::in_memory(config));
    if start {
        engine.start();
    }
    let stores = Arc::new(SessionStoreRegistry::new());
    let app = router(TransportConfig::default(), engine.clone(), stores.clone());
    Harness { app, engine, stores }
}

fn harness() -> Harness {
    harness_with(EngineConfig::default(), true)
}

struct Reply {
    status: StatusCode,
    location: Option<String>,
    cookie: Option<String>,
    body: Value,
}

impl Harness {
    async fn send(&self, method: &str, uri: &str, cookie: Option<&str>) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let response = self
            .app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .map(|v| v.to_str().unwrap().to_string());
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().split(';').next().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Reply {
            status,
            location,
            cookie,
            body,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Basics
// ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_counts() {
    let h = harness();
    let reply = h.send("GET", "/health", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "ok");
    // the health request's own context is retired before the response leaves
    assert_eq!(h.engine.registry().len(), 0);
}

#[tokio::test]
async fn first_request_gets_a_session_cookie() {
    let h = harness();
    let reply = h.send("GET", "/view/home", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let cookie = reply.cookie.expect("session cookie");
    assert!(cookie.starts_with("RCXSESSION="));
    assert_eq!(h.stores.len(), 1);

    // presenting the cookie reuses the store and sets no new cookie
    let reply = h.send("GET", "/view/home", Some(&cookie)).await;
    assert!(reply.cookie.is_none());
    assert_eq!(h.stores.len(), 1);
}

#[tokio::test]
async fn view_echoes_node_path() {
    let h = harness();
    let reply = h.send("GET", "/view/docs/intro", None).await;
    assert_eq!(reply.body["nodePath"], "/docs/intro");
    assert_eq!(reply.body["user"], Value::Null);
    assert_eq!(reply.body["redirected"], false);
}

#[tokio::test]
async fn engine_not_started_returns_503() {
    let h = harness_with(EngineConfig::default(), false);
    let reply = h.send("GET", "/view/home", None).await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.body["error"]["code"], -33020);
    assert_eq!(h.engine.registry().len(), 0);
}

// ─────────────────────────────────────────────────────────────────────
// Flash values and redirects
// ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn flash_value_reaches_exactly_the_next_request() {
    let h = harness();

    let reply = h
        .send("POST", "/flash?key=notice&value=saved&to=/done", None)
        .await;
    assert_eq!(reply.status, StatusCode::FOUND);
    assert_eq!(reply.location.as_deref(), Some("/view/done"));
    let cookie = reply.cookie.expect("session cookie");

    let reply = h.send("GET", "/view/done?read=notice", Some(&cookie)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["attributes"]["notice"], "saved");
    assert_eq!(reply.body["redirected"], true);

    let reply = h.send("GET", "/view/done?read=notice", Some(&cookie)).await;
    assert_eq!(reply.body["attributes"]["notice"], Value::Null);
    assert_eq!(reply.body["redirected"], false);
}

#[tokio::test]
async fn redirect_escapes_ampersands_under_context_path() {
    let config = EngineConfig {
        context_path: "/app".into(),
        ..EngineConfig::default()
    };
    let h = harness_with(config, true);
    let reply = h
        .send("POST", "/flash?key=k&value=v&to=/a%26b", None)
        .await;
    assert_eq!(reply.status, StatusCode::FOUND);
    assert_eq!(reply.location.as_deref(), Some("/app/view/a%26b"));
}

#[tokio::test]
async fn flash_without_key_is_rejected() {
    let h = harness();
    let reply = h.send("POST", "/flash?value=v", None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

// ─────────────────────────────────────────────────────────────────────
// Login sessions
// ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn login_activity_and_logout() {
    let h = harness();

    let reply = h.send("POST", "/login?user=alice", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["sessionId"], 0);
    assert_eq!(reply.body["user"]["name"], "alice");
    let cookie = reply.cookie.expect("session cookie");
    let uid = cookie.trim_start_matches("RCXSESSION=").to_string();

    let reply = h.send("GET", "/view/home", Some(&cookie)).await;
    assert_eq!(reply.body["user"]["name"], "alice");
    let session = h.engine.monitor().session(0).unwrap();
    assert_eq!(session.last_activity_kind(), Some(ActivityKind::PageRequest));
    assert_eq!(session.user_name(), Some("alice"));

    let reply = h
        .send("GET", &format!("/sessions/lookup?uid={uid}"), None)
        .await;
    assert_eq!(reply.body["id"], 0);
    let reply = h.send("GET", "/sessions/lookup?uid=unknown", None).await;
    assert_eq!(reply.body["id"], -1);

    let reply = h.send("POST", "/logout", Some(&cookie)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["loggedOut"], true);
    // logout drops the store behind the cookie
    assert!(h.stores.get(&uid).is_none());

    let reply = h.send("GET", "/sessions", None).await;
    let sessions = reply.body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["state"], "INACTIVE");
    assert!(sessions[0]["logoutTimestamp"].is_string());
    assert_eq!(h.engine.monitor().session(0).unwrap().state, SessionState::Inactive);

    // no longer logged in; the stale cookie is replaced
    let reply = h.send("POST", "/logout", Some(&cookie)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    let rotated = reply.cookie.expect("replacement cookie");
    assert_ne!(rotated, cookie);
}

#[tokio::test]
async fn login_requires_user_name() {
    let h = harness();
    let reply = h.send("POST", "/login", None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(h.engine.sessions().is_empty());
}

#[tokio::test]
async fn evict_with_default_retention_removes_nothing() {
    let h = harness();
    let reply = h.send("POST", "/login?user=bob", None).await;
    let cookie = reply.cookie.unwrap();
    h.send("POST", "/logout", Some(&cookie)).await;

    let reply = h.send("POST", "/sessions/evict", None).await;
    assert_eq!(reply.body["evicted"], 0);
    assert_eq!(h.engine.sessions().len(), 1);
}

#[tokio::test]
async fn evict_expires_idle_session_stores() {
    let engine = Arc::new(ContextEngine::in_memory(EngineConfig::default()));
    engine.start();
    let stores = Arc::new(SessionStoreRegistry::new());
    let config = TransportConfig {
        session_idle_secs: Some(0),
        ..TransportConfig::default()
    };
    let h = Harness {
        app: router(config, engine.clone(), stores.clone()),
        engine,
        stores,
    };

    for _ in 0..20 {
        h.send("GET", "/view/home", None).await;
    }
    assert_eq!(h.stores.len(), 20);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let reply = h.send("POST", "/sessions/evict", None).await;
    assert!(reply.body["storesExpired"].as_u64().unwrap() >= 20);
    assert!(h.stores.len() <= 1);
}

#[tokio::test]
async fn evict_keeps_stores_without_idle_limit() {
    let engine = Arc::new(ContextEngine::in_memory(EngineConfig::default()));
    engine.start();
    let stores = Arc::new(SessionStoreRegistry::new());
    let config = TransportConfig {
        session_idle_secs: None,
        ..TransportConfig::default()
    };
    let h = Harness {
        app: router(config, engine.clone(), stores.clone()),
        engine,
        stores,
    };

    h.send("GET", "/view/home", None).await;
    let reply = h.send("POST", "/sessions/evict", None).await;
    assert_eq!(reply.body["storesExpired"], 0);
    assert_eq!(h.stores.len(), 2);
}
